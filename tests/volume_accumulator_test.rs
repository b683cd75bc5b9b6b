//! Integration tests for the volume accumulator.

use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;
use uplinepay::db::init_db;
use uplinepay::db::repo::VolumeError;
use uplinepay::domain::{AccumulatorStatus, PeriodKey};
use uplinepay::{Decimal, Repository, TimeMs, TradeFact, UserId};

async fn setup_test_db() -> (Arc<Repository>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    (Arc::new(Repository::new(pool)), temp_dir)
}

// 2025-01-15T00:00:00Z
const JAN_2025_MS: i64 = 1_736_899_200_000;
// 2025-02-10T00:00:00Z
const FEB_2025_MS: i64 = 1_739_145_600_000;

fn fact(user: &str, lots: &str, trade_id: i64, closed_at_ms: i64) -> TradeFact {
    TradeFact::new(
        UserId::new(user),
        "EURUSD",
        Decimal::from_str(lots).unwrap(),
        Decimal::from_str("100000").unwrap(),
        Some(trade_id),
        TimeMs::new(closed_at_ms),
    )
}

#[tokio::test]
async fn test_facts_bucket_by_calendar_month() {
    let (repo, _temp) = setup_test_db().await;

    repo.record_volume(&fact("t1", "1", 1, JAN_2025_MS)).await.unwrap();
    let feb = repo.record_volume(&fact("t1", "2", 2, FEB_2025_MS)).await.unwrap();

    assert_eq!(feb.period.as_str(), "2025-02");
    assert_eq!(feb.total_lots, Decimal::from_str("2").unwrap());

    let jan_period: PeriodKey = "2025-01".parse().unwrap();
    let jan = repo
        .get_accumulator(&UserId::new("t1"), &jan_period)
        .await
        .unwrap()
        .expect("january bucket missing");
    assert_eq!(jan.total_lots, Decimal::from_str("1").unwrap());
    assert_eq!(jan.total_trades, 1);
}

#[tokio::test]
async fn test_duplicate_fact_keys_still_increment() {
    // Deduplication of facts is the trading subsystem's responsibility; the
    // accumulator folds in whatever it is given and keeps the last fact key.
    let (repo, _temp) = setup_test_db().await;

    repo.record_volume(&fact("t1", "1", 7, JAN_2025_MS)).await.unwrap();
    let snapshot = repo.record_volume(&fact("t1", "1", 7, JAN_2025_MS)).await.unwrap();

    assert_eq!(snapshot.total_trades, 2);
    assert_eq!(snapshot.last_fact_key.as_deref(), Some("trade:7"));
}

#[tokio::test]
async fn test_concurrent_increments_lose_no_updates() {
    let (repo, _temp) = setup_test_db().await;

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let repo = repo.clone();
            tokio::spawn(async move {
                repo.record_volume(&fact("t1", "0.5", i, JAN_2025_MS)).await
            })
        })
        .collect();
    for task in tasks {
        task.await.expect("task panicked").expect("record failed");
    }

    let period: PeriodKey = "2025-01".parse().unwrap();
    let bucket = repo
        .get_accumulator(&UserId::new("t1"), &period)
        .await
        .unwrap()
        .expect("bucket missing");
    assert_eq!(bucket.total_lots, Decimal::from_str("10").unwrap());
    assert_eq!(bucket.total_trades, 20);
}

#[tokio::test]
async fn test_late_fact_after_processing_is_rejected() {
    let (repo, _temp) = setup_test_db().await;

    let snapshot = repo.record_volume(&fact("t1", "2.5", 1, JAN_2025_MS)).await.unwrap();
    repo.mark_accumulator_processed(&snapshot.user, &snapshot.period, "run-1")
        .await
        .unwrap();

    let err = repo
        .record_volume(&fact("t1", "1", 2, JAN_2025_MS))
        .await
        .unwrap_err();
    assert!(matches!(err, VolumeError::StalePeriod { .. }));

    // A fact for the next month opens a fresh bucket instead.
    let feb = repo.record_volume(&fact("t1", "1", 3, FEB_2025_MS)).await.unwrap();
    assert_eq!(feb.status, AccumulatorStatus::Accumulating);
    assert_eq!(feb.total_trades, 1);
}

#[tokio::test]
async fn test_excess_lot_precision_rejected() {
    let (repo, _temp) = setup_test_db().await;

    let bad = TradeFact::new(
        UserId::new("t1"),
        "EURUSD",
        Decimal::from_str("0.0000001").unwrap(),
        Decimal::from_str("1").unwrap(),
        Some(1),
        TimeMs::new(JAN_2025_MS),
    );
    let err = repo.record_volume(&bad).await.unwrap_err();
    assert!(matches!(err, VolumeError::InvalidLots { .. }));
}
