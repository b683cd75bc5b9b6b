//! End-to-end tests for the monthly batch payout engine.

use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;
use uplinepay::db::init_db;
use uplinepay::db::repo::EntryFilter;
use uplinepay::domain::{
    AccountStatus, AccumulatorStatus, EdgeStatus, EntryStatus, NewCommissionEntry, RateTable,
};
use uplinepay::engine::{PayoutOutcome, PayoutSkip};
use uplinepay::{
    BatchPayoutEngine, CancelToken, CommissionSettings, Decimal, MockReferralDirectory, PeriodKey,
    Repository, TimeMs, TradeFact, UserId,
};

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

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

// 2025-01-15T00:00:00Z and 2025-02-10T00:00:00Z
const JAN_2025_MS: i64 = 1_736_899_200_000;
const FEB_2025_MS: i64 = 1_739_145_600_000;

fn volume_settings() -> CommissionSettings {
    let mut settings = CommissionSettings::default();
    settings.volume.enabled = true;
    settings.volume.max_levels = 2;
    settings.volume.rates = RateTable::new(vec![dec("4"), dec("3")]);
    settings.volume.min_lots = dec("0.5");
    settings.volume.auto_payout = true;
    settings
}

async fn seed_user_chain(repo: &Repository, chain: &[(&str, &str)]) {
    for (child, beneficiary) in chain {
        repo.upsert_account(&UserId::new(*beneficiary), AccountStatus::Active)
            .await
            .unwrap();
        repo.insert_referral_edge(
            &UserId::new(*child),
            &UserId::new(*beneficiary),
            EdgeStatus::Active,
            TimeMs::new(1),
        )
        .await
        .unwrap();
    }
}

async fn record_lots(repo: &Repository, user: &str, lots: &str, trade_id: i64) {
    let fact = TradeFact::new(
        UserId::new(user),
        "EURUSD",
        dec(lots),
        dec("100000"),
        Some(trade_id),
        TimeMs::new(JAN_2025_MS),
    );
    repo.record_volume(&fact).await.unwrap();
}

fn engine(repo: &Arc<Repository>) -> BatchPayoutEngine {
    BatchPayoutEngine::new(repo.clone(), repo.clone())
}

fn jan() -> PeriodKey {
    "2025-01".parse().unwrap()
}

async fn run(engine: &BatchPayoutEngine, repo: &Repository, target: Option<PeriodKey>) -> PayoutOutcome {
    let settings = {
        // Pick up any marker advanced by a previous run; settings are loaded
        // fresh per operation, never cached.
        let mut loaded = repo.load_settings().await.unwrap();
        let base = volume_settings();
        loaded.volume = base.volume;
        loaded
    };
    engine
        .run_monthly_payout(&settings, target, TimeMs::new(FEB_2025_MS), &CancelToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_two_level_payout_to_the_cent() {
    let (repo, _temp) = setup_test_db().await;
    seed_user_chain(&repo, &[("t", "b1"), ("b1", "b2")]).await;
    record_lots(&repo, "t", "1.5", 1).await;
    record_lots(&repo, "t", "1", 2).await; // total 2.5 lots

    let outcome = run(&engine(&repo), &repo, Some(jan())).await;
    let batch_run = outcome.run.expect("run should execute");

    assert_eq!(batch_run.traders_processed, 1);
    assert_eq!(batch_run.entries_created, 2);
    assert_eq!(batch_run.total_amount, dec("17.50"));
    assert!(batch_run.errors.is_empty());

    // entry(B1, T, "2025-01", 1, $10.00, CREDITED)
    // entry(B2, T, "2025-01", 2, $7.50, CREDITED)
    let entries = repo
        .query_entries(&EntryFilter {
            period_or_trigger: Some("2025-01".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        assert_eq!(entry.status, EntryStatus::Credited);
        assert_eq!(entry.source, UserId::new("t"));
        assert_eq!(entry.batch_id.as_deref(), Some(batch_run.id.as_str()));
        match entry.level {
            1 => {
                assert_eq!(entry.beneficiary, UserId::new("b1"));
                assert_eq!(entry.amount, dec("10.00"));
                assert_eq!(entry.rate, dec("4"));
                assert_eq!(entry.lots, Some(dec("2.5")));
            }
            2 => {
                assert_eq!(entry.beneficiary, UserId::new("b2"));
                assert_eq!(entry.amount, dec("7.50"));
            }
            other => panic!("unexpected level {}", other),
        }
    }

    assert_eq!(repo.get_wallet(&UserId::new("b1")).await.unwrap().balance_cents, 1000);
    assert_eq!(repo.get_wallet(&UserId::new("b2")).await.unwrap().balance_cents, 750);

    // The consumed bucket settled all its entries, so it advances to PAID.
    let bucket = repo
        .get_accumulator(&UserId::new("t"), &jan())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bucket.status, AccumulatorStatus::Paid);
    assert_eq!(bucket.batch_id.as_deref(), Some(batch_run.id.as_str()));
}

#[tokio::test]
async fn test_rerun_of_settled_period_is_reported_noop() {
    let (repo, _temp) = setup_test_db().await;
    seed_user_chain(&repo, &[("t", "b1")]).await;
    record_lots(&repo, "t", "2.5", 1).await;

    let engine = engine(&repo);
    let first = run(&engine, &repo, Some(jan())).await;
    assert!(first.executed());

    let second = run(&engine, &repo, Some(jan())).await;
    assert!(!second.executed());
    assert_eq!(second.skip, Some(PayoutSkip::AlreadyProcessed(jan())));

    let entries = repo.query_entries(&EntryFilter::default()).await.unwrap();
    assert_eq!(entries.len(), 1, "rerun must create zero new entries");
}

#[tokio::test]
async fn test_trader_failure_does_not_poison_the_batch() {
    let (repo, _temp) = setup_test_db().await;
    // "bad" sorts before "good", so the failing trader is processed first.
    record_lots(&repo, "bad", "1", 1).await;
    record_lots(&repo, "good", "2.5", 2).await;

    let directory = Arc::new(
        MockReferralDirectory::new()
            .with_edge("good", "b1")
            .with_failing_lookup("bad"),
    );
    let engine = BatchPayoutEngine::new(repo.clone(), directory);
    let outcome = engine
        .run_monthly_payout(
            &volume_settings(),
            Some(jan()),
            TimeMs::new(FEB_2025_MS),
            &CancelToken::new(),
        )
        .await
        .unwrap();
    let batch_run = outcome.run.unwrap();

    assert_eq!(batch_run.traders_processed, 2);
    assert_eq!(batch_run.errors.len(), 1);
    assert_eq!(batch_run.errors[0].source, UserId::new("bad"));

    // The good trader is fully paid.
    assert_eq!(repo.get_wallet(&UserId::new("b1")).await.unwrap().balance_cents, 1000);

    // Both accumulators are consumed; the failed one stays visible through
    // the run's error list rather than being re-selected forever.
    for user in ["bad", "good"] {
        let bucket = repo
            .get_accumulator(&UserId::new(user), &jan())
            .await
            .unwrap()
            .unwrap();
        assert_ne!(bucket.status, AccumulatorStatus::Accumulating);
    }
}

#[tokio::test]
async fn test_rerun_after_partial_run_skips_existing_entries() {
    let (repo, _temp) = setup_test_db().await;
    seed_user_chain(&repo, &[("t", "b1"), ("b1", "b2")]).await;
    record_lots(&repo, "t", "2.5", 1).await;

    // A prior run crashed after creating only the level-1 entry.
    let stale = NewCommissionEntry::batch(
        UserId::new("b1"),
        UserId::new("t"),
        &jan(),
        1,
        dec("4"),
        dec("2.5"),
        dec("10.00"),
        "crashed-run".to_string(),
        TimeMs::new(JAN_2025_MS),
    );
    repo.insert_entry(&stale).await.unwrap();

    let outcome = run(&engine(&repo), &repo, Some(jan())).await;
    let batch_run = outcome.run.unwrap();

    // Only the missing level is created; the duplicate is skipped silently.
    assert_eq!(batch_run.entries_created, 1);
    assert!(batch_run.errors.is_empty());

    let entries = repo.query_entries(&EntryFilter::default()).await.unwrap();
    assert_eq!(entries.len(), 2);

    // Wallet credit happened only for this run's entry; the stale PENDING
    // entry belongs to the crashed run and is reconciliation's job.
    assert_eq!(repo.get_wallet(&UserId::new("b1")).await.unwrap().balance_cents, 0);
    assert_eq!(repo.get_wallet(&UserId::new("b2")).await.unwrap().balance_cents, 750);
}

#[tokio::test]
async fn test_min_lots_threshold_excludes_small_traders() {
    let (repo, _temp) = setup_test_db().await;
    seed_user_chain(&repo, &[("small", "b1"), ("big", "b1")]).await;
    record_lots(&repo, "small", "0.2", 1).await;
    record_lots(&repo, "big", "2", 2).await;

    let outcome = run(&engine(&repo), &repo, Some(jan())).await;
    let batch_run = outcome.run.unwrap();
    assert_eq!(batch_run.traders_processed, 1);

    let small = repo
        .get_accumulator(&UserId::new("small"), &jan())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(small.status, AccumulatorStatus::Accumulating);
}

#[tokio::test]
async fn test_manual_credit_mode_leaves_entries_pending() {
    let (repo, _temp) = setup_test_db().await;
    seed_user_chain(&repo, &[("t", "b1")]).await;
    record_lots(&repo, "t", "2.5", 1).await;

    let mut settings = volume_settings();
    settings.volume.auto_payout = false;

    let outcome = engine(&repo)
        .run_monthly_payout(&settings, Some(jan()), TimeMs::new(FEB_2025_MS), &CancelToken::new())
        .await
        .unwrap();
    assert!(outcome.executed());

    let entries = repo.query_entries(&EntryFilter::default()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, EntryStatus::Pending);
    assert_eq!(repo.get_wallet(&UserId::new("b1")).await.unwrap().balance_cents, 0);

    // Consumed but not settled: PROCESSED, not PAID.
    let bucket = repo
        .get_accumulator(&UserId::new("t"), &jan())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bucket.status, AccumulatorStatus::Processed);

    // The period marker still advances; crediting is a separate concern.
    let loaded = repo.load_settings().await.unwrap();
    assert_eq!(loaded.last_processed_period, Some(jan()));
}

#[tokio::test]
async fn test_cancelled_run_is_resumable() {
    let (repo, _temp) = setup_test_db().await;
    seed_user_chain(&repo, &[("t", "b1")]).await;
    record_lots(&repo, "t", "2.5", 1).await;

    let engine = engine(&repo);
    let token = CancelToken::new();
    token.cancel();

    let outcome = engine
        .run_monthly_payout(&volume_settings(), Some(jan()), TimeMs::new(FEB_2025_MS), &token)
        .await
        .unwrap();
    let cancelled_run = outcome.run.unwrap();
    assert_eq!(cancelled_run.status.as_str(), "CANCELLED");
    assert_eq!(cancelled_run.traders_processed, 0);

    // Nothing was consumed and the period marker did not advance, so a later
    // run picks up exactly where this one left off.
    let loaded = repo.load_settings().await.unwrap();
    assert!(loaded.last_processed_period.is_none());

    let retry = run(&engine, &repo, Some(jan())).await;
    let batch_run = retry.run.unwrap();
    assert_eq!(batch_run.entries_created, 1);
    assert_eq!(repo.get_wallet(&UserId::new("b1")).await.unwrap().balance_cents, 1000);
}

#[tokio::test]
async fn test_default_target_is_previous_month() {
    let (repo, _temp) = setup_test_db().await;
    seed_user_chain(&repo, &[("t", "b1")]).await;
    record_lots(&repo, "t", "2.5", 1).await; // January volume

    // Invoked in February with no explicit target.
    let outcome = run(&engine(&repo), &repo, None).await;
    let batch_run = outcome.run.unwrap();
    assert_eq!(batch_run.target_period, jan());
    assert_eq!(batch_run.entries_created, 1);
}

#[tokio::test]
async fn test_disabled_mode_skips() {
    let (repo, _temp) = setup_test_db().await;

    let mut settings = volume_settings();
    settings.volume.enabled = false;

    let outcome = engine(&repo)
        .run_monthly_payout(&settings, Some(jan()), TimeMs::new(FEB_2025_MS), &CancelToken::new())
        .await
        .unwrap();
    assert!(!outcome.executed());
    assert_eq!(outcome.skip, Some(PayoutSkip::Disabled));
}

#[tokio::test]
async fn test_run_is_persisted_for_audit() {
    let (repo, _temp) = setup_test_db().await;
    seed_user_chain(&repo, &[("t", "b1")]).await;
    record_lots(&repo, "t", "2.5", 1).await;

    let outcome = run(&engine(&repo), &repo, Some(jan())).await;
    let batch_run = outcome.run.unwrap();

    let stored = repo
        .get_batch_run(&batch_run.id)
        .await
        .unwrap()
        .expect("run must be persisted");
    assert_eq!(stored, batch_run);

    let listed = repo.list_batch_runs(Some(&jan())).await.unwrap();
    assert_eq!(listed.len(), 1);
}
