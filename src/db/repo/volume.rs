//! Volume accumulator operations.
//!
//! `record_volume` is the concurrency-sensitive path: many trade-closing
//! events may hit the same (user, period) bucket at once. The increment is a
//! single conditional upsert statement, never a read-then-write.

use super::Repository;
use crate::domain::{
    AccumulatorStatus, Decimal, PeriodKey, PeriodKeyError, TimeMs, TradeFact, UserId,
    VolumeAccumulator,
};
use sqlx::Row;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum VolumeError {
    /// Lot volume must be positive and carry at most six decimal places.
    #[error("invalid lot volume {lots} for fact {fact_key}")]
    InvalidLots { fact_key: String, lots: Decimal },
    /// The (user, period) bucket was already consumed by a payout run;
    /// late-arriving facts are rejected, not silently folded in.
    #[error("volume bucket for {user} in {period} is no longer accumulating")]
    StalePeriod { user: UserId, period: PeriodKey },
    #[error(transparent)]
    Period(#[from] PeriodKeyError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl Repository {
    /// Fold a closed-trade fact into its (user, period) bucket.
    ///
    /// Upsert semantics: the first fact of a period creates the bucket, later
    /// facts increment it. Rejects buckets that are no longer ACCUMULATING.
    /// Returns the updated bucket snapshot.
    pub async fn record_volume(
        &self,
        fact: &TradeFact,
    ) -> Result<VolumeAccumulator, VolumeError> {
        let period = PeriodKey::from_time_ms(fact.closed_at)?;

        let lots_micro = fact
            .lots
            .to_micro_lots()
            .filter(|micro| *micro > 0)
            .ok_or_else(|| VolumeError::InvalidLots {
                fact_key: fact.fact_key.clone(),
                lots: fact.lots,
            })?;
        let notional_cents = fact.notional.round_money().to_cents().unwrap_or_else(|| {
            warn!(fact_key = %fact.fact_key, notional = %fact.notional, "Notional not cent-representable, storing zero");
            0
        });

        let result = sqlx::query(
            r#"
            INSERT INTO volume_accumulators
                (user_id, period_key, total_lots_micro, total_trades, total_notional_cents, status, last_fact_key)
            VALUES (?, ?, ?, 1, ?, 'ACCUMULATING', ?)
            ON CONFLICT(user_id, period_key) DO UPDATE SET
                total_lots_micro = total_lots_micro + excluded.total_lots_micro,
                total_trades = total_trades + 1,
                total_notional_cents = total_notional_cents + excluded.total_notional_cents,
                last_fact_key = excluded.last_fact_key
            WHERE volume_accumulators.status = 'ACCUMULATING'
            "#,
        )
        .bind(fact.user.as_str())
        .bind(period.as_str())
        .bind(lots_micro)
        .bind(notional_cents)
        .bind(&fact.fact_key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(VolumeError::StalePeriod {
                user: fact.user.clone(),
                period,
            });
        }

        let snapshot = self
            .get_accumulator(&fact.user, &period)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        Ok(snapshot)
    }

    /// Fetch one bucket.
    pub async fn get_accumulator(
        &self,
        user: &UserId,
        period: &PeriodKey,
    ) -> Result<Option<VolumeAccumulator>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT user_id, period_key, total_lots_micro, total_trades,
                   total_notional_cents, status, last_fact_key, batch_id
            FROM volume_accumulators
            WHERE user_id = ? AND period_key = ?
            "#,
        )
        .bind(user.as_str())
        .bind(period.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| map_accumulator_row(&r)).transpose()
    }

    /// Buckets eligible for a payout run: still ACCUMULATING, in the target
    /// period, at or above the lot threshold. Ordered by user for
    /// deterministic processing.
    pub async fn accumulators_for_payout(
        &self,
        period: &PeriodKey,
        min_lots: Decimal,
    ) -> Result<Vec<VolumeAccumulator>, VolumeError> {
        let min_micro = min_lots.to_micro_lots().ok_or(VolumeError::InvalidLots {
            fact_key: "min-lots-threshold".to_string(),
            lots: min_lots,
        })?;

        let rows = sqlx::query(
            r#"
            SELECT user_id, period_key, total_lots_micro, total_trades,
                   total_notional_cents, status, last_fact_key, batch_id
            FROM volume_accumulators
            WHERE period_key = ? AND status = 'ACCUMULATING' AND total_lots_micro >= ?
            ORDER BY user_id ASC
            "#,
        )
        .bind(period.as_str())
        .bind(min_micro)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| map_accumulator_row(r).map_err(VolumeError::Db))
            .collect()
    }

    /// Consume a bucket: ACCUMULATING -> PROCESSED, stamped with the run id.
    pub async fn mark_accumulator_processed(
        &self,
        user: &UserId,
        period: &PeriodKey,
        batch_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE volume_accumulators
            SET status = 'PROCESSED', batch_id = ?
            WHERE user_id = ? AND period_key = ? AND status = 'ACCUMULATING'
            "#,
        )
        .bind(batch_id)
        .bind(user.as_str())
        .bind(period.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// PROCESSED -> PAID for buckets of this run whose batch entries all
    /// settled (none left PENDING or FAILED).
    pub async fn mark_accumulators_paid(&self, batch_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE volume_accumulators
            SET status = 'PAID'
            WHERE batch_id = ? AND status = 'PROCESSED'
              AND NOT EXISTS (
                  SELECT 1 FROM commission_entries ce
                  WHERE ce.batch_id = volume_accumulators.batch_id
                    AND ce.source_id = volume_accumulators.user_id
                    AND ce.status IN ('PENDING', 'FAILED')
              )
            "#,
        )
        .bind(batch_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn map_accumulator_row(row: &sqlx::sqlite::SqliteRow) -> Result<VolumeAccumulator, sqlx::Error> {
    let period_str: String = row.get("period_key");
    let period: PeriodKey = period_str
        .parse()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let status_str: String = row.get("status");
    let status = AccumulatorStatus::from_str(&status_str).unwrap_or_else(|_| {
        warn!(status = %status_str, "Unknown accumulator status, treating as PROCESSED");
        AccumulatorStatus::Processed
    });

    Ok(VolumeAccumulator {
        user: UserId::new(row.get::<String, _>("user_id")),
        period,
        total_lots: Decimal::from_micro_lots(row.get("total_lots_micro")),
        total_trades: row.get("total_trades"),
        total_notional: Decimal::from_cents(row.get("total_notional_cents")),
        status,
        last_fact_key: row.get("last_fact_key"),
        batch_id: row.get("batch_id"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use tempfile::TempDir;

    async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    // 2025-01-15T00:00:00Z
    const JAN_2025_MS: i64 = 1_736_899_200_000;

    fn fact(user: &str, lots: &str, trade_id: i64) -> TradeFact {
        TradeFact::new(
            UserId::new(user),
            "EURUSD",
            Decimal::from_str(lots).unwrap(),
            Decimal::from_str("100000").unwrap(),
            Some(trade_id),
            TimeMs::new(JAN_2025_MS),
        )
    }

    #[tokio::test]
    async fn test_first_fact_creates_bucket() {
        let (repo, _temp) = setup_test_db().await;

        let snapshot = repo.record_volume(&fact("t1", "1.5", 1)).await.unwrap();
        assert_eq!(snapshot.period.as_str(), "2025-01");
        assert_eq!(snapshot.total_lots, Decimal::from_str("1.5").unwrap());
        assert_eq!(snapshot.total_trades, 1);
        assert_eq!(snapshot.status, AccumulatorStatus::Accumulating);
        assert_eq!(snapshot.last_fact_key.as_deref(), Some("trade:1"));
    }

    #[tokio::test]
    async fn test_later_facts_increment() {
        let (repo, _temp) = setup_test_db().await;

        repo.record_volume(&fact("t1", "1.5", 1)).await.unwrap();
        let snapshot = repo.record_volume(&fact("t1", "1", 2)).await.unwrap();

        assert_eq!(snapshot.total_lots, Decimal::from_str("2.5").unwrap());
        assert_eq!(snapshot.total_trades, 2);
        assert_eq!(snapshot.last_fact_key.as_deref(), Some("trade:2"));
    }

    #[tokio::test]
    async fn test_processed_bucket_rejects_late_facts() {
        let (repo, _temp) = setup_test_db().await;

        let snapshot = repo.record_volume(&fact("t1", "1.5", 1)).await.unwrap();
        repo.mark_accumulator_processed(&snapshot.user, &snapshot.period, "run-1")
            .await
            .unwrap();

        let err = repo.record_volume(&fact("t1", "1", 2)).await.unwrap_err();
        assert!(matches!(err, VolumeError::StalePeriod { .. }));

        // The bucket is untouched by the rejected fact.
        let after = repo
            .get_accumulator(&snapshot.user, &snapshot.period)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.total_lots, Decimal::from_str("1.5").unwrap());
        assert_eq!(after.total_trades, 1);
        assert_eq!(after.batch_id.as_deref(), Some("run-1"));
    }

    #[tokio::test]
    async fn test_non_positive_lots_rejected() {
        let (repo, _temp) = setup_test_db().await;

        let mut bad = fact("t1", "1", 1);
        bad.lots = Decimal::from_str("-1").unwrap();
        let err = repo.record_volume(&bad).await.unwrap_err();
        assert!(matches!(err, VolumeError::InvalidLots { .. }));

        bad.lots = Decimal::zero();
        let err = repo.record_volume(&bad).await.unwrap_err();
        assert!(matches!(err, VolumeError::InvalidLots { .. }));
    }

    #[tokio::test]
    async fn test_payout_selection_applies_threshold_and_status() {
        let (repo, _temp) = setup_test_db().await;

        repo.record_volume(&fact("t1", "2.5", 1)).await.unwrap();
        repo.record_volume(&fact("t2", "0.2", 2)).await.unwrap();
        repo.record_volume(&fact("t3", "5", 3)).await.unwrap();
        let period: PeriodKey = "2025-01".parse().unwrap();
        repo.mark_accumulator_processed(&UserId::new("t3"), &period, "run-0")
            .await
            .unwrap();

        let selected = repo
            .accumulators_for_payout(&period, Decimal::from_str("0.5").unwrap())
            .await
            .unwrap();
        let users: Vec<&str> = selected.iter().map(|a| a.user.as_str()).collect();
        assert_eq!(users, vec!["t1"]);
    }
}
