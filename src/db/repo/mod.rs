//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `volume.rs` - Trade volume accumulator operations
//! - `ledger.rs` - Commission ledger and wallet operations
//!
//! Settings, accounts, referral edges and batch-run persistence live here.

mod ledger;
mod volume;

pub use ledger::{
    CreditOutcome, EntryFilter, InsertOutcome, LedgerError, LevelSummary, ReversalOutcome,
};
pub use volume::VolumeError;

use crate::domain::{
    AccountStatus, BatchErrorRecord, BatchRun, BatchRunStatus, BeneficiaryWallet,
    CommissionSettings, Decimal, EdgeStatus, InstantModeSettings, PeriodKey, RateTable, TimeMs,
    UserId, VolumeModeSettings,
};
use crate::referral::{DirectoryError, ReferralDirectory};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    // =========================================================================
    // Account and referral-edge writes (collaborator-facing surface)
    // =========================================================================

    /// Create or update an account's standing.
    pub async fn upsert_account(
        &self,
        user: &UserId,
        status: AccountStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO accounts (user_id, status)
            VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET status = excluded.status
            "#,
        )
        .bind(user.as_str())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a referral edge. The partial unique index rejects a second
    /// ACTIVE edge for the same child.
    pub async fn insert_referral_edge(
        &self,
        child: &UserId,
        beneficiary: &UserId,
        status: EdgeStatus,
        now: TimeMs,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO referral_edges (child_id, beneficiary_id, status, created_at_ms)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(child.as_str())
        .bind(beneficiary.as_str())
        .bind(status.as_str())
        .bind(now.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Load the settings snapshot threaded into engine calls.
    pub async fn load_settings(&self) -> Result<CommissionSettings, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT instant_enabled, instant_trigger, instant_max_levels,
                   instant_credit_immediately, volume_enabled, volume_max_levels,
                   volume_min_lots, volume_auto_payout, last_processed_period,
                   last_payout_run_ms
            FROM payout_settings WHERE id = 1
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let instant_trigger: Option<String> = row.get("instant_trigger");
        let min_lots_str: String = row.get("volume_min_lots");
        let min_lots = Decimal::from_str(&min_lots_str).unwrap_or_else(|e| {
            warn!(min_lots = %min_lots_str, error = %e, "Failed to parse min-lots threshold, using zero");
            Decimal::zero()
        });
        let last_processed_period: Option<String> = row.get("last_processed_period");
        let last_processed_period = last_processed_period.and_then(|s| match s.parse() {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(period = %s, error = %e, "Ignoring malformed last-processed-period marker");
                None
            }
        });

        Ok(CommissionSettings {
            instant: InstantModeSettings {
                enabled: row.get::<i64, _>("instant_enabled") != 0,
                required_trigger: instant_trigger.and_then(|s| s.parse().ok()),
                max_levels: row.get::<i64, _>("instant_max_levels") as u32,
                amounts: self.load_rate_table("instant").await?,
                credit_immediately: row.get::<i64, _>("instant_credit_immediately") != 0,
            },
            volume: VolumeModeSettings {
                enabled: row.get::<i64, _>("volume_enabled") != 0,
                max_levels: row.get::<i64, _>("volume_max_levels") as u32,
                rates: self.load_rate_table("volume").await?,
                min_lots,
                auto_payout: row.get::<i64, _>("volume_auto_payout") != 0,
            },
            last_processed_period,
            last_payout_run_at: row
                .get::<Option<i64>, _>("last_payout_run_ms")
                .map(TimeMs::new),
        })
    }

    async fn load_rate_table(&self, mode: &str) -> Result<RateTable, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT level, rate FROM commission_rates WHERE mode = ? ORDER BY level ASC",
        )
        .bind(mode)
        .fetch_all(&self.pool)
        .await?;

        let max_level = rows
            .iter()
            .map(|row| row.get::<i64, _>("level"))
            .max()
            .unwrap_or(0);
        let mut rates = vec![Decimal::zero(); max_level.max(0) as usize];
        for row in rows {
            let level: i64 = row.get("level");
            let rate_str: String = row.get("rate");
            let rate = Decimal::from_str(&rate_str).unwrap_or_else(|e| {
                warn!(mode, level, rate = %rate_str, error = %e, "Failed to parse commission rate, using zero");
                Decimal::zero()
            });
            if level >= 1 {
                rates[(level - 1) as usize] = rate;
            }
        }
        Ok(RateTable::new(rates))
    }

    /// Replace the settings snapshot. Admin-facing; the engines never write
    /// anything here except the last-processed-period marker.
    pub async fn save_settings(&self, settings: &CommissionSettings) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE payout_settings SET
                instant_enabled = ?,
                instant_trigger = ?,
                instant_max_levels = ?,
                instant_credit_immediately = ?,
                volume_enabled = ?,
                volume_max_levels = ?,
                volume_min_lots = ?,
                volume_auto_payout = ?
            WHERE id = 1
            "#,
        )
        .bind(settings.instant.enabled as i64)
        .bind(settings.instant.required_trigger.map(|t| t.as_str()))
        .bind(settings.instant.max_levels as i64)
        .bind(settings.instant.credit_immediately as i64)
        .bind(settings.volume.enabled as i64)
        .bind(settings.volume.max_levels as i64)
        .bind(settings.volume.min_lots.to_canonical_string())
        .bind(settings.volume.auto_payout as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM commission_rates")
            .execute(&mut *tx)
            .await?;
        for (mode, table) in [
            ("instant", &settings.instant.amounts),
            ("volume", &settings.volume.rates),
        ] {
            for (level, rate) in table.iter() {
                sqlx::query("INSERT INTO commission_rates (mode, level, rate) VALUES (?, ?, ?)")
                    .bind(mode)
                    .bind(level as i64)
                    .bind(rate.to_canonical_string())
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Advance the last-processed-period marker after a settled payout run.
    pub async fn mark_period_processed(
        &self,
        period: &PeriodKey,
        now: TimeMs,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE payout_settings SET last_processed_period = ?, last_payout_run_ms = ? WHERE id = 1",
        )
        .bind(period.as_str())
        .bind(now.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Wallets (reads; mutations live in ledger.rs next to the transitions)
    // =========================================================================

    /// Read a beneficiary wallet. Users without a wallet row have zero
    /// balances.
    pub async fn get_wallet(&self, user: &UserId) -> Result<BeneficiaryWallet, sqlx::Error> {
        let row = sqlx::query(
            "SELECT balance_cents, total_earned_cents FROM wallets WHERE user_id = ?",
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|r| BeneficiaryWallet {
                balance_cents: r.get("balance_cents"),
                total_earned_cents: r.get("total_earned_cents"),
            })
            .unwrap_or_default())
    }

    // =========================================================================
    // Batch runs
    // =========================================================================

    /// Persist a freshly started run so an interrupted batch still leaves an
    /// audit trail.
    pub async fn insert_batch_run(&self, run: &BatchRun) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO batch_runs (id, target_period, status, started_at_ms)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(run.target_period.as_str())
        .bind(run.status.as_str())
        .bind(run.started_at.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Write the run's final counts, status and error list.
    pub async fn finalize_batch_run(&self, run: &BatchRun) -> Result<(), sqlx::Error> {
        let total_cents = run.total_amount.to_cents().unwrap_or_else(|| {
            warn!(run_id = %run.id, total = %run.total_amount, "Run total is not cent-representable, storing zero");
            0
        });

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE batch_runs SET
                status = ?,
                finished_at_ms = ?,
                traders_processed = ?,
                entries_created = ?,
                total_amount_cents = ?
            WHERE id = ?
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.finished_at.map(|t| t.as_i64()))
        .bind(run.traders_processed)
        .bind(run.entries_created)
        .bind(total_cents)
        .bind(&run.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM batch_run_errors WHERE run_id = ?")
            .bind(&run.id)
            .execute(&mut *tx)
            .await?;
        for error in &run.errors {
            sqlx::query(
                "INSERT INTO batch_run_errors (run_id, source_id, message) VALUES (?, ?, ?)",
            )
            .bind(&run.id)
            .bind(error.source.as_str())
            .bind(&error.message)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Fetch a run with its ordered error list.
    pub async fn get_batch_run(&self, id: &str) -> Result<Option<BatchRun>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, target_period, status, started_at_ms, finished_at_ms,
                   traders_processed, entries_created, total_amount_cents
            FROM batch_runs WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let mut run = map_batch_run_row(&row)?;
        run.errors = self.load_run_errors(id).await?;
        Ok(Some(run))
    }

    /// List runs, newest first, optionally restricted to one period.
    pub async fn list_batch_runs(
        &self,
        period: Option<&PeriodKey>,
    ) -> Result<Vec<BatchRun>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, target_period, status, started_at_ms, finished_at_ms,
                   traders_processed, entries_created, total_amount_cents
            FROM batch_runs
            WHERE (? IS NULL OR target_period = ?)
            ORDER BY started_at_ms DESC, id DESC
            "#,
        )
        .bind(period.map(|p| p.as_str()))
        .bind(period.map(|p| p.as_str()))
        .fetch_all(&self.pool)
        .await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut run = map_batch_run_row(row)?;
            let errors = self.load_run_errors(&run.id).await?;
            run.errors = errors;
            runs.push(run);
        }
        Ok(runs)
    }

    async fn load_run_errors(&self, run_id: &str) -> Result<Vec<BatchErrorRecord>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT source_id, message FROM batch_run_errors WHERE run_id = ? ORDER BY id ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| BatchErrorRecord {
                source: UserId::new(row.get::<String, _>("source_id")),
                message: row.get("message"),
            })
            .collect())
    }
}

fn map_batch_run_row(row: &sqlx::sqlite::SqliteRow) -> Result<BatchRun, sqlx::Error> {
    let period_str: String = row.get("target_period");
    let target_period: PeriodKey = period_str
        .parse()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let status_str: String = row.get("status");
    let status = BatchRunStatus::from_str(&status_str).unwrap_or_else(|_| {
        warn!(status = %status_str, "Unknown batch run status, treating as RUNNING");
        BatchRunStatus::Running
    });

    Ok(BatchRun {
        id: row.get("id"),
        target_period,
        status,
        started_at: TimeMs::new(row.get("started_at_ms")),
        finished_at: row.get::<Option<i64>, _>("finished_at_ms").map(TimeMs::new),
        traders_processed: row.get("traders_processed"),
        entries_created: row.get("entries_created"),
        total_amount: Decimal::from_cents(row.get("total_amount_cents")),
        errors: Vec::new(),
    })
}

#[async_trait]
impl ReferralDirectory for Repository {
    async fn active_referrer(&self, child: &UserId) -> Result<Option<UserId>, DirectoryError> {
        let row = sqlx::query(
            "SELECT beneficiary_id FROM referral_edges WHERE child_id = ? AND status = 'ACTIVE'",
        )
        .bind(child.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| UserId::new(r.get::<String, _>("beneficiary_id"))))
    }

    async fn is_account_active(&self, user: &UserId) -> Result<bool, DirectoryError> {
        let row = sqlx::query("SELECT status FROM accounts WHERE user_id = ?")
            .bind(user.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row
            .map(|r| r.get::<String, _>("status") == "ACTIVE")
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{ActivationTrigger, RateTable};
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

    fn rate(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_settings_roundtrip() {
        let (repo, _temp) = setup_test_db().await;

        let mut settings = CommissionSettings::default();
        settings.instant.enabled = true;
        settings.instant.required_trigger = Some(ActivationTrigger::FirstDeposit);
        settings.instant.max_levels = 2;
        settings.instant.amounts = RateTable::new(vec![rate("15"), rate("5")]);
        settings.volume.enabled = true;
        settings.volume.max_levels = 3;
        settings.volume.rates = RateTable::new(vec![rate("4"), rate("3"), rate("1.5")]);
        settings.volume.min_lots = rate("0.5");

        repo.save_settings(&settings).await.expect("save failed");
        let loaded = repo.load_settings().await.expect("load failed");

        assert_eq!(loaded.instant, settings.instant);
        assert_eq!(loaded.volume, settings.volume);
        assert!(loaded.last_processed_period.is_none());
    }

    #[tokio::test]
    async fn test_mark_period_processed_persists() {
        let (repo, _temp) = setup_test_db().await;

        let period: PeriodKey = "2025-03".parse().unwrap();
        repo.mark_period_processed(&period, TimeMs::new(777))
            .await
            .expect("mark failed");

        let loaded = repo.load_settings().await.expect("load failed");
        assert_eq!(loaded.last_processed_period, Some(period));
        assert_eq!(loaded.last_payout_run_at, Some(TimeMs::new(777)));
    }

    #[tokio::test]
    async fn test_directory_walks_active_edges_only() {
        let (repo, _temp) = setup_test_db().await;

        let child = UserId::new("c1");
        let old = UserId::new("old");
        let current = UserId::new("current");
        repo.insert_referral_edge(&child, &old, EdgeStatus::Inactive, TimeMs::new(1))
            .await
            .unwrap();
        repo.insert_referral_edge(&child, &current, EdgeStatus::Active, TimeMs::new(2))
            .await
            .unwrap();

        let referrer = repo.active_referrer(&child).await.unwrap();
        assert_eq!(referrer, Some(current));
    }

    #[tokio::test]
    async fn test_unknown_account_is_not_active() {
        let (repo, _temp) = setup_test_db().await;

        let user = UserId::new("ghost");
        assert!(!repo.is_account_active(&user).await.unwrap());

        repo.upsert_account(&user, AccountStatus::Active).await.unwrap();
        assert!(repo.is_account_active(&user).await.unwrap());

        repo.upsert_account(&user, AccountStatus::Suspended)
            .await
            .unwrap();
        assert!(!repo.is_account_active(&user).await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_run_roundtrip_with_errors() {
        let (repo, _temp) = setup_test_db().await;

        let period: PeriodKey = "2025-01".parse().unwrap();
        let mut run = BatchRun::start(period, TimeMs::new(100));
        repo.insert_batch_run(&run).await.expect("insert failed");

        run.traders_processed = 3;
        run.entries_created = 5;
        run.total_amount = rate("17.50");
        run.record_error(UserId::new("t2"), "upline lookup failed");
        run.finish(BatchRunStatus::Completed, TimeMs::new(200));
        repo.finalize_batch_run(&run).await.expect("finalize failed");

        let loaded = repo
            .get_batch_run(&run.id)
            .await
            .expect("get failed")
            .expect("run missing");
        assert_eq!(loaded, run);

        let listed = repo.list_batch_runs(None).await.expect("list failed");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, run.id);
    }

    #[tokio::test]
    async fn test_wallet_defaults_to_zero() {
        let (repo, _temp) = setup_test_db().await;

        let wallet = repo.get_wallet(&UserId::new("nobody")).await.unwrap();
        assert_eq!(wallet, BeneficiaryWallet::default());
    }
}
