//! Commission ledger and wallet operations.
//!
//! The composite UNIQUE key on (beneficiary, source, period-or-trigger,
//! level) is the idempotency guard: inserts are insert-if-absent and report
//! `AlreadyExists` instead of erroring. Wallet balances only move inside the
//! same transaction as the ledger-entry state transition that justifies the
//! movement.

use super::Repository;
use crate::domain::{
    ActivationTrigger, CommissionLedgerEntry, Decimal, EntryStatus, NewCommissionEntry, TimeMs,
    UserId,
};
use sqlx::Row;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("commission entry {0} not found")]
    EntryNotFound(i64),
    /// Amounts must be rounded to two decimal places before staging.
    #[error("amount {0} is not representable in cents")]
    InvalidAmount(Decimal),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Result of an insert-if-absent on the composite idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new entry was created with this id.
    Inserted(i64),
    /// The key is already occupied; a retried operation hit the guard.
    AlreadyExists,
}

/// Result of a crediting attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Credited,
    /// The entry was not PENDING (already credited, failed or reversed).
    NotPending,
}

/// Result of a reversal attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReversalOutcome {
    Reversed(CommissionLedgerEntry),
    /// REVERSED is terminal; a second reversal is rejected.
    AlreadyReversed,
    NotFound,
}

/// Per-level aggregate over CREDITED entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSummary {
    pub level: u32,
    pub entries: i64,
    pub total_amount: Decimal,
}

/// Optional filters for entry queries; None matches everything.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub beneficiary: Option<UserId>,
    pub source: Option<UserId>,
    pub period_or_trigger: Option<String>,
    pub status: Option<EntryStatus>,
    pub batch_id: Option<String>,
}

impl Repository {
    /// Insert a commission entry if its composite key is absent.
    ///
    /// Entries are born PENDING; money moves separately via
    /// [`Repository::credit_entry`].
    pub async fn insert_entry(
        &self,
        entry: &NewCommissionEntry,
    ) -> Result<InsertOutcome, LedgerError> {
        let amount_cents = entry
            .amount
            .to_cents()
            .ok_or(LedgerError::InvalidAmount(entry.amount))?;

        let result = sqlx::query(
            r#"
            INSERT INTO commission_entries
                (beneficiary_id, source_id, period_or_trigger, level, rate, lots,
                 amount_cents, status, batch_id, activation_trigger, created_at_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'PENDING', ?, ?, ?)
            ON CONFLICT(beneficiary_id, source_id, period_or_trigger, level) DO NOTHING
            "#,
        )
        .bind(entry.beneficiary.as_str())
        .bind(entry.source.as_str())
        .bind(&entry.period_or_trigger)
        .bind(entry.level as i64)
        .bind(entry.rate.to_canonical_string())
        .bind(entry.lots.map(|l| l.to_canonical_string()))
        .bind(amount_cents)
        .bind(entry.batch_id.as_deref())
        .bind(entry.activation_trigger.map(|t| t.as_str()))
        .bind(entry.created_at.as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(InsertOutcome::Inserted(result.last_insert_rowid()))
        } else {
            debug!(
                beneficiary = %entry.beneficiary,
                source = %entry.source,
                key = %entry.period_or_trigger,
                level = entry.level,
                "Duplicate commission entry suppressed by idempotency guard"
            );
            Ok(InsertOutcome::AlreadyExists)
        }
    }

    /// PENDING -> CREDITED plus the paired wallet credit, in one transaction.
    ///
    /// The wallet mutation is a single increment statement; there is no
    /// read-modify-write on the balance.
    pub async fn credit_entry(
        &self,
        entry_id: i64,
        now: TimeMs,
    ) -> Result<CreditOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT beneficiary_id, amount_cents, status FROM commission_entries WHERE id = ?",
        )
        .bind(entry_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::EntryNotFound(entry_id))?;

        let status: String = row.get("status");
        if status != "PENDING" {
            return Ok(CreditOutcome::NotPending);
        }
        let beneficiary: String = row.get("beneficiary_id");
        let amount_cents: i64 = row.get("amount_cents");

        // Guarded transition: a concurrent crediting pass loses the race here
        // and reports NotPending instead of double-crediting.
        let updated = sqlx::query(
            "UPDATE commission_entries SET status = 'CREDITED', credited_at_ms = ? WHERE id = ? AND status = 'PENDING'",
        )
        .bind(now.as_i64())
        .bind(entry_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(CreditOutcome::NotPending);
        }

        sqlx::query(
            r#"
            INSERT INTO wallets (user_id, balance_cents, total_earned_cents)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                balance_cents = balance_cents + excluded.balance_cents,
                total_earned_cents = total_earned_cents + excluded.total_earned_cents
            "#,
        )
        .bind(&beneficiary)
        .bind(amount_cents)
        .bind(amount_cents)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CreditOutcome::Credited)
    }

    /// PENDING -> FAILED with a message. The entry stays discoverable for a
    /// reconciliation pass; the wallet is untouched.
    pub async fn fail_entry(&self, entry_id: i64, message: &str) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE commission_entries SET status = 'FAILED', error = ? WHERE id = ? AND status = 'PENDING'",
        )
        .bind(message)
        .bind(entry_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(entry_id, "fail_entry found no PENDING entry to mark");
        }
        Ok(())
    }

    /// Terminal reversal: mark REVERSED and, when the entry had been
    /// CREDITED, debit the wallet by the entry amount (balance and lifetime
    /// earned both decrease). Deliberately no overdraft check.
    pub async fn reverse_entry(
        &self,
        entry_id: i64,
        actor: &UserId,
        reason: &str,
        now: TimeMs,
    ) -> Result<ReversalOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT beneficiary_id, amount_cents, status FROM commission_entries WHERE id = ?",
        )
        .bind(entry_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(ReversalOutcome::NotFound);
        };

        let status: String = row.get("status");
        if status == "REVERSED" {
            return Ok(ReversalOutcome::AlreadyReversed);
        }
        let was_credited = status == "CREDITED";
        let beneficiary: String = row.get("beneficiary_id");
        let amount_cents: i64 = row.get("amount_cents");

        let updated = sqlx::query(
            r#"
            UPDATE commission_entries
            SET status = 'REVERSED', reversed_at_ms = ?, reversed_by = ?, reversal_reason = ?
            WHERE id = ? AND status != 'REVERSED'
            "#,
        )
        .bind(now.as_i64())
        .bind(actor.as_str())
        .bind(reason)
        .bind(entry_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(ReversalOutcome::AlreadyReversed);
        }

        if was_credited {
            sqlx::query(
                "UPDATE wallets SET balance_cents = balance_cents - ?, total_earned_cents = total_earned_cents - ? WHERE user_id = ?",
            )
            .bind(amount_cents)
            .bind(amount_cents)
            .bind(&beneficiary)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let entry = self
            .get_entry(entry_id)
            .await?
            .ok_or(LedgerError::EntryNotFound(entry_id))?;
        Ok(ReversalOutcome::Reversed(entry))
    }

    /// Whether any activation-mode entry exists for this source user, at any
    /// level. Pre-check for the instant distributor; the UNIQUE key is the
    /// authoritative guard.
    pub async fn has_activation_entries(&self, source: &UserId) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM commission_entries WHERE source_id = ? AND activation_trigger IS NOT NULL) AS present",
        )
        .bind(source.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("present") != 0)
    }

    /// Fetch one entry by id.
    pub async fn get_entry(
        &self,
        entry_id: i64,
    ) -> Result<Option<CommissionLedgerEntry>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "{} WHERE id = ?",
            SELECT_ENTRY_COLUMNS
        ))
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| map_entry_row(&r)))
    }

    /// PENDING entries created by one batch run, in insertion order. The
    /// crediting phase walks this list.
    pub async fn pending_entries_for_batch(
        &self,
        batch_id: &str,
    ) -> Result<Vec<CommissionLedgerEntry>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "{} WHERE batch_id = ? AND status = 'PENDING' ORDER BY id ASC",
            SELECT_ENTRY_COLUMNS
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_entry_row).collect())
    }

    /// Entry query with optional filters, newest first.
    pub async fn query_entries(
        &self,
        filter: &EntryFilter,
    ) -> Result<Vec<CommissionLedgerEntry>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            {}
            WHERE (? IS NULL OR beneficiary_id = ?)
              AND (? IS NULL OR source_id = ?)
              AND (? IS NULL OR period_or_trigger = ?)
              AND (? IS NULL OR status = ?)
              AND (? IS NULL OR batch_id = ?)
            ORDER BY created_at_ms DESC, id DESC
            "#,
            SELECT_ENTRY_COLUMNS
        ))
        .bind(filter.beneficiary.as_ref().map(|u| u.as_str()))
        .bind(filter.beneficiary.as_ref().map(|u| u.as_str()))
        .bind(filter.source.as_ref().map(|u| u.as_str()))
        .bind(filter.source.as_ref().map(|u| u.as_str()))
        .bind(filter.period_or_trigger.as_deref())
        .bind(filter.period_or_trigger.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.batch_id.as_deref())
        .bind(filter.batch_id.as_deref())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_entry_row).collect())
    }

    /// Per-level CREDITED totals for a period or trigger key. SUM over
    /// integer cents is exact.
    pub async fn level_summary(
        &self,
        period_or_trigger: &str,
    ) -> Result<Vec<LevelSummary>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT level, COUNT(*) AS entries, SUM(amount_cents) AS total_cents
            FROM commission_entries
            WHERE period_or_trigger = ? AND status = 'CREDITED'
            GROUP BY level
            ORDER BY level ASC
            "#,
        )
        .bind(period_or_trigger)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| LevelSummary {
                level: row.get::<i64, _>("level") as u32,
                entries: row.get("entries"),
                total_amount: Decimal::from_cents(row.get("total_cents")),
            })
            .collect())
    }

    /// CREDITED (count, total) for one beneficiary, optionally narrowed to a
    /// period or trigger key.
    pub async fn credited_totals_for_beneficiary(
        &self,
        beneficiary: &UserId,
        period_or_trigger: Option<&str>,
    ) -> Result<(i64, Decimal), sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS entries, COALESCE(SUM(amount_cents), 0) AS total_cents
            FROM commission_entries
            WHERE beneficiary_id = ? AND status = 'CREDITED'
              AND (? IS NULL OR period_or_trigger = ?)
            "#,
        )
        .bind(beneficiary.as_str())
        .bind(period_or_trigger)
        .bind(period_or_trigger)
        .fetch_one(&self.pool)
        .await?;

        Ok((
            row.get("entries"),
            Decimal::from_cents(row.get("total_cents")),
        ))
    }
}

const SELECT_ENTRY_COLUMNS: &str = r#"
    SELECT id, beneficiary_id, source_id, period_or_trigger, level, rate, lots,
           amount_cents, status, batch_id, activation_trigger, created_at_ms,
           credited_at_ms, reversed_at_ms, reversed_by, reversal_reason, error
    FROM commission_entries
"#;

fn map_entry_row(row: &sqlx::sqlite::SqliteRow) -> CommissionLedgerEntry {
    let rate_str: String = row.get("rate");
    let rate = Decimal::from_str(&rate_str).unwrap_or_else(|e| {
        warn!(rate = %rate_str, error = %e, "Failed to parse entry rate decimal, using default");
        Decimal::default()
    });
    let lots = row.get::<Option<String>, _>("lots").map(|s| {
        Decimal::from_str(&s).unwrap_or_else(|e| {
            warn!(lots = %s, error = %e, "Failed to parse entry lots decimal, using default");
            Decimal::default()
        })
    });
    let status_str: String = row.get("status");
    let status = EntryStatus::from_str(&status_str).unwrap_or_else(|_| {
        warn!(status = %status_str, "Unknown entry status, treating as FAILED");
        EntryStatus::Failed
    });
    let trigger = row
        .get::<Option<String>, _>("activation_trigger")
        .and_then(|s| ActivationTrigger::from_str(&s).ok());

    CommissionLedgerEntry {
        id: row.get("id"),
        beneficiary: UserId::new(row.get::<String, _>("beneficiary_id")),
        source: UserId::new(row.get::<String, _>("source_id")),
        period_or_trigger: row.get("period_or_trigger"),
        level: row.get::<i64, _>("level") as u32,
        rate,
        lots,
        amount: Decimal::from_cents(row.get("amount_cents")),
        status,
        batch_id: row.get("batch_id"),
        activation_trigger: trigger,
        created_at: TimeMs::new(row.get("created_at_ms")),
        credited_at: row.get::<Option<i64>, _>("credited_at_ms").map(TimeMs::new),
        reversed_at: row.get::<Option<i64>, _>("reversed_at_ms").map(TimeMs::new),
        reversed_by: row
            .get::<Option<String>, _>("reversed_by")
            .map(UserId::new),
        reversal_reason: row.get("reversal_reason"),
        error: row.get("error"),
    }
}
