//! Monthly batch payout engine.
//!
//! A run moves through SELECTING -> DISTRIBUTING -> CREDITING -> SETTLING.
//! Entry creation (DISTRIBUTING) and money movement (CREDITING) are separate
//! phases on purpose: inserts are idempotent and cheap to re-run, so a crash
//! between the two leaves PENDING entries that any later pass can finish
//! crediting. Per-trader failures are collected into the run's error list and
//! never abort the batch.

use crate::db::repo::{CreditOutcome, InsertOutcome, VolumeError};
use crate::db::Repository;
use crate::domain::{
    BatchRun, BatchRunStatus, CommissionSettings, NewCommissionEntry, PeriodKey, PeriodKeyError,
    TimeMs, VolumeAccumulator,
};
use crate::engine::upline::resolve_upline;
use crate::referral::ReferralDirectory;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PayoutError {
    #[error(transparent)]
    Period(#[from] PeriodKeyError),
    #[error(transparent)]
    Volume(#[from] VolumeError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Why a payout invocation did not execute. Both are expected outcomes of a
/// correctly scheduled system, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutSkip {
    Disabled,
    AlreadyProcessed(PeriodKey),
}

/// Result of a payout invocation: either a finished run or a skip reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutOutcome {
    pub run: Option<BatchRun>,
    pub skip: Option<PayoutSkip>,
}

impl PayoutOutcome {
    fn skipped(skip: PayoutSkip) -> Self {
        PayoutOutcome {
            run: None,
            skip: Some(skip),
        }
    }

    pub fn executed(&self) -> bool {
        self.run.is_some()
    }
}

/// Cooperative cancellation flag, checked between trader iterations.
/// Partially processed traders stay resumable because inserts are idempotent.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Computes and posts lot-rate commissions for one accumulation period.
pub struct BatchPayoutEngine {
    repo: Arc<Repository>,
    directory: Arc<dyn ReferralDirectory>,
}

impl BatchPayoutEngine {
    pub fn new(repo: Arc<Repository>, directory: Arc<dyn ReferralDirectory>) -> Self {
        Self { repo, directory }
    }

    /// Run the monthly payout for `target` (default: the month before `now`).
    ///
    /// Re-invoking for an already settled period is a reported no-op, and a
    /// concurrent duplicate invocation converges on one set of entries via
    /// the ledger's idempotency guard.
    pub async fn run_monthly_payout(
        &self,
        settings: &CommissionSettings,
        target: Option<PeriodKey>,
        now: TimeMs,
        cancel: &CancelToken,
    ) -> Result<PayoutOutcome, PayoutError> {
        if !settings.volume.enabled {
            return Ok(PayoutOutcome::skipped(PayoutSkip::Disabled));
        }

        let target = match target {
            Some(period) => period,
            None => PeriodKey::previous_of(now)?,
        };
        if settings.last_processed_period.as_ref() == Some(&target) {
            info!(period = %target, "Payout period already processed, skipping");
            return Ok(PayoutOutcome::skipped(PayoutSkip::AlreadyProcessed(target)));
        }

        let mut run = BatchRun::start(target.clone(), now);
        self.repo.insert_batch_run(&run).await?;
        info!(run_id = %run.id, period = %target, "Payout run started");

        let accumulators = self
            .repo
            .accumulators_for_payout(&target, settings.volume.min_lots)
            .await?;
        info!(run_id = %run.id, phase = "SELECTING", traders = accumulators.len(), "Selected volume accumulators");

        let mut cancelled = false;
        for accumulator in &accumulators {
            if cancel.is_cancelled() {
                warn!(run_id = %run.id, "Payout run cancelled between trader iterations");
                cancelled = true;
                break;
            }
            self.distribute_trader(settings, &target, accumulator, now, &mut run)
                .await;
            run.traders_processed += 1;
        }

        if settings.volume.auto_payout && !cancelled {
            self.credit_pending(&mut run, now).await?;
            let paid = self.repo.mark_accumulators_paid(&run.id).await?;
            info!(run_id = %run.id, phase = "CREDITING", paid, "Accumulators fully settled");
        }

        if !cancelled {
            self.repo.mark_period_processed(&target, now).await?;
            info!(run_id = %run.id, phase = "SETTLING", period = %target, "Period marker advanced");
        }

        run.finish(
            if cancelled {
                BatchRunStatus::Cancelled
            } else {
                BatchRunStatus::Completed
            },
            now,
        );
        self.repo.finalize_batch_run(&run).await?;
        info!(
            run_id = %run.id,
            traders = run.traders_processed,
            entries = run.entries_created,
            total = %run.total_amount,
            errors = run.errors.len(),
            "Payout run finished"
        );

        Ok(PayoutOutcome {
            run: Some(run),
            skip: None,
        })
    }

    /// Create this trader's per-level entries and consume the accumulator.
    ///
    /// Any failure is recorded into the run's error list; the accumulator is
    /// marked PROCESSED regardless, so a partially failed trader is never
    /// re-selected by the next run. Missed levels stay visible through the
    /// error list and FAILED entries.
    async fn distribute_trader(
        &self,
        settings: &CommissionSettings,
        target: &PeriodKey,
        accumulator: &VolumeAccumulator,
        now: TimeMs,
        run: &mut BatchRun,
    ) {
        let trader = &accumulator.user;

        match resolve_upline(self.directory.as_ref(), trader, settings.volume.max_levels).await {
            Ok(upline) => {
                for rung in &upline {
                    let rate = settings.volume.rates.rate_for_level(rung.level);
                    if !rate.is_positive() {
                        continue;
                    }
                    let amount = (accumulator.total_lots * rate).round_money();
                    if !amount.is_positive() {
                        continue;
                    }

                    let entry = NewCommissionEntry::batch(
                        rung.beneficiary.clone(),
                        trader.clone(),
                        target,
                        rung.level,
                        rate,
                        accumulator.total_lots,
                        amount,
                        run.id.clone(),
                        now,
                    );
                    match self.repo.insert_entry(&entry).await {
                        Ok(InsertOutcome::Inserted(_)) => {
                            run.entries_created += 1;
                            run.total_amount = run.total_amount + amount;
                        }
                        Ok(InsertOutcome::AlreadyExists) => {
                            // Left over from a prior partial run; this is
                            // what makes re-running a failed batch safe.
                            debug!(run_id = %run.id, trader = %trader, level = rung.level, "Entry already present, skipping");
                        }
                        Err(e) => {
                            run.record_error(
                                trader.clone(),
                                format!("level {}: {}", rung.level, e),
                            );
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(run_id = %run.id, trader = %trader, error = %e, "Upline resolution failed for trader");
                run.record_error(trader.clone(), e.to_string());
            }
        }

        if let Err(e) = self
            .repo
            .mark_accumulator_processed(trader, target, &run.id)
            .await
        {
            run.record_error(trader.clone(), format!("marking accumulator: {}", e));
        }
    }

    /// Credit every PENDING entry of this run. Failures flip the entry to
    /// FAILED instead of leaving it PENDING forever.
    async fn credit_pending(&self, run: &mut BatchRun, now: TimeMs) -> Result<(), PayoutError> {
        let pending = self.repo.pending_entries_for_batch(&run.id).await?;
        info!(run_id = %run.id, phase = "CREDITING", entries = pending.len(), "Crediting pending entries");

        for entry in pending {
            match self.repo.credit_entry(entry.id, now).await {
                Ok(CreditOutcome::Credited) => {}
                Ok(CreditOutcome::NotPending) => {
                    debug!(run_id = %run.id, entry_id = entry.id, "Entry no longer pending, skipping");
                }
                Err(e) => {
                    warn!(run_id = %run.id, entry_id = entry.id, error = %e, "Wallet crediting failed, marking entry FAILED");
                    if let Err(fail_err) = self.repo.fail_entry(entry.id, &e.to_string()).await {
                        warn!(run_id = %run.id, entry_id = entry.id, error = %fail_err, "Could not mark entry FAILED");
                    }
                    run.record_error(
                        entry.source.clone(),
                        format!("crediting level {}: {}", entry.level, e),
                    );
                }
            }
        }
        Ok(())
    }
}
