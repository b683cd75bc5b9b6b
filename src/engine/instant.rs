//! Instant commission distribution on activation events.
//!
//! Preconditions are checked in a fixed order and short-circuit into a
//! `processed = false` result; those are expected business outcomes, not
//! errors. The UNIQUE ledger key makes a retried call converge on the same
//! single set of entries.

use crate::db::repo::{CreditOutcome, InsertOutcome, LedgerError};
use crate::db::Repository;
use crate::domain::{
    ActivationTrigger, CommissionSettings, Decimal, NewCommissionEntry, TimeMs, UserId,
};
use crate::engine::upline::{resolve_upline, UplineError};
use crate::referral::ReferralDirectory;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error(transparent)]
    Upline(#[from] UplineError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Why an activation produced no distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    TriggerMismatch,
    AlreadyDistributed,
    NoUpline,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Disabled => "DISABLED",
            SkipReason::TriggerMismatch => "TRIGGER_MISMATCH",
            SkipReason::AlreadyDistributed => "ALREADY_DISTRIBUTED",
            SkipReason::NoUpline => "NO_UPLINE",
        }
    }
}

/// One beneficiary's share of a distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelPayout {
    pub level: u32,
    pub beneficiary: UserId,
    pub amount: Decimal,
}

/// Outcome of a distribution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionResult {
    pub processed: bool,
    pub reason: Option<SkipReason>,
    pub commissions_created: u32,
    pub total_distributed: Decimal,
    pub per_level: Vec<LevelPayout>,
}

impl DistributionResult {
    fn skipped(reason: SkipReason) -> Self {
        DistributionResult {
            processed: false,
            reason: Some(reason),
            commissions_created: 0,
            total_distributed: Decimal::zero(),
            per_level: Vec::new(),
        }
    }
}

/// Distributes flat per-level amounts up the upline when a user activates.
pub struct InstantDistributor {
    repo: Arc<Repository>,
    directory: Arc<dyn ReferralDirectory>,
}

impl InstantDistributor {
    pub fn new(repo: Arc<Repository>, directory: Arc<dyn ReferralDirectory>) -> Self {
        Self { repo, directory }
    }

    /// Distribute activation commissions for `new_user`, exactly once.
    pub async fn distribute_activation(
        &self,
        settings: &CommissionSettings,
        new_user: &UserId,
        trigger: ActivationTrigger,
        now: TimeMs,
    ) -> Result<DistributionResult, DistributionError> {
        if !settings.instant.enabled {
            return Ok(DistributionResult::skipped(SkipReason::Disabled));
        }
        if let Some(required) = settings.instant.required_trigger {
            if required != trigger {
                debug!(user = %new_user, %trigger, %required, "Activation trigger does not qualify");
                return Ok(DistributionResult::skipped(SkipReason::TriggerMismatch));
            }
        }
        // Optimization only; the UNIQUE ledger key is the authoritative guard.
        if self.repo.has_activation_entries(new_user).await? {
            return Ok(DistributionResult::skipped(SkipReason::AlreadyDistributed));
        }

        let upline =
            resolve_upline(self.directory.as_ref(), new_user, settings.instant.max_levels).await?;
        if upline.is_empty() {
            return Ok(DistributionResult::skipped(SkipReason::NoUpline));
        }

        let mut result = DistributionResult {
            processed: true,
            reason: None,
            commissions_created: 0,
            total_distributed: Decimal::zero(),
            per_level: Vec::new(),
        };

        for rung in &upline {
            let amount = settings
                .instant
                .amounts
                .rate_for_level(rung.level)
                .round_money();
            if !amount.is_positive() {
                continue;
            }

            let entry = NewCommissionEntry::instant(
                rung.beneficiary.clone(),
                new_user.clone(),
                trigger,
                rung.level,
                amount,
                now,
            );
            let entry_id = match self.repo.insert_entry(&entry).await? {
                InsertOutcome::Inserted(id) => id,
                // A retried call already created this level; keep going.
                InsertOutcome::AlreadyExists => continue,
            };
            result.commissions_created += 1;

            if settings.instant.credit_immediately {
                match self.repo.credit_entry(entry_id, now).await {
                    Ok(CreditOutcome::Credited) | Ok(CreditOutcome::NotPending) => {}
                    Err(e) => {
                        // The entry stays discoverable as FAILED for
                        // reconciliation; the money was never moved.
                        warn!(entry_id, beneficiary = %rung.beneficiary, error = %e, "Wallet crediting failed, marking entry FAILED");
                        self.repo.fail_entry(entry_id, &e.to_string()).await?;
                        continue;
                    }
                }
            }

            result.total_distributed = result.total_distributed + amount;
            result.per_level.push(LevelPayout {
                level: rung.level,
                beneficiary: rung.beneficiary.clone(),
                amount,
            });
        }

        info!(
            user = %new_user,
            %trigger,
            created = result.commissions_created,
            total = %result.total_distributed,
            "Activation commissions distributed"
        );
        Ok(result)
    }
}
