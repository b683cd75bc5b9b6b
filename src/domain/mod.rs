//! Domain types for the referral commission engine.
//!
//! This module provides:
//! - Lossless numeric handling via the Decimal wrapper
//! - Domain primitives: UserId, TimeMs, PeriodKey, ActivationTrigger
//! - Referral graph, volume, ledger, settings and batch-run entities

pub mod batch;
pub mod decimal;
pub mod ledger;
pub mod primitives;
pub mod referral;
pub mod settings;
pub mod volume;

pub use batch::{BatchErrorRecord, BatchRun, BatchRunStatus};
pub use decimal::Decimal;
pub use ledger::{BeneficiaryWallet, CommissionLedgerEntry, EntryStatus, NewCommissionEntry};
pub use primitives::{ActivationTrigger, PeriodKey, PeriodKeyError, TimeMs, UserId};
pub use referral::{AccountStatus, EdgeStatus, ReferralEdge, UplineLevel};
pub use settings::{CommissionSettings, InstantModeSettings, RateTable, VolumeModeSettings};
pub use volume::{AccumulatorStatus, TradeFact, VolumeAccumulator};
