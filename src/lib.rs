pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod referral;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    ActivationTrigger, BatchRun, CommissionLedgerEntry, CommissionSettings, Decimal, EntryStatus,
    PeriodKey, TimeMs, TradeFact, UserId,
};
pub use engine::{BatchPayoutEngine, CancelToken, InstantDistributor};
pub use error::AppError;
pub use referral::{MockReferralDirectory, ReferralDirectory};
