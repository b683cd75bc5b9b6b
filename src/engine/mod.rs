//! Commission engines: deterministic distribution logic over the repository.
//!
//! Settings are passed into every call; engines hold no mutable state of
//! their own beyond the repository and directory handles.

pub mod batch;
pub mod instant;
pub mod upline;

pub use batch::{BatchPayoutEngine, CancelToken, PayoutError, PayoutOutcome, PayoutSkip};
pub use instant::{
    DistributionError, DistributionResult, InstantDistributor, LevelPayout, SkipReason,
};
pub use upline::{resolve_upline, UplineError};
