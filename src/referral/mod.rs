//! Read-only access to the referral graph owned by the referral-management
//! collaborator.

use crate::domain::UserId;
use async_trait::async_trait;
use thiserror::Error;

pub mod mock;

pub use mock::MockReferralDirectory;

/// Lookup seam the upline resolver walks. Implemented by the SQL
/// repository in production and by [`MockReferralDirectory`] in tests.
#[async_trait]
pub trait ReferralDirectory: Send + Sync {
    /// The beneficiary of the single ACTIVE referral edge for `child`,
    /// if one exists.
    async fn active_referrer(&self, child: &UserId) -> Result<Option<UserId>, DirectoryError>;

    /// Whether the user's account is in ACTIVE standing. Unknown users are
    /// not active.
    async fn is_account_active(&self, user: &UserId) -> Result<bool, DirectoryError>;
}

/// Error type for referral directory lookups.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("referral lookup failed: {0}")]
    Other(String),
}
