//! Mock referral directory for tests; no database required.

use super::{DirectoryError, ReferralDirectory};
use crate::domain::UserId;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Mock directory built from fixture edges. Accounts referenced as a
/// beneficiary are ACTIVE unless marked otherwise; lookups can be made to
/// fail per user to exercise error paths.
#[derive(Debug, Clone, Default)]
pub struct MockReferralDirectory {
    edges: HashMap<UserId, UserId>,
    inactive_accounts: HashSet<UserId>,
    failing_users: HashSet<UserId>,
}

impl MockReferralDirectory {
    /// Create an empty mock directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an ACTIVE edge: `child` was referred by `beneficiary`.
    pub fn with_edge(mut self, child: impl Into<String>, beneficiary: impl Into<String>) -> Self {
        self.edges
            .insert(UserId::new(child), UserId::new(beneficiary));
        self
    }

    /// Mark an account as not ACTIVE.
    pub fn with_inactive_account(mut self, user: impl Into<String>) -> Self {
        self.inactive_accounts.insert(UserId::new(user));
        self
    }

    /// Make lookups for this child fail with a directory error.
    pub fn with_failing_lookup(mut self, child: impl Into<String>) -> Self {
        self.failing_users.insert(UserId::new(child));
        self
    }
}

#[async_trait]
impl ReferralDirectory for MockReferralDirectory {
    async fn active_referrer(&self, child: &UserId) -> Result<Option<UserId>, DirectoryError> {
        if self.failing_users.contains(child) {
            return Err(DirectoryError::Other(format!(
                "injected failure for {}",
                child
            )));
        }
        Ok(self.edges.get(child).cloned())
    }

    async fn is_account_active(&self, user: &UserId) -> Result<bool, DirectoryError> {
        Ok(!self.inactive_accounts.contains(user))
    }
}
