//! Upline resolution: walk the referral-parent chain, nearest-first.

use crate::domain::{UplineLevel, UserId};
use crate::referral::{DirectoryError, ReferralDirectory};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UplineError {
    /// A cycle in the referral graph. Edges are maintained upstream and must
    /// be acyclic; hitting this means the graph is corrupt, so the operation
    /// aborts instead of paying along a bogus chain.
    #[error("referral chain for {user} revisits {repeated}")]
    IntegrityCycle { user: UserId, repeated: UserId },
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Resolve up to `max_levels` beneficiaries above `user`; level 1 is the
/// direct referrer.
///
/// A missing edge or a non-ACTIVE beneficiary account ends the walk early;
/// short (or empty) chains are valid results, not errors.
pub async fn resolve_upline(
    directory: &dyn ReferralDirectory,
    user: &UserId,
    max_levels: u32,
) -> Result<Vec<UplineLevel>, UplineError> {
    let mut chain = Vec::new();
    let mut seen: HashSet<UserId> = HashSet::from([user.clone()]);
    let mut current = user.clone();

    for level in 1..=max_levels {
        let Some(beneficiary) = directory.active_referrer(&current).await? else {
            break;
        };
        if !seen.insert(beneficiary.clone()) {
            return Err(UplineError::IntegrityCycle {
                user: user.clone(),
                repeated: beneficiary,
            });
        }
        if !directory.is_account_active(&beneficiary).await? {
            break;
        }
        chain.push(UplineLevel {
            beneficiary: beneficiary.clone(),
            level,
        });
        current = beneficiary;
    }

    Ok(chain)
}
