//! Referral graph types. Edges are written by the referral-management
//! collaborator and read-only to the commission engines.

use crate::domain::{TimeMs, UserId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Status of a referral edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeStatus {
    Active,
    Inactive,
}

impl EdgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeStatus::Active => "ACTIVE",
            EdgeStatus::Inactive => "INACTIVE",
        }
    }
}

impl FromStr for EdgeStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(EdgeStatus::Active),
            "INACTIVE" => Ok(EdgeStatus::Inactive),
            _ => Err(()),
        }
    }
}

/// Account standing as reported by the identity subsystem. Only ACTIVE
/// accounts participate in an upline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Suspended,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Suspended => "SUSPENDED",
            AccountStatus::Closed => "CLOSED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AccountStatus::Active)
    }
}

impl FromStr for AccountStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(AccountStatus::Active),
            "SUSPENDED" => Ok(AccountStatus::Suspended),
            "CLOSED" => Ok(AccountStatus::Closed),
            _ => Err(()),
        }
    }
}

/// "child was referred by beneficiary". At most one ACTIVE edge per child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralEdge {
    pub child: UserId,
    pub beneficiary: UserId,
    pub status: EdgeStatus,
    pub created_at: TimeMs,
}

/// One rung of a resolved upline; level 1 is the direct referrer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplineLevel {
    pub beneficiary: UserId,
    pub level: u32,
}
