//! Domain primitives: UserId, TimeMs, PeriodKey, ActivationTrigger.

use chrono::{Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Opaque user identifier assigned by the identity subsystem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Create a UserId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    /// Get the id as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time. Engines never call this; callers supply it.
    pub fn now() -> Self {
        TimeMs(Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

/// Calendar-month bucket key, canonical form "YYYY-MM".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeriodKey(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodKeyError {
    #[error("invalid period key: {0:?} (expected YYYY-MM)")]
    Malformed(String),
    #[error("timestamp out of range: {0}")]
    OutOfRange(i64),
}

impl PeriodKey {
    /// Build a period key from a year and a 1-based month.
    pub fn from_year_month(year: i32, month: u32) -> Result<Self, PeriodKeyError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodKeyError::Malformed(format!("{:04}-{:02}", year, month)));
        }
        Ok(PeriodKey(format!("{:04}-{:02}", year, month)))
    }

    /// The UTC calendar month containing the given timestamp.
    pub fn from_time_ms(at: TimeMs) -> Result<Self, PeriodKeyError> {
        let Some(dt) = Utc.timestamp_millis_opt(at.as_i64()).single() else {
            return Err(PeriodKeyError::OutOfRange(at.as_i64()));
        };
        Self::from_year_month(dt.year(), dt.month())
    }

    /// The calendar month immediately before the one containing `now`.
    ///
    /// This is the default target of a monthly payout run.
    pub fn previous_of(now: TimeMs) -> Result<Self, PeriodKeyError> {
        let Some(dt) = Utc.timestamp_millis_opt(now.as_i64()).single() else {
            return Err(PeriodKeyError::OutOfRange(now.as_i64()));
        };
        let (year, month) = if dt.month() == 1 {
            (dt.year() - 1, 12)
        } else {
            (dt.year(), dt.month() - 1)
        };
        Self::from_year_month(year, month)
    }

    /// Get the key as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PeriodKey {
    type Err = PeriodKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PeriodKeyError::Malformed(s.to_string());
        let (year, month) = s.split_once('-').ok_or_else(malformed)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(malformed());
        }
        let year: i32 = year.parse().map_err(|_| malformed())?;
        let month: u32 = month.parse().map_err(|_| malformed())?;
        Self::from_year_month(year, month).map_err(|_| malformed())
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Activation event kind reported by the identity subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationTrigger {
    Registration,
    FirstDeposit,
    FirstTrade,
    KycApproved,
}

impl ActivationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationTrigger::Registration => "REGISTRATION",
            ActivationTrigger::FirstDeposit => "FIRST_DEPOSIT",
            ActivationTrigger::FirstTrade => "FIRST_TRADE",
            ActivationTrigger::KycApproved => "KYC_APPROVED",
        }
    }
}

impl FromStr for ActivationTrigger {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGISTRATION" => Ok(ActivationTrigger::Registration),
            "FIRST_DEPOSIT" => Ok(ActivationTrigger::FirstDeposit),
            "FIRST_TRADE" => Ok(ActivationTrigger::FirstTrade),
            "KYC_APPROVED" => Ok(ActivationTrigger::KycApproved),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ActivationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
