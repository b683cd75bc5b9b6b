//! Batch payout run audit record.

use crate::domain::{Decimal, PeriodKey, TimeMs, UserId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchRunStatus {
    Running,
    Completed,
    Cancelled,
}

impl BatchRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchRunStatus::Running => "RUNNING",
            BatchRunStatus::Completed => "COMPLETED",
            BatchRunStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for BatchRunStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(BatchRunStatus::Running),
            "COMPLETED" => Ok(BatchRunStatus::Completed),
            "CANCELLED" => Ok(BatchRunStatus::Cancelled),
            _ => Err(()),
        }
    }
}

/// One per-trader failure captured during a run. The batch continues past
/// these; they are audit data, not control flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchErrorRecord {
    pub source: UserId,
    pub message: String,
}

/// One execution of the monthly payout job. Created when the run starts,
/// appended to during execution, immutable once finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRun {
    pub id: String,
    pub target_period: PeriodKey,
    pub status: BatchRunStatus,
    pub started_at: TimeMs,
    pub finished_at: Option<TimeMs>,
    pub traders_processed: i64,
    pub entries_created: i64,
    pub total_amount: Decimal,
    pub errors: Vec<BatchErrorRecord>,
}

impl BatchRun {
    /// Open a new run for the given period.
    pub fn start(target_period: PeriodKey, now: TimeMs) -> Self {
        BatchRun {
            id: Uuid::new_v4().to_string(),
            target_period,
            status: BatchRunStatus::Running,
            started_at: now,
            finished_at: None,
            traders_processed: 0,
            entries_created: 0,
            total_amount: Decimal::zero(),
            errors: Vec::new(),
        }
    }

    /// Record a per-trader failure and keep going.
    pub fn record_error(&mut self, source: UserId, message: impl Into<String>) {
        self.errors.push(BatchErrorRecord {
            source,
            message: message.into(),
        });
    }

    /// Close the run.
    pub fn finish(&mut self, status: BatchRunStatus, now: TimeMs) {
        self.status = status;
        self.finished_at = Some(now);
    }
}
