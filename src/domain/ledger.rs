//! Commission ledger types. One entry is one immutable unit of payment;
//! the composite (beneficiary, source, period-or-trigger, level) key is the
//! idempotency guard against double crediting.

use crate::domain::{ActivationTrigger, Decimal, PeriodKey, TimeMs, UserId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Payment lifecycle of a ledger entry. REVERSED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    /// Created, money not yet moved.
    Pending,
    /// Settled into the beneficiary wallet.
    Credited,
    /// Wallet crediting failed; needs reconciliation.
    Failed,
    /// Deliberately undone by an operator.
    Reversed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "PENDING",
            EntryStatus::Credited => "CREDITED",
            EntryStatus::Failed => "FAILED",
            EntryStatus::Reversed => "REVERSED",
        }
    }
}

impl FromStr for EntryStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(EntryStatus::Pending),
            "CREDITED" => Ok(EntryStatus::Credited),
            "FAILED" => Ok(EntryStatus::Failed),
            "REVERSED" => Ok(EntryStatus::Reversed),
            _ => Err(()),
        }
    }
}

/// A commission entry staged for insertion. The amount must already be
/// rounded to two decimal places.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommissionEntry {
    pub beneficiary: UserId,
    /// Trader id in batch mode, newly activated user id in instant mode.
    pub source: UserId,
    /// Period key ("YYYY-MM") in batch mode, trigger name in instant mode.
    pub period_or_trigger: String,
    pub level: u32,
    pub rate: Decimal,
    /// Lot volume the amount was computed from (batch mode only).
    pub lots: Option<Decimal>,
    pub amount: Decimal,
    pub batch_id: Option<String>,
    pub activation_trigger: Option<ActivationTrigger>,
    pub created_at: TimeMs,
}

impl NewCommissionEntry {
    /// Stage a lot-rate commission produced by a batch run.
    pub fn batch(
        beneficiary: UserId,
        trader: UserId,
        period: &PeriodKey,
        level: u32,
        rate: Decimal,
        lots: Decimal,
        amount: Decimal,
        batch_id: String,
        created_at: TimeMs,
    ) -> Self {
        NewCommissionEntry {
            beneficiary,
            source: trader,
            period_or_trigger: period.as_str().to_string(),
            level,
            rate,
            lots: Some(lots),
            amount,
            batch_id: Some(batch_id),
            activation_trigger: None,
            created_at,
        }
    }

    /// Stage a flat activation commission produced by the instant distributor.
    pub fn instant(
        beneficiary: UserId,
        activated_user: UserId,
        trigger: ActivationTrigger,
        level: u32,
        amount: Decimal,
        created_at: TimeMs,
    ) -> Self {
        NewCommissionEntry {
            beneficiary,
            source: activated_user,
            period_or_trigger: trigger.as_str().to_string(),
            level,
            rate: amount,
            lots: None,
            amount,
            batch_id: None,
            activation_trigger: Some(trigger),
            created_at,
        }
    }
}

/// A persisted ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionLedgerEntry {
    pub id: i64,
    pub beneficiary: UserId,
    pub source: UserId,
    pub period_or_trigger: String,
    pub level: u32,
    pub rate: Decimal,
    pub lots: Option<Decimal>,
    pub amount: Decimal,
    pub status: EntryStatus,
    pub batch_id: Option<String>,
    pub activation_trigger: Option<ActivationTrigger>,
    pub created_at: TimeMs,
    pub credited_at: Option<TimeMs>,
    pub reversed_at: Option<TimeMs>,
    pub reversed_by: Option<UserId>,
    pub reversal_reason: Option<String>,
    /// Failure message when status is FAILED.
    pub error: Option<String>,
}

/// Wallet balances; mutated only by the ledger credit/debit primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BeneficiaryWallet {
    pub balance_cents: i64,
    pub total_earned_cents: i64,
}

impl BeneficiaryWallet {
    pub fn balance(&self) -> Decimal {
        Decimal::from_cents(self.balance_cents)
    }

    pub fn total_earned(&self) -> Decimal {
        Decimal::from_cents(self.total_earned_cents)
    }
}
