//! Trade volume types: incoming trade facts and per-period accumulators.

use crate::domain::{Decimal, PeriodKey, TimeMs, UserId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A closed-trade fact pushed by the trading subsystem.
///
/// Facts arrive already validated upstream; the engine only re-checks what
/// it depends on (positive lot volume, representable precision).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeFact {
    /// Stable unique identifier for this fact.
    pub fact_key: String,
    pub user: UserId,
    pub symbol: String,
    /// Lot volume of the closed trade.
    pub lots: Decimal,
    /// Notional value of the closed trade.
    pub notional: Decimal,
    /// Upstream trade id (preferred stable key).
    pub trade_id: Option<i64>,
    pub closed_at: TimeMs,
}

impl TradeFact {
    /// Create a new TradeFact with a computed stable key.
    pub fn new(
        user: UserId,
        symbol: impl Into<String>,
        lots: Decimal,
        notional: Decimal,
        trade_id: Option<i64>,
        closed_at: TimeMs,
    ) -> Self {
        let symbol = symbol.into();
        let fact_key = Self::compute_fact_key(&user, &symbol, &lots, &notional, trade_id, closed_at);
        TradeFact {
            fact_key,
            user,
            symbol,
            lots,
            notional,
            trade_id,
            closed_at,
        }
    }

    /// Generate a stable unique key for this fact.
    ///
    /// Priority: `trade_id` (if present) > hash of deterministic fields.
    pub fn compute_fact_key(
        user: &UserId,
        symbol: &str,
        lots: &Decimal,
        notional: &Decimal,
        trade_id: Option<i64>,
        closed_at: TimeMs,
    ) -> String {
        if let Some(trade_id) = trade_id {
            return format!("trade:{}", trade_id);
        }

        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(user.as_str());
        hasher.update(symbol);
        hasher.update(lots.to_canonical_string());
        hasher.update(notional.to_canonical_string());
        hasher.update(closed_at.as_i64().to_le_bytes());
        format!("hash:{}", hex::encode(hasher.finalize()))
    }
}

/// Lifecycle of a per-period volume bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccumulatorStatus {
    /// Still accepting increments from incoming trade facts.
    Accumulating,
    /// Consumed by a batch run; rejects further increments.
    Processed,
    /// All batch entries for this bucket were credited.
    Paid,
}

impl AccumulatorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccumulatorStatus::Accumulating => "ACCUMULATING",
            AccumulatorStatus::Processed => "PROCESSED",
            AccumulatorStatus::Paid => "PAID",
        }
    }
}

impl FromStr for AccumulatorStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACCUMULATING" => Ok(AccumulatorStatus::Accumulating),
            "PROCESSED" => Ok(AccumulatorStatus::Processed),
            "PAID" => Ok(AccumulatorStatus::Paid),
            _ => Err(()),
        }
    }
}

/// Running per-(user, period) aggregate of trading volume. Append-only:
/// rows transition status but are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAccumulator {
    pub user: UserId,
    pub period: PeriodKey,
    pub total_lots: Decimal,
    pub total_trades: i64,
    pub total_notional: Decimal,
    pub status: AccumulatorStatus,
    /// Weak reference to the fact that last touched this bucket.
    pub last_fact_key: Option<String>,
    /// Stamped when a batch run consumes this bucket.
    pub batch_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn lots(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_fact_key_prefers_trade_id() {
        let fact = TradeFact::new(
            UserId::new("u1"),
            "EURUSD",
            lots("0.5"),
            lots("55000"),
            Some(991),
            TimeMs::new(1000),
        );
        assert_eq!(fact.fact_key, "trade:991");
    }

    #[test]
    fn test_fact_key_hash_is_deterministic() {
        let make = || {
            TradeFact::new(
                UserId::new("u1"),
                "EURUSD",
                lots("0.5"),
                lots("55000"),
                None,
                TimeMs::new(1000),
            )
        };
        let a = make();
        let b = make();
        assert!(a.fact_key.starts_with("hash:"));
        assert_eq!(a.fact_key, b.fact_key);
    }

    #[test]
    fn test_fact_key_hash_differs_by_field() {
        let a = TradeFact::new(
            UserId::new("u1"),
            "EURUSD",
            lots("0.5"),
            lots("55000"),
            None,
            TimeMs::new(1000),
        );
        let b = TradeFact::new(
            UserId::new("u1"),
            "EURUSD",
            lots("0.6"),
            lots("55000"),
            None,
            TimeMs::new(1000),
        );
        assert_ne!(a.fact_key, b.fact_key);
    }

    #[test]
    fn test_accumulator_status_roundtrip() {
        for status in [
            AccumulatorStatus::Accumulating,
            AccumulatorStatus::Processed,
            AccumulatorStatus::Paid,
        ] {
            assert_eq!(status.as_str().parse::<AccumulatorStatus>(), Ok(status));
        }
    }
}
