//! Commission settings and rate tables.
//!
//! Settings are owned by an admin collaborator and read-only to the engines,
//! except for the last-processed-period marker which the batch engine
//! advances. Engines receive a settings value loaded fresh per operation;
//! nothing in this crate reads settings through shared global state.

use crate::domain::{ActivationTrigger, Decimal, PeriodKey, TimeMs};
use serde::{Deserialize, Serialize};

/// Explicit integer level -> rate mapping. Level 1 is index 0; levels past
/// the end of the table pay nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RateTable {
    rates: Vec<Decimal>,
}

impl RateTable {
    pub fn new(rates: Vec<Decimal>) -> Self {
        RateTable { rates }
    }

    /// Rate (or flat amount) for a 1-based level. Zero beyond the table.
    pub fn rate_for_level(&self, level: u32) -> Decimal {
        if level == 0 {
            return Decimal::zero();
        }
        self.rates
            .get((level - 1) as usize)
            .copied()
            .unwrap_or_else(Decimal::zero)
    }

    /// Number of levels configured.
    pub fn levels(&self) -> u32 {
        self.rates.len() as u32
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, Decimal)> + '_ {
        self.rates
            .iter()
            .enumerate()
            .map(|(idx, rate)| (idx as u32 + 1, *rate))
    }
}

/// Settings for the per-activation flat commission mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantModeSettings {
    pub enabled: bool,
    /// When set, only this trigger qualifies; None accepts any trigger.
    pub required_trigger: Option<ActivationTrigger>,
    pub max_levels: u32,
    /// Flat per-level amounts.
    pub amounts: RateTable,
    /// Credit wallets at distribution time; otherwise entries stay PENDING.
    pub credit_immediately: bool,
}

impl Default for InstantModeSettings {
    fn default() -> Self {
        InstantModeSettings {
            enabled: false,
            required_trigger: None,
            max_levels: 0,
            amounts: RateTable::default(),
            credit_immediately: true,
        }
    }
}

/// Settings for the monthly volume commission mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeModeSettings {
    pub enabled: bool,
    pub max_levels: u32,
    /// Per-lot rates by level.
    pub rates: RateTable,
    /// Accumulators below this lot total are skipped by the batch run.
    pub min_lots: Decimal,
    /// Run CREDITING automatically after DISTRIBUTING; otherwise entries
    /// stay PENDING for operational tooling to credit.
    pub auto_payout: bool,
}

impl Default for VolumeModeSettings {
    fn default() -> Self {
        VolumeModeSettings {
            enabled: false,
            max_levels: 0,
            rates: RateTable::default(),
            min_lots: Decimal::zero(),
            auto_payout: true,
        }
    }
}

/// The full settings snapshot threaded into engine calls.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommissionSettings {
    pub instant: InstantModeSettings,
    pub volume: VolumeModeSettings,
    /// Last period a payout run settled. Guards against re-processing.
    pub last_processed_period: Option<PeriodKey>,
    pub last_payout_run_at: Option<TimeMs>,
}
