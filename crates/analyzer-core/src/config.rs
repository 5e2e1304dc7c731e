use serde::{Deserialize, Serialize};

use crate::types::{RegimeState, SetupType};

/// Engine-wide trading parameters. Every threshold in the system is a
/// static configuration constant; nothing is learned at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Total portfolio value in INR.
    pub portfolio_value: f64,
    /// Risk budget per trade as a fraction of portfolio value.
    pub risk_pct_per_trade: f64,
    pub max_positions: usize,
    pub max_sector_positions: usize,
    /// Maximum sector exposure as a fraction of portfolio value.
    pub max_sector_pct: f64,
    /// Maximum single-position value as a fraction of portfolio value.
    pub max_position_pct: f64,
    /// Maximum stop distance from mid-entry, fraction.
    pub max_stop_distance_pct: f64,
    /// Minimum S1 quality score for pipeline entry.
    pub min_quality_score: f64,
    /// Provider inter-call delay in milliseconds.
    pub fetch_delay_ms: u64,
    /// Bounded per-activity symbol concurrency.
    pub fetch_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            portfolio_value: 1_000_000.0,
            risk_pct_per_trade: 0.015,
            max_positions: 12,
            max_sector_positions: 3,
            max_sector_pct: 0.25,
            max_position_pct: 0.08,
            max_stop_distance_pct: 0.08,
            min_quality_score: 60.0,
            fetch_delay_ms: 300,
            fetch_concurrency: 8,
        }
    }
}

/// Regime-adaptive thresholds, produced once per run by the regime
/// classifier and injected into each scoring stage. No global mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    pub regime: RegimeState,
    /// Minimum fraction of positive weeks (S3).
    pub pos_pct_min: f64,
    /// Acceptable band for the +3% week fraction (S3).
    pub plus3_pct_min: f64,
    pub plus3_pct_max: f64,
    /// Maximum weekly standard deviation (S3), fraction.
    pub std_dev_max: f64,
    pub sharpe_min: f64,
    /// Minimum reward:risk to target 1 (S4B/S5).
    pub rr_floor: f64,
    /// Fraction of the portfolio kept in cash (S6).
    pub cash_reserve_pct: f64,
    /// Position-size scalar.
    pub multiplier: f64,
    /// Setup types the detector may emit under this regime.
    pub allowed_setups: Vec<SetupType>,
}

impl Thresholds {
    /// Canonical thresholds for a regime state. The classifier may lower
    /// `multiplier` to 0.7 for weak-trend RISK_ON weeks.
    pub fn for_regime(regime: RegimeState) -> Self {
        let all = vec![
            SetupType::Pullback,
            SetupType::VcpBreakout,
            SetupType::Retest,
            SetupType::GapFill,
        ];
        match regime {
            RegimeState::RiskOn => Self {
                regime,
                pos_pct_min: 0.60,
                plus3_pct_min: 0.22,
                plus3_pct_max: 0.40,
                std_dev_max: 0.065,
                sharpe_min: 0.12,
                rr_floor: 2.0,
                cash_reserve_pct: 0.30,
                multiplier: 1.0,
                allowed_setups: all,
            },
            RegimeState::Choppy => Self {
                regime,
                pos_pct_min: 0.65,
                plus3_pct_min: 0.25,
                plus3_pct_max: 0.35,
                std_dev_max: 0.060,
                sharpe_min: 0.15,
                rr_floor: 2.5,
                cash_reserve_pct: 0.35,
                multiplier: 0.5,
                allowed_setups: vec![SetupType::Pullback],
            },
            RegimeState::RiskOff => Self {
                regime,
                pos_pct_min: 0.70,
                plus3_pct_min: 0.20,
                plus3_pct_max: 0.30,
                std_dev_max: 0.045,
                sharpe_min: 0.18,
                rr_floor: 2.5,
                cash_reserve_pct: 1.0,
                multiplier: 0.0,
                allowed_setups: vec![],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choppy_allows_only_pullbacks() {
        let t = Thresholds::for_regime(RegimeState::Choppy);
        assert_eq!(t.allowed_setups, vec![SetupType::Pullback]);
        assert_eq!(t.rr_floor, 2.5);
        assert_eq!(t.multiplier, 0.5);
    }

    #[test]
    fn risk_off_zeroes_the_book() {
        let t = Thresholds::for_regime(RegimeState::RiskOff);
        assert!(t.allowed_setups.is_empty());
        assert_eq!(t.multiplier, 0.0);
        assert_eq!(t.cash_reserve_pct, 1.0);
    }
}
