//! Stage output records.
//!
//! Each pipeline stage writes its own record variant; all share the
//! `(symbol, week, calculated_at)` header so reruns upsert in place.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    GapAction, PositionState, QualityTier, RecommendationStatus, RegimeState, SetupType,
    StopMethod,
};
use crate::HealthAction;

/// Stock master record produced by the universe stage (S1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockRecord {
    pub symbol: String,
    pub name: String,
    pub isin: String,
    pub sector: String,
    pub lot_size: u32,
    pub tick_size: f64,
    pub is_mtf: bool,
    pub in_nifty_50: bool,
    pub in_nifty_100: bool,
    pub in_nifty_200: bool,
    pub in_nifty_500: bool,
    pub quality_score: f64,
    pub tier: QualityTier,
    pub active: bool,
    #[serde(default)]
    pub fundamental_score: Option<f64>,
    pub calculated_at: DateTime<Utc>,
}

/// Momentum stage output (S2): five-filter gate plus composite score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumScore {
    pub symbol: String,
    pub week: NaiveDate,

    // Filter 2A: 52-week proximity
    pub proximity_52w: f64,
    pub high_52w: f64,
    pub close: f64,
    pub volume_surge: f64,
    pub filter_2a_pass: bool,

    // Filter 2B: MA alignment
    pub ma_alignment_score: u8,
    pub slope_sma_20: f64,
    pub slope_sma_50: f64,
    pub slope_sma_200: f64,
    pub filter_2b_pass: bool,

    // Filter 2C: relative strength vs Nifty (fractions)
    pub rs_1m: f64,
    pub rs_3m: f64,
    pub rs_6m: f64,
    pub rs_horizons_passed: u8,
    pub filter_2c_pass: bool,

    // Filter 2D: composite
    pub score: f64,
    pub filter_2d_pass: bool,

    // Filter 2E: volatility ratio
    pub volatility_ratio: f64,
    pub filter_2e_pass: bool,

    pub filters_passed: u8,
    pub qualifies: bool,
    pub calculated_at: DateTime<Utc>,
}

/// Regime sub-scores, each 0-100, equally weighted into the composite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegimeSubscores {
    pub trend: f64,
    pub breadth: f64,
    pub volatility: f64,
    pub leadership: f64,
}

impl RegimeSubscores {
    pub fn composite(&self) -> f64 {
        (self.trend + self.breadth + self.volatility + self.leadership) / 4.0
    }
}

/// Weekly market regime assessment (C5). Gates the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeAssessment {
    pub week: NaiveDate,
    pub state: RegimeState,
    pub composite: f64,
    pub confidence: f64,
    pub subscores: RegimeSubscores,
    /// Position-size scalar in {0, 0.5, 0.7, 1.0}.
    pub multiplier: f64,
    pub reasoning: String,
    pub calculated_at: DateTime<Utc>,
}

/// Consistency stage output (S3): weekly-return behavior over 52/26/13 weeks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyScore {
    pub symbol: String,
    pub week: NaiveDate,

    // 52-week core metrics (fractions)
    pub pos_pct: f64,
    pub plus3_pct: f64,
    pub plus5_pct: f64,
    pub avg_return: f64,
    pub std_dev: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_win_streak: u32,

    // Recent windows
    pub pos_pct_26w: f64,
    pub avg_return_13w: f64,

    pub consistency_score: f64,
    pub regime_score: f64,
    pub percentile: f64,
    pub final_score: f64,

    /// One-sided binomial p-value for posPct > 0.5.
    pub binomial_p: f64,
    pub significant: bool,

    pub filters_passed: u8,
    pub qualifies: bool,
    pub market_regime: RegimeState,
    pub calculated_at: DateTime<Utc>,
}

/// Liquidity stage output (S4A).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityScore {
    pub symbol: String,
    pub week: NaiveDate,
    /// Turnover figures in INR crores.
    pub turnover_20d_cr: f64,
    pub turnover_60d_cr: f64,
    pub peak_turnover_30d_cr: f64,
    pub volume_stability: f64,
    pub circuit_hits_30d: u32,
    pub avg_gap_pct: f64,
    pub score: f64,
    pub qualifies: bool,
    pub calculated_at: DateTime<Utc>,
}

/// Trade setup emitted by the pattern detector (S4B). At most one per symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSetup {
    pub symbol: String,
    pub week: NaiveDate,
    pub setup_type: SetupType,
    pub close: f64,
    pub entry_low: f64,
    pub entry_high: f64,
    pub stop: f64,
    pub stop_method: StopMethod,
    pub stop_distance_pct: f64,
    pub target_1: f64,
    pub target_2: f64,
    pub rr: f64,
    pub conditions_met: u8,
    pub confidence: f64,
    /// 0.25 each of momentum, consistency, liquidity, confidence.
    pub quality_composite: f64,
    pub calculated_at: DateTime<Utc>,
}

impl TradeSetup {
    pub fn mid_entry(&self) -> f64 {
        (self.entry_low + self.entry_high) / 2.0
    }

    pub fn risk_per_share(&self) -> f64 {
        self.mid_entry() - self.stop
    }
}

/// Position sizing output (S5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSize {
    pub symbol: String,
    pub week: NaiveDate,
    pub setup_type: SetupType,
    pub sector: String,
    pub mid_entry: f64,
    pub stop: f64,
    pub stop_method: StopMethod,
    pub risk_per_share: f64,
    pub base_shares: u64,
    pub vol_adjustment: f64,
    pub kelly_fraction: f64,
    pub regime_multiplier: f64,
    pub final_shares: u64,
    pub position_value: f64,
    pub final_risk: f64,
    pub position_pct: f64,
    pub quality_composite: f64,
    pub qualifies: bool,
    pub calculated_at: DateTime<Utc>,
}

/// A selected portfolio slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioPosition {
    pub rank: u32,
    pub symbol: String,
    pub sector: String,
    pub setup_type: SetupType,
    pub entry_low: f64,
    pub entry_high: f64,
    pub stop: f64,
    pub target_1: f64,
    pub target_2: f64,
    pub rr: f64,
    pub shares: u64,
    pub position_value: f64,
    pub risk_amount: f64,
    pub position_pct: f64,
    pub quality_composite: f64,
}

/// Weekly portfolio allocation (S6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioAllocation {
    pub week: NaiveDate,
    pub regime_state: RegimeState,
    pub positions: Vec<PortfolioPosition>,
    /// Sector -> percent of portfolio value.
    pub sector_allocation: std::collections::BTreeMap<String, f64>,
    pub allocated_pct: f64,
    pub cash_pct: f64,
    pub total_risk_pct: f64,
    pub correlation_filtered: u32,
    pub sector_filtered: u32,
    pub status: RecommendationStatus,
    /// Populated when the allocation is empty (RISK_OFF, starvation).
    #[serde(default)]
    pub reason: Option<String>,
    pub calculated_at: DateTime<Utc>,
}

/// Per-symbol recommendation card (S8 output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCard {
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub week: NaiveDate,
    pub setup_type: SetupType,

    // Phase scores, 0-100
    pub momentum_score: f64,
    pub consistency_score: f64,
    pub liquidity_score: f64,
    #[serde(default)]
    pub fundamental_score: Option<f64>,
    pub setup_confidence: f64,
    pub conviction: f64,
    pub conviction_label: String,

    // Technical context
    pub current_price: f64,
    pub high_52w: f64,
    pub sma_20: f64,
    pub sma_50: f64,
    pub sma_200: f64,
    pub atr_14: f64,

    // Levels
    pub entry_low: f64,
    pub entry_high: f64,
    pub stop: f64,
    pub stop_method: StopMethod,
    pub target_1: f64,
    pub target_2: f64,
    pub rr: f64,

    // Sizing
    pub shares: u64,
    pub investment: f64,
    pub risk_amount: f64,
    pub position_pct: f64,

    pub action_steps: Vec<String>,
    pub gap_contingency: String,
    pub invalidation: Vec<String>,
}

/// Weekly recommendation document joining all cards (S8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyRecommendation {
    pub week: NaiveDate,
    pub market_regime: RegimeState,
    pub regime_confidence: f64,
    pub position_multiplier: f64,
    pub total_setups: u32,
    pub cards: Vec<TradeCard>,
    pub allocated_capital: f64,
    pub allocated_pct: f64,
    pub total_risk_pct: f64,
    /// Kept/filtered counts per stage for the funnel readout.
    pub funnel: FunnelCounts,
    pub status: RecommendationStatus,
    #[serde(default)]
    pub fatal_reasons: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Symbol counts surviving each stage of a weekly run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunnelCounts {
    pub universe: u32,
    pub momentum_qualified: u32,
    pub consistency_qualified: u32,
    pub liquidity_qualified: u32,
    pub setups_detected: u32,
    pub size_qualified: u32,
    pub portfolio_positions: u32,
}

/// Closed or open trade outcome tracked by the execution stage; feeds the
/// rolling Kelly statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub symbol: String,
    pub week: NaiveDate,
    pub entry_price: f64,
    pub stop: f64,
    pub shares: u64,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub exit_date: Option<NaiveDate>,
    pub pnl: f64,
    pub r_multiple: f64,
    /// "open", "closed_win", "closed_loss", "skipped".
    pub status: String,
    pub calculated_at: DateTime<Utc>,
}

/// Monday-open gap decision for one position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapDecision {
    pub symbol: String,
    pub week: NaiveDate,
    pub open_price: f64,
    pub gap_pct: f64,
    pub action: GapAction,
    pub reason: String,
}

/// Intraweek position status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionStatus {
    pub symbol: String,
    pub state: PositionState,
    pub current_price: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub r_multiple: f64,
    pub alerts: Vec<String>,
}

/// Friday close summary with the system health verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FridaySummary {
    pub week: NaiveDate,
    pub closed_trades: u32,
    pub open_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub weekly_r_sum: f64,
    pub health: SystemHealth,
    pub calculated_at: DateTime<Utc>,
}

/// System health score and recommended action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub score: f64,
    pub win_rate_12w: f64,
    pub expectancy_12w: f64,
    pub drawdown_pct: f64,
    pub execution_score: f64,
    pub action: HealthAction,
}

/// Rolling outcome statistics consumed by the Kelly sizing step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OutcomeStats {
    pub win_rate: f64,
    pub avg_win_r: f64,
    pub avg_loss_r: f64,
    pub sample_size: u32,
}

impl OutcomeStats {
    /// Conservative prior used until 20 closed trades accumulate.
    pub fn prior() -> Self {
        Self {
            win_rate: 0.50,
            avg_win_r: 1.2,
            avg_loss_r: 1.1,
            sample_size: 0,
        }
    }
}
