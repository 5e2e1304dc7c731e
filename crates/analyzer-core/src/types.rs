use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Daily OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Turnover in INR (close * volume).
    pub fn turnover(&self) -> f64 {
        self.close * self.volume
    }
}

/// Weekly bar resampled from daily bars (ISO week, Monday-Friday).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyBar {
    /// Monday of the ISO week.
    pub week_start: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Close-over-close return vs the prior week, absent for the first bar.
    #[serde(default)]
    pub weekly_return: Option<f64>,
}

/// Technical indicator snapshot for a symbol, computed locally from daily
/// bars (provider indicator feeds drift between sources).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub close: f64,
    pub sma_20: f64,
    pub sma_50: f64,
    pub sma_200: f64,
    /// Per-day fractional slope over the MA's own window.
    pub slope_sma_20: f64,
    pub slope_sma_50: f64,
    pub slope_sma_200: f64,
    pub atr_14: f64,
    pub rsi_14: f64,
    pub macd_hist: f64,
    pub macd_hist_prev: f64,
    pub avg_volume_20: f64,
    pub last_volume: f64,
    pub high_52w: f64,
    pub low_52w: f64,
    /// Position in the 52-week range as a fraction (1.0 = at the high).
    pub proximity_52w: f64,
}

/// Benchmark (Nifty 50) context consumed by the momentum and sizing stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkSnapshot {
    pub close: f64,
    /// Fractional returns over ~1M/3M/6M of trading days (21/63/126).
    pub return_1m: f64,
    pub return_3m: f64,
    pub return_6m: f64,
    pub atr_14: f64,
    pub vol_20: f64,
    pub vol_30: f64,
}

/// Market regime states for position sizing and pipeline gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeState {
    /// Favorable conditions: full sizes, all setup types.
    RiskOn,
    /// Mixed signals: half sizes, pullbacks only.
    Choppy,
    /// Unfavorable: no new positions.
    RiskOff,
}

impl RegimeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeState::RiskOn => "RISK_ON",
            RegimeState::Choppy => "CHOPPY",
            RegimeState::RiskOff => "RISK_OFF",
        }
    }
}

/// Technical setup categories detected by the setup stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SetupType {
    /// Uptrend pullback to the 20/50 DMA zone (primary setup).
    Pullback,
    /// Volatility-contraction breakout.
    VcpBreakout,
    /// Breakout level retest on drying volume.
    Retest,
    /// Partially filled up-gap continuation.
    GapFill,
}

impl SetupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupType::Pullback => "PULLBACK",
            SetupType::VcpBreakout => "VCP_BREAKOUT",
            SetupType::Retest => "RETEST",
            SetupType::GapFill => "GAP_FILL",
        }
    }
}

/// Which stop won the tighter-of comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMethod {
    Structure,
    Volatility,
}

/// Universe quality tier from S1 scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
pub enum QualityTier {
    A,
    B,
    C,
    D,
}

impl QualityTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            QualityTier::A
        } else if score >= 75.0 {
            QualityTier::B
        } else if score >= 60.0 {
            QualityTier::C
        } else {
            QualityTier::D
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::A => "A",
            QualityTier::B => "B",
            QualityTier::C => "C",
            QualityTier::D => "D",
        }
    }
}

/// Monday-open gap decision, one per approved position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GapAction {
    SkipGappedThroughStop,
    SkipDoNotChase,
    EnterAtOpen,
    EnterAtOpenSmallGapAgainst,
    WaitAndWatch,
}

impl GapAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapAction::SkipGappedThroughStop => "SKIP_GAPPED_THROUGH_STOP",
            GapAction::SkipDoNotChase => "SKIP_DO_NOT_CHASE",
            GapAction::EnterAtOpen => "ENTER_AT_OPEN",
            GapAction::EnterAtOpenSmallGapAgainst => "ENTER_AT_OPEN_SMALL_GAP_AGAINST",
            GapAction::WaitAndWatch => "WAIT_AND_WATCH",
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(
            self,
            GapAction::EnterAtOpen | GapAction::EnterAtOpenSmallGapAgainst
        )
    }
}

/// Position state relative to its levels during the week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    StoppedOut,
    Target2Hit,
    Target1Hit,
    InProfit,
    InLoss,
}

/// Friday health-score verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthAction {
    Continue,
    Reduce,
    Pause,
    Stop,
}

/// Recommendation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Draft,
    Approved,
    Executed,
    Expired,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Draft => "draft",
            RecommendationStatus::Approved => "approved",
            RecommendationStatus::Executed => "executed",
            RecommendationStatus::Expired => "expired",
        }
    }
}

/// Nifty index families used for universe quality scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NiftyIndex {
    Nifty50,
    Nifty100,
    Nifty200,
    Nifty500,
}

/// Market indices fetched for regime classification and sector context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketIndex {
    Nifty50,
    IndiaVix,
    Bank,
    Metal,
    Realty,
    Auto,
    Pharma,
    Fmcg,
    It,
}

impl MarketIndex {
    /// Cyclical indices lead in risk-on phases.
    pub const CYCLICALS: [MarketIndex; 4] = [
        MarketIndex::Bank,
        MarketIndex::Metal,
        MarketIndex::Realty,
        MarketIndex::Auto,
    ];

    /// Defensive indices lead in risk-off phases.
    pub const DEFENSIVES: [MarketIndex; 3] =
        [MarketIndex::Pharma, MarketIndex::Fmcg, MarketIndex::It];
}

/// Exchange instrument row from the instruments feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub name: String,
    pub isin: String,
    pub segment: String,
    pub instrument_type: String,
    pub lot_size: u32,
    pub tick_size: f64,
    #[serde(default)]
    pub sector: Option<String>,
}

/// Optional monthly fundamental snapshot (absent symbols score without it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundamentalSnapshot {
    /// Quarter-over-quarter EPS growth, fraction.
    pub eps_qoq_growth: f64,
    /// Year-over-year revenue growth, fraction.
    pub revenue_yoy_growth: f64,
    /// Return on capital employed, percent.
    pub roce: f64,
    /// Return on equity, percent.
    pub roe: f64,
    pub debt_equity: f64,
    /// Operating margin, fraction.
    pub operating_margin: f64,
    /// Free-cash-flow yield, fraction.
    pub fcf_yield: f64,
    /// Cash EPS over reported EPS (earnings quality; ~1.0 is clean).
    pub cash_eps_ratio: f64,
}

/// Monday of the ISO week containing `date`.
pub fn week_start_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn week_start_is_monday() {
        // 2026-07-29 is a Wednesday
        let wed = NaiveDate::from_ymd_opt(2026, 7, 29).unwrap();
        assert_eq!(week_start_of(wed), NaiveDate::from_ymd_opt(2026, 7, 27).unwrap());
        // Monday maps to itself
        let mon = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
        assert_eq!(week_start_of(mon), mon);
    }

    #[test]
    fn tier_thresholds() {
        assert_eq!(QualityTier::from_score(90.0), QualityTier::A);
        assert_eq!(QualityTier::from_score(89.9), QualityTier::B);
        assert_eq!(QualityTier::from_score(75.0), QualityTier::B);
        assert_eq!(QualityTier::from_score(60.0), QualityTier::C);
        assert_eq!(QualityTier::from_score(59.9), QualityTier::D);
    }

    #[test]
    fn regime_state_serializes_screaming() {
        let json = serde_json::to_string(&RegimeState::RiskOn).unwrap();
        assert_eq!(json, "\"RISK_ON\"");
    }
}
