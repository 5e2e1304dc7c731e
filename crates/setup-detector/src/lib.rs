//! Technical setup detection (stage S4B).
//!
//! For each liquidity-qualified symbol the detector attempts, in order,
//! PULLBACK, VCP_BREAKOUT, RETEST, GAP_FILL and emits at most one
//! [`TradeSetup`]. Levels are uniform across patterns: entry band half an
//! ATR around the pattern's support, the tighter of the structure and
//! volatility stops, a 2R first target and a 3R second target capped at
//! the 52-week high.

mod patterns;

use chrono::{DateTime, NaiveDate, Utc};

use analyzer_core::{
    AnalysisError, Bar, IndicatorSet, SetupType, StopMethod, Thresholds, TradeSetup,
};

pub use patterns::{
    detect_gap_fill, detect_pullback, detect_retest, detect_vcp_breakout, PatternMatch,
};

/// Minimum daily history for pattern work (200-DMA context).
pub const MIN_BARS: usize = 200;

/// Scores carried forward from earlier stages for the quality composite.
#[derive(Debug, Clone, Copy)]
pub struct StageScores {
    pub momentum: f64,
    pub consistency: f64,
    pub liquidity: f64,
}

/// Entry/stop/target geometry shared by every pattern.
#[derive(Debug, Clone, Copy)]
pub struct Levels {
    pub entry_low: f64,
    pub entry_high: f64,
    pub stop: f64,
    pub stop_method: StopMethod,
    pub stop_distance_pct: f64,
    pub target_1: f64,
    pub target_2: f64,
    pub rr: f64,
}

/// Compute levels from a pattern's support.
///
/// The stop is the tighter (higher) of the structure stop (1% under the
/// 20-bar swing low) and the volatility stop (two ATRs under the entry
/// band). Target 2 is capped at the 52-week high and floored at target 1
/// so the level ordering invariant survives near new highs.
pub fn compute_levels(support: f64, atr: f64, swing_low: f64, high_52w: f64) -> Option<Levels> {
    if support <= 0.0 || atr <= 0.0 {
        return None;
    }
    let entry_low = support - 0.5 * atr;
    let entry_high = support + 0.5 * atr;
    let mid = support;

    let stop_structure = swing_low * 0.99;
    let stop_volatility = entry_low - 2.0 * atr;
    let (stop, stop_method) = if stop_structure >= stop_volatility {
        (stop_structure, StopMethod::Structure)
    } else {
        (stop_volatility, StopMethod::Volatility)
    };

    if stop >= entry_low {
        return None;
    }

    let risk = mid - stop;
    if risk <= 0.0 {
        return None;
    }

    let target_1 = mid + 2.0 * risk;
    let target_2 = (mid + 3.0 * risk).min(high_52w).max(target_1);
    let rr = (target_1 - mid) / risk;
    let stop_distance_pct = (mid - stop) / mid;

    Some(Levels {
        entry_low,
        entry_high,
        stop,
        stop_method,
        stop_distance_pct,
        target_1,
        target_2,
        rr,
    })
}

/// Detect at most one setup for a symbol under the run's regime thresholds.
///
/// `Ok(None)` means no pattern (or the pattern failed the risk gates);
/// `Err(InsufficientData)` is a per-symbol skip.
pub fn detect_setup(
    symbol: &str,
    week: NaiveDate,
    bars: &[Bar],
    ind: &IndicatorSet,
    scores: StageScores,
    thresholds: &Thresholds,
    max_stop_distance_pct: f64,
    calculated_at: DateTime<Utc>,
) -> Result<Option<TradeSetup>, AnalysisError> {
    if bars.len() < MIN_BARS {
        return Err(AnalysisError::InsufficientData(format!(
            "{symbol}: {} bars, need {MIN_BARS}",
            bars.len()
        )));
    }

    let detectors: [(SetupType, fn(&[Bar], &IndicatorSet) -> Option<PatternMatch>); 4] = [
        (SetupType::Pullback, detect_pullback),
        (SetupType::VcpBreakout, detect_vcp_breakout),
        (SetupType::Retest, detect_retest),
        (SetupType::GapFill, detect_gap_fill),
    ];

    let matched = detectors
        .iter()
        .filter(|(kind, _)| thresholds.allowed_setups.contains(kind))
        .find_map(|(kind, detect)| detect(bars, ind).map(|m| (*kind, m)));

    let Some((setup_type, pattern)) = matched else {
        return Ok(None);
    };

    let swing_low = bars[bars.len() - 20..]
        .iter()
        .map(|b| b.low)
        .fold(f64::MAX, f64::min);

    let Some(levels) = compute_levels(pattern.support, ind.atr_14, swing_low, ind.high_52w)
    else {
        return Ok(None);
    };

    // regime risk gates
    if levels.rr < thresholds.rr_floor || levels.stop_distance_pct > max_stop_distance_pct {
        return Ok(None);
    }

    let quality_composite = 0.25 * scores.momentum
        + 0.25 * scores.consistency
        + 0.25 * scores.liquidity
        + 0.25 * pattern.confidence;

    Ok(Some(TradeSetup {
        symbol: symbol.to_string(),
        week,
        setup_type,
        close: ind.close,
        entry_low: levels.entry_low,
        entry_high: levels.entry_high,
        stop: levels.stop,
        stop_method: levels.stop_method,
        stop_distance_pct: levels.stop_distance_pct,
        target_1: levels.target_1,
        target_2: levels.target_2,
        rr: levels.rr,
        conditions_met: pattern.conditions_met,
        confidence: pattern.confidence,
        quality_composite,
        calculated_at,
    }))
}
