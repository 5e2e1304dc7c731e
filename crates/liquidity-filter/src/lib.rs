//! Liquidity and tradability screening (stage S4A).
//!
//! Scores multi-horizon turnover depth plus volume stability, then applies
//! a conjunctive gate: score, absolute turnover floor, circuit-hit count,
//! and average overnight gap must all pass.

use chrono::{DateTime, NaiveDate, Utc};

use analyzer_core::{AnalysisError, Bar, LiquidityScore};
use market_data::indicators::std_dev;

/// Minimum daily history for liquidity scoring.
pub const MIN_BARS: usize = 60;

/// Daily move at or beyond this fraction counts as a circuit hit.
const CIRCUIT_LIMIT: f64 = 0.05;

const CRORE: f64 = 1.0e7;

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn tail(values: &[f64], n: usize) -> &[f64] {
    &values[values.len().saturating_sub(n)..]
}

/// Count of >= 5% close-over-close moves in the trailing window. A daily
/// heuristic; intraday band data would refine it but the <= 1 threshold
/// keeps its meaning.
pub fn circuit_hits(bars: &[Bar], lookback: usize) -> u32 {
    let start = bars.len().saturating_sub(lookback + 1);
    bars[start..]
        .windows(2)
        .filter(|w| {
            let prev = w[0].close;
            prev > 0.0 && ((w[1].close - prev) / prev).abs() >= CIRCUIT_LIMIT
        })
        .count() as u32
}

/// Average absolute overnight gap, percent, over the trailing window.
pub fn average_gap_pct(bars: &[Bar], lookback: usize) -> f64 {
    let start = bars.len().saturating_sub(lookback + 1);
    let gaps: Vec<f64> = bars[start..]
        .windows(2)
        .filter(|w| w[0].close > 0.0)
        .map(|w| ((w[1].open - w[0].close) / w[0].close).abs() * 100.0)
        .collect();
    mean(&gaps)
}

/// Score one symbol from ~90 days of daily bars.
pub fn score_liquidity(
    symbol: &str,
    week: NaiveDate,
    bars: &[Bar],
    calculated_at: DateTime<Utc>,
) -> Result<LiquidityScore, AnalysisError> {
    if bars.len() < MIN_BARS {
        return Err(AnalysisError::InsufficientData(format!(
            "{symbol}: {} bars, need {MIN_BARS}",
            bars.len()
        )));
    }

    let turnovers_cr: Vec<f64> = bars.iter().map(|b| b.turnover() / CRORE).collect();
    let turnover_20d_cr = mean(tail(&turnovers_cr, 20));
    let turnover_60d_cr = mean(tail(&turnovers_cr, 60));
    let peak_turnover_30d_cr = tail(&turnovers_cr, 30)
        .iter()
        .fold(0.0f64, |acc, v| acc.max(*v));

    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let vol_20 = tail(&volumes, 20);
    let vol_mean = mean(vol_20);
    let volume_stability = if vol_mean > 0.0 {
        (1.0 - std_dev(vol_20) / vol_mean).clamp(0.0, 1.0)
    } else {
        0.0
    };

    // 10 Cr / 8 Cr / 50 Cr saturate each turnover component
    let turnover_20_n = (turnover_20d_cr / 10.0).min(1.0);
    let turnover_60_n = (turnover_60d_cr / 8.0).min(1.0);
    let peak_n = (peak_turnover_30d_cr / 50.0).min(1.0);

    let score = 100.0
        * (0.40 * turnover_20_n + 0.30 * turnover_60_n + 0.20 * peak_n + 0.10 * volume_stability);

    let circuit_hits_30d = circuit_hits(bars, 30);
    let avg_gap_pct = average_gap_pct(bars, 30);

    let qualifies = score >= 75.0
        && turnover_20d_cr >= 10.0
        && circuit_hits_30d <= 1
        && avg_gap_pct <= 2.0;

    Ok(LiquidityScore {
        symbol: symbol.to_string(),
        week,
        turnover_20d_cr,
        turnover_60d_cr,
        peak_turnover_30d_cr,
        volume_stability,
        circuit_hits_30d,
        avg_gap_pct,
        score,
        qualifies,
        calculated_at,
    })
}
