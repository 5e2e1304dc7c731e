//! Momentum screening (stage S2): five filters, qualify on 4 of 5.
//!
//! 2A  52-week high proximity (with a volume-surge secondary path)
//! 2B  five-layer moving-average alignment
//! 2C  multi-horizon relative strength vs the Nifty benchmark
//! 2D  composite momentum score
//! 2E  volatility ratio vs the benchmark

use chrono::{DateTime, NaiveDate, Utc};

use analyzer_core::{AnalysisError, Bar, BenchmarkSnapshot, IndicatorSet, MomentumScore};
use market_data::indicators::{return_volatility, sma};

/// Minimum daily history for momentum scoring (200-DMA must be populated).
pub const MIN_BARS: usize = 200;

const SLOPE_FLOOR_20: f64 = 0.001;
const SLOPE_FLOOR_50: f64 = 0.0005;
const SLOPE_FLOOR_200: f64 = 0.0002;

/// Filter 2A: proximity to the 52-week high.
///
/// Primary path: within the top 10% of the 52-week range. Secondary path:
/// top 20% of the range with a >= 1.5x volume surge.
fn filter_2a(proximity: f64, volume_surge: f64) -> bool {
    proximity >= 0.90 || (proximity >= 0.80 && volume_surge >= 1.5)
}

/// Filter 2B: moving-average alignment, scored out of five layers.
fn filter_2b(ind: &IndicatorSet) -> (u8, bool) {
    let close_above_20 = ind.sma_20 > 0.0 && ind.close > ind.sma_20;
    let close_above_50 = ind.sma_50 > 0.0 && ind.close > ind.sma_50;
    let close_above_200 = ind.sma_200 > 0.0 && ind.close > ind.sma_200;
    let stacked = ind.sma_20 > ind.sma_50 && ind.sma_50 > ind.sma_200;
    let slopes_up = ind.slope_sma_20 >= SLOPE_FLOOR_20
        && ind.slope_sma_50 >= SLOPE_FLOOR_50
        && ind.slope_sma_200 >= SLOPE_FLOOR_200;

    let score = [close_above_20, close_above_50, close_above_200, stacked, slopes_up]
        .iter()
        .filter(|b| **b)
        .count() as u8;
    (score, score >= 4)
}

/// Filter 2C: relative strength over 1M/3M/6M; two of three horizons.
fn filter_2c(rs_1m: f64, rs_3m: f64, rs_6m: f64) -> (u8, bool) {
    let passed = [rs_1m >= 0.05, rs_3m >= 0.10, rs_6m >= 0.15]
        .iter()
        .filter(|b| **b)
        .count() as u8;
    (passed, passed >= 2)
}

/// Filter 2D: composite momentum score, 0-100.
///
/// Equal quarters of proximity, normalized relative strength, MA alignment,
/// and short-term price acceleration.
fn composite_score(proximity: f64, rs_avg: f64, ma_score: u8, acceleration: f64) -> f64 {
    let proximity_component = (proximity * 100.0).clamp(0.0, 100.0);
    // rs_avg is a fraction; +/-50 percentage points spans the scale
    let rs_component = ((rs_avg * 100.0) / 50.0 * 100.0 + 50.0).clamp(0.0, 100.0);
    let ma_component = f64::from(ma_score) / 5.0 * 100.0;
    let accel_component = ((acceleration + 0.05) / 0.10 * 100.0).clamp(0.0, 100.0);

    0.25 * proximity_component
        + 0.25 * rs_component
        + 0.25 * ma_component
        + 0.25 * accel_component
}

fn trailing_return(closes: &[f64], days: usize) -> f64 {
    if closes.len() < days + 1 {
        return 0.0;
    }
    let last = closes[closes.len() - 1];
    let base = closes[closes.len() - 1 - days];
    if base <= 0.0 {
        return 0.0;
    }
    last / base - 1.0
}

/// Ten-day SMA change over the last eleven bars; the acceleration input
/// to the composite score.
fn price_acceleration(closes: &[f64]) -> f64 {
    let sma_10 = sma(closes, 10);
    if sma_10.len() < 12 {
        return 0.0;
    }
    let last = sma_10[sma_10.len() - 1];
    let base = sma_10[sma_10.len() - 12];
    if base <= 0.0 {
        return 0.0;
    }
    (last - base) / base
}

/// Score one symbol. `Err(InsufficientData)` is the caller's per-symbol
/// skip, not a failure.
pub fn score_momentum(
    symbol: &str,
    week: NaiveDate,
    bars: &[Bar],
    ind: &IndicatorSet,
    benchmark: &BenchmarkSnapshot,
    calculated_at: DateTime<Utc>,
) -> Result<MomentumScore, AnalysisError> {
    if bars.len() < MIN_BARS {
        return Err(AnalysisError::InsufficientData(format!(
            "{symbol}: {} bars, need {MIN_BARS}",
            bars.len()
        )));
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

    let volume_surge = if ind.avg_volume_20 > 0.0 {
        ind.last_volume / ind.avg_volume_20
    } else {
        0.0
    };
    let filter_2a_pass = filter_2a(ind.proximity_52w, volume_surge);

    let (ma_alignment_score, filter_2b_pass) = filter_2b(ind);

    let rs_1m = trailing_return(&closes, 21) - benchmark.return_1m;
    let rs_3m = trailing_return(&closes, 63) - benchmark.return_3m;
    let rs_6m = trailing_return(&closes, 126) - benchmark.return_6m;
    let (rs_horizons_passed, filter_2c_pass) = filter_2c(rs_1m, rs_3m, rs_6m);
    let rs_avg = (rs_1m + rs_3m + rs_6m) / 3.0;

    let acceleration = price_acceleration(&closes);
    let score = composite_score(ind.proximity_52w, rs_avg, ma_alignment_score, acceleration);
    let filter_2d_pass = score >= 75.0;

    let stock_vol = return_volatility(&closes, 30);
    let volatility_ratio = if benchmark.vol_30 > 0.0 {
        stock_vol / benchmark.vol_30
    } else {
        1.0
    };
    let filter_2e_pass = volatility_ratio <= 1.5;

    let filters_passed = [
        filter_2a_pass,
        filter_2b_pass,
        filter_2c_pass,
        filter_2d_pass,
        filter_2e_pass,
    ]
    .iter()
    .filter(|b| **b)
    .count() as u8;

    Ok(MomentumScore {
        symbol: symbol.to_string(),
        week,
        proximity_52w: ind.proximity_52w,
        high_52w: ind.high_52w,
        close: ind.close,
        volume_surge,
        filter_2a_pass,
        ma_alignment_score,
        slope_sma_20: ind.slope_sma_20,
        slope_sma_50: ind.slope_sma_50,
        slope_sma_200: ind.slope_sma_200,
        filter_2b_pass,
        rs_1m,
        rs_3m,
        rs_6m,
        rs_horizons_passed,
        filter_2c_pass,
        score,
        filter_2d_pass,
        volatility_ratio,
        filter_2e_pass,
        filters_passed,
        qualifies: filters_passed >= 4,
        calculated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 25, 0, 0, 0).unwrap()
    }

    fn week() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 27).unwrap()
    }

    fn flat_benchmark() -> BenchmarkSnapshot {
        BenchmarkSnapshot {
            close: 24_000.0,
            return_1m: 0.0,
            return_3m: 0.0,
            return_6m: 0.0,
            atr_14: 200.0,
            vol_20: 0.008,
            vol_30: 0.008,
        }
    }

    fn trending_bars(n: usize, daily_gain: f64) -> Vec<Bar> {
        let mut price = 100.0;
        (0..n)
            .map(|i| {
                price *= 1.0 + daily_gain;
                Bar {
                    date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
                        + chrono::Duration::days(i as i64),
                    open: price,
                    high: price * 1.01,
                    low: price * 0.99,
                    close: price,
                    volume: 1_000_000.0,
                }
            })
            .collect()
    }

    fn strong_indicators() -> IndicatorSet {
        IndicatorSet {
            close: 100.0,
            sma_20: 95.0,
            sma_50: 90.0,
            sma_200: 80.0,
            slope_sma_20: 0.002,
            slope_sma_50: 0.001,
            slope_sma_200: 0.0005,
            atr_14: 2.0,
            rsi_14: 60.0,
            macd_hist: 0.5,
            macd_hist_prev: 0.2,
            avg_volume_20: 1_000_000.0,
            last_volume: 1_200_000.0,
            high_52w: 100.0,
            low_52w: 60.0,
            proximity_52w: 1.0,
        }
    }

    #[test]
    fn strong_uptrend_qualifies() {
        // ~0.4%/day compounding clears every RS hurdle against a flat Nifty
        let bars = trending_bars(300, 0.004);
        let result = score_momentum(
            "WINNER",
            week(),
            &bars,
            &strong_indicators(),
            &flat_benchmark(),
            now(),
        )
        .unwrap();
        assert!(result.filter_2a_pass);
        assert!(result.filter_2b_pass);
        assert!(result.filter_2c_pass);
        assert!(result.qualifies, "filters passed: {}", result.filters_passed);
    }

    #[test]
    fn proximity_boundary_exact_090_passes() {
        assert!(filter_2a(0.90, 1.0));
        assert!(!filter_2a(0.899, 1.0));
        // secondary path rescues 0.899 with a volume surge
        assert!(filter_2a(0.899, 1.5));
        assert!(!filter_2a(0.79, 2.0));
    }

    #[test]
    fn rs_needs_two_of_three_horizons() {
        let (n, pass) = filter_2c(0.05, 0.10, 0.0);
        assert_eq!(n, 2);
        assert!(pass);
        let (n, pass) = filter_2c(0.06, 0.0, 0.0);
        assert_eq!(n, 1);
        assert!(!pass);
    }

    #[test]
    fn ma_alignment_needs_four_layers() {
        let mut ind = strong_indicators();
        let (score, pass) = filter_2b(&ind);
        assert_eq!(score, 5);
        assert!(pass);

        // kill the slope layer only
        ind.slope_sma_200 = 0.0001;
        let (score, pass) = filter_2b(&ind);
        assert_eq!(score, 4);
        assert!(pass);

        // also break the stack
        ind.sma_20 = 85.0;
        let (score, pass) = filter_2b(&ind);
        assert_eq!(score, 3);
        assert!(!pass);
    }

    #[test]
    fn high_volatility_fails_2e() {
        let mut bars = trending_bars(300, 0.004);
        // inject violent alternation in the last 30 bars
        let n = bars.len();
        for (i, bar) in bars[n - 31..].iter_mut().enumerate() {
            let factor = if i % 2 == 0 { 0.94 } else { 1.06 };
            bar.close *= factor;
        }
        let result = score_momentum(
            "CHOPPER",
            week(),
            &bars,
            &strong_indicators(),
            &flat_benchmark(),
            now(),
        )
        .unwrap();
        assert!(!result.filter_2e_pass, "ratio {}", result.volatility_ratio);
    }

    #[test]
    fn short_history_is_a_skip() {
        let bars = trending_bars(150, 0.004);
        let err = score_momentum(
            "YOUNG",
            week(),
            &bars,
            &strong_indicators(),
            &flat_benchmark(),
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData(_)));
    }
}
