//! Pattern recognition predicates.
//!
//! Each detector scores its conditions and returns the pattern's support
//! level plus a 0-100 confidence; level geometry is computed by the caller
//! so it stays uniform across patterns.

use analyzer_core::{Bar, IndicatorSet};
use market_data::indicators::{sma, wilder_atr};

/// A recognized pattern: where it finds support and how strongly its
/// conditions were met.
#[derive(Debug, Clone, Copy)]
pub struct PatternMatch {
    pub support: f64,
    pub conditions_met: u8,
    pub confidence: f64,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn count(conditions: &[bool]) -> u8 {
    conditions.iter().filter(|b| **b).count() as u8
}

/// Small-body bar with a long lower shadow; strengthens a pullback.
fn is_hammer(bar: &Bar) -> bool {
    let body = (bar.close - bar.open).abs();
    let range = bar.high - bar.low;
    if range <= 0.0 {
        return false;
    }
    let lower_shadow = bar.open.min(bar.close) - bar.low;
    body <= 0.3 * range && lower_shadow >= 2.0 * body
}

/// PULLBACK: uptrend, drift back into the 20/50-DMA zone on drying volume,
/// RSI in the recovery band, MACD histogram turning up.
pub fn detect_pullback(bars: &[Bar], ind: &IndicatorSet) -> Option<PatternMatch> {
    if bars.len() < 50 {
        return None;
    }

    let near_20dma = ind.sma_20 > 0.0
        && ind.close >= 0.95 * ind.sma_20
        && ind.close <= 1.03 * ind.sma_20;
    let near_50dma = ind.sma_50 > 0.0
        && ind.close >= 0.95 * ind.sma_50
        && ind.close <= 1.03 * ind.sma_50;
    let near_support = near_20dma || near_50dma;

    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let vol_3d = mean(&volumes[volumes.len() - 3..]);
    let vol_20d = mean(&volumes[volumes.len() - 20..]);
    let vol_contraction = vol_20d > 0.0 && vol_3d <= 0.70 * vol_20d;

    let rsi_in_zone = (35.0..=55.0).contains(&ind.rsi_14);
    let macd_turning = ind.macd_hist > ind.macd_hist_prev && ind.macd_hist > -0.5;
    let in_uptrend = ind.close > ind.sma_50 && ind.sma_50 > ind.sma_200;

    let conditions = count(&[
        near_support,
        vol_contraction,
        rsi_in_zone,
        macd_turning,
        in_uptrend,
    ]);
    if conditions < 3 || !(near_support || in_uptrend) {
        return None;
    }

    let hammer_bonus = if bars.last().map(is_hammer).unwrap_or(false) {
        10.0
    } else {
        0.0
    };
    let support = if near_50dma {
        ind.sma_20.min(ind.sma_50)
    } else {
        ind.sma_20
    };

    Some(PatternMatch {
        support,
        conditions_met: conditions,
        confidence: (60.0 + f64::from(conditions) * 7.0 + hammer_bonus).min(95.0),
    })
}

/// VCP_BREAKOUT: tight multi-week range with contracting volatility and
/// the close pressing the top of the range.
pub fn detect_vcp_breakout(bars: &[Bar], ind: &IndicatorSet) -> Option<PatternMatch> {
    if bars.len() < 60 {
        return None;
    }

    let recent = &bars[bars.len() - 20..];
    let recent_high = recent.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let recent_low = recent.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    if recent_low <= 0.0 || recent_high <= recent_low {
        return None;
    }
    let range_pct = (recent_high - recent_low) / recent_low * 100.0;
    let tight_range = range_pct <= 12.0;

    let range_mid = (recent_high + recent_low) / 2.0;
    let in_consolidation = (ind.close - range_mid).abs() / range_mid <= 0.05;

    let atr_series = wilder_atr(bars, 14);
    let declining_vol = atr_series.len() > 21 && {
        let current = atr_series[atr_series.len() - 1];
        let prior = atr_series[atr_series.len() - 22];
        current < prior
    };

    let range_position = (ind.close - recent_low) / (recent_high - recent_low);
    let near_breakout = range_position >= 0.70;

    // weekly range contraction over the last four 5-bar chunks
    let mut weekly_ranges = Vec::with_capacity(4);
    for chunk in 0..4 {
        let end = bars.len() - chunk * 5;
        let start = end.saturating_sub(5);
        let slice = &bars[start..end];
        let high = slice.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let low = slice.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        if low > 0.0 {
            weekly_ranges.push((high - low) / low * 100.0);
        }
    }
    let tightening = weekly_ranges.len() >= 3 && weekly_ranges[0] <= weekly_ranges[2];

    let conditions = count(&[
        tight_range,
        in_consolidation,
        declining_vol,
        near_breakout,
        tightening,
    ]);
    if conditions < 3 || !tight_range {
        return None;
    }

    Some(PatternMatch {
        support: recent_high,
        conditions_met: conditions,
        confidence: (55.0 + f64::from(conditions) * 8.0).min(95.0),
    })
}

/// RETEST: a recent high-volume breakout holding its level while volume
/// dries up and the lows step higher.
pub fn detect_retest(bars: &[Bar], ind: &IndicatorSet) -> Option<PatternMatch> {
    if bars.len() < 40 {
        return None;
    }

    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let vol_sma_20 = sma(&volumes, 20);
    // vol_sma_20[i] covers bars[i..i+20]; align index i -> bars[i + 19]
    let vol_avg_at = |bar_idx: usize| -> Option<f64> {
        bar_idx.checked_sub(19).and_then(|i| vol_sma_20.get(i)).copied()
    };

    // breakout scan: two to three weeks back, excluding the retest days
    let scan_start = bars.len() - 20;
    let scan_end = bars.len() - 5;
    let mut breakout: Option<(usize, f64, f64)> = None; // (idx, level, spike)
    for i in scan_start.max(1)..scan_end {
        let prev_close = bars[i - 1].close;
        if prev_close <= 0.0 {
            continue;
        }
        let day_return = (bars[i].close - prev_close) / prev_close;
        let Some(avg_vol) = vol_avg_at(i) else { continue };
        if avg_vol <= 0.0 {
            continue;
        }
        let spike = bars[i].volume / avg_vol;
        if day_return > 0.02 && spike > 2.0 {
            breakout = Some((i, bars[i].close, spike));
        }
    }
    let (breakout_idx, breakout_level, breakout_spike) = breakout?;
    let breakout_volume = bars[breakout_idx].volume;

    let breakout_vol_high = breakout_spike >= 2.5;
    let holding_above = ind.close >= 0.97 * breakout_level;

    let recent_5 = &bars[bars.len() - 5..];
    let recent_vol = mean(&recent_5.iter().map(|b| b.volume).collect::<Vec<_>>());
    let vol_dryup = recent_vol <= 0.60 * breakout_volume;

    let recent_low = recent_5.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let prior_low = bars[bars.len() - 20..bars.len() - 10]
        .iter()
        .map(|b| b.low)
        .fold(f64::MAX, f64::min);
    let higher_low = recent_low > prior_low;

    let conditions = count(&[breakout_vol_high, holding_above, vol_dryup, higher_low]);
    if conditions < 3 || !holding_above {
        return None;
    }

    Some(PatternMatch {
        support: breakout_level,
        conditions_met: conditions,
        confidence: (60.0 + f64::from(conditions) * 9.0).min(95.0),
    })
}

/// GAP_FILL: a modest up-gap in an uptrend, half to three-quarters filled,
/// with expansion volume on the gap day.
pub fn detect_gap_fill(bars: &[Bar], ind: &IndicatorSet) -> Option<PatternMatch> {
    if bars.len() < 40 {
        return None;
    }

    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let vol_sma_20 = sma(&volumes, 20);
    let vol_avg_at = |bar_idx: usize| -> Option<f64> {
        bar_idx.checked_sub(19).and_then(|i| vol_sma_20.get(i)).copied()
    };

    // latest qualifying gap in the last ten sessions
    let mut gap: Option<usize> = None;
    for i in bars.len() - 10..bars.len() {
        let prev_close = bars[i - 1].close;
        if prev_close <= 0.0 {
            continue;
        }
        let gap_pct = (bars[i].open - prev_close) / prev_close;
        if (0.005..=0.02).contains(&gap_pct) {
            gap = Some(i);
        }
    }
    let gap_idx = gap?;

    let gap_top = bars[gap_idx].open;
    let gap_bottom = bars[gap_idx - 1].close;
    let gap_size = gap_top - gap_bottom;
    if gap_size <= 0.0 {
        return None;
    }

    let lowest_after = bars[gap_idx..]
        .iter()
        .map(|b| b.low)
        .fold(f64::MAX, f64::min);
    let fill_pct = (gap_top - lowest_after) / gap_size * 100.0;

    let above_rising_20dma = gap_top > ind.sma_20 && ind.slope_sma_20 > 0.0;
    let partial_fill = (50.0..=75.0).contains(&fill_pct);
    let vol_expansion = vol_avg_at(gap_idx)
        .map(|avg| avg > 0.0 && bars[gap_idx].volume >= 1.8 * avg)
        .unwrap_or(false);
    let holding_gap = ind.close >= gap_bottom;
    let in_uptrend = ind.close > ind.sma_20 && ind.sma_20 > ind.sma_50;

    let conditions = count(&[
        above_rising_20dma,
        partial_fill,
        vol_expansion,
        holding_gap,
        in_uptrend,
    ]);
    if conditions < 3 || !holding_gap || !partial_fill {
        return None;
    }

    Some(PatternMatch {
        support: gap_top,
        conditions_met: conditions,
        confidence: (55.0 + f64::from(conditions) * 8.0).min(95.0),
    })
}
