//! Indicator computation over daily bars.
//!
//! Everything is computed locally from OHLCV so results do not drift with
//! the provider's own indicator feeds. Formulas: simple moving averages,
//! Wilder ATR(14), Wilder RSI(14), MACD(12, 26, 9).

use analyzer_core::{AnalysisError, Bar, IndicatorSet};

/// Simple Moving Average. Returns one value per bar from index `period-1`.
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len() - period + 1);
    let mut sum: f64 = data[..period].iter().sum();
    result.push(sum / period as f64);
    for i in period..data.len() {
        sum += data[i] - data[i - period];
        result.push(sum / period as f64);
    }
    result
}

/// Exponential Moving Average seeded with the first value.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(data.len());
    result.push(data[0]);
    for i in 1..data.len() {
        let prev = result[i - 1];
        result.push((data[i] - prev) * multiplier + prev);
    }
    result
}

/// Wilder RSI. Returns one value per bar from index `period`.
pub fn wilder_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return vec![];
    }

    let mut gains = Vec::with_capacity(closes.len() - 1);
    let mut losses = Vec::with_capacity(closes.len() - 1);
    for w in closes.windows(2) {
        let change = w[1] - w[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(gains.len() - period + 1);
    out.push(rsi_value(avg_gain, avg_loss));
    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        out.push(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Wilder ATR over OHLC bars. Returns one value per bar from index `period`.
pub fn wilder_atr(bars: &[Bar], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() < period + 1 {
        return vec![];
    }

    let mut trs = Vec::with_capacity(bars.len() - 1);
    for w in bars.windows(2) {
        let (prev, cur) = (&w[0], &w[1]);
        let tr = (cur.high - cur.low)
            .max((cur.high - prev.close).abs())
            .max((cur.low - prev.close).abs());
        trs.push(tr);
    }

    let mut atr = trs[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(trs.len() - period + 1);
    out.push(atr);
    for tr in &trs[period..] {
        atr = (atr * (period - 1) as f64 + tr) / period as f64;
        out.push(atr);
    }
    out
}

pub struct MacdResult {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// MACD over closes; all three series are aligned to the input length.
pub fn macd(data: &[f64], fast: usize, slow: usize, signal: usize) -> MacdResult {
    if fast == 0 || slow == 0 || signal == 0 || slow < fast || data.is_empty() {
        return MacdResult {
            macd_line: vec![],
            signal_line: vec![],
            histogram: vec![],
        };
    }

    let ema_fast = ema(data, fast);
    let ema_slow = ema(data, slow);
    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema(&macd_line, signal);
    let histogram: Vec<f64> = macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(m, s)| m - s)
        .collect();

    MacdResult {
        macd_line,
        signal_line,
        histogram,
    }
}

/// Per-day fractional slope of an MA series over its own window:
/// (ma[t] - ma[t-n]) / ma[t-n] / n. The momentum thresholds are calibrated
/// to this definition, not to a regression slope.
pub fn ma_slope(ma_series: &[f64], window: usize) -> f64 {
    if ma_series.len() <= window {
        return 0.0;
    }
    let last = ma_series[ma_series.len() - 1];
    let prior = ma_series[ma_series.len() - 1 - window];
    if prior <= 0.0 {
        return 0.0;
    }
    (last - prior) / prior / window as f64
}

/// Standard deviation of close-over-close returns over the trailing window.
pub fn return_volatility(closes: &[f64], window: usize) -> f64 {
    if closes.len() < window + 1 {
        return 0.0;
    }
    let tail = &closes[closes.len() - window - 1..];
    let returns: Vec<f64> = tail.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect();
    std_dev(&returns)
}

pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Full indicator snapshot for the latest bar.
///
/// Requires at least 400 bars so the 200-DMA slope window (another 200
/// bars back) is populated.
pub fn compute_indicators(bars: &[Bar]) -> Result<IndicatorSet, AnalysisError> {
    if bars.len() < 200 {
        return Err(AnalysisError::InsufficientData(format!(
            "{} bars, need 200",
            bars.len()
        )));
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let sma_20_series = sma(&closes, 20);
    let sma_50_series = sma(&closes, 50);
    let sma_200_series = sma(&closes, 200);

    let atr = wilder_atr(bars, 14);
    let rsi = wilder_rsi(&closes, 14);
    let macd_out = macd(&closes, 12, 26, 9);

    let tail_252 = &bars[bars.len().saturating_sub(252)..];
    let high_52w = tail_252.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low_52w = tail_252.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let close = closes[closes.len() - 1];
    let proximity_52w = if high_52w > low_52w {
        (close - low_52w) / (high_52w - low_52w)
    } else {
        0.5
    };

    let vol_tail = &bars[bars.len().saturating_sub(20)..];
    let avg_volume_20 = vol_tail.iter().map(|b| b.volume).sum::<f64>() / vol_tail.len() as f64;

    let hist_len = macd_out.histogram.len();
    let macd_hist = macd_out.histogram[hist_len - 1];
    let macd_hist_prev = if hist_len >= 2 {
        macd_out.histogram[hist_len - 2]
    } else {
        macd_hist
    };

    Ok(IndicatorSet {
        close,
        sma_20: *sma_20_series.last().unwrap_or(&0.0),
        sma_50: *sma_50_series.last().unwrap_or(&0.0),
        sma_200: *sma_200_series.last().unwrap_or(&0.0),
        slope_sma_20: ma_slope(&sma_20_series, 20),
        slope_sma_50: ma_slope(&sma_50_series, 50),
        slope_sma_200: ma_slope(&sma_200_series, 200),
        atr_14: *atr.last().unwrap_or(&0.0),
        rsi_14: *rsi.last().unwrap_or(&50.0),
        macd_hist,
        macd_hist_prev,
        avg_volume_20,
        last_volume: bars.last().map(|b| b.volume).unwrap_or(0.0),
        high_52w,
        low_52w,
        proximity_52w,
    })
}
