//! Market regime classification (C5).
//!
//! Four equally weighted sub-scores, each 0-100:
//!   1. Trend      - Nifty close vs the 20/50/200 DMA stack and MA slopes
//!   2. Breadth    - fraction of the universe above its 200 and 50 DMA
//!   3. Volatility - India VIX level, direction and spike state (realized
//!                   20-day vol stands in when the VIX series is missing)
//!   4. Leadership - cyclical-minus-defensive 20-day index returns
//!
//! The composite gates the whole pipeline: RISK_OFF weeks produce an empty
//! portfolio and a zero-setup recommendation.

use chrono::{DateTime, NaiveDate, Utc};

use analyzer_core::{
    AnalysisError, Bar, RegimeAssessment, RegimeState, RegimeSubscores, Thresholds,
};
use market_data::indicators::{ma_slope, return_volatility, sma};

/// Universe breadth sample: how many symbols trade above their long MAs.
#[derive(Debug, Clone, Copy)]
pub struct BreadthSample {
    pub above_200dma: usize,
    pub above_50dma: usize,
    pub total: usize,
}

/// Everything the classifier reads. The VIX series is optional.
pub struct RegimeInputs {
    pub nifty_bars: Vec<Bar>,
    pub vix_closes: Option<Vec<f64>>,
    pub breadth: BreadthSample,
    /// 20-day returns of the cyclical indices (Bank, Metal, Realty, Auto).
    pub cyclical_returns: Vec<f64>,
    /// 20-day returns of the defensive indices (Pharma, FMCG, IT).
    pub defensive_returns: Vec<f64>,
}

/// Trend sub-score: 20 points per layer of the MA stack.
fn trend_score(nifty_bars: &[Bar]) -> f64 {
    if nifty_bars.len() < 200 {
        return 0.0;
    }
    let closes: Vec<f64> = nifty_bars.iter().map(|b| b.close).collect();
    let close = closes[closes.len() - 1];
    let sma_20_series = sma(&closes, 20);
    let sma_50_series = sma(&closes, 50);
    let sma_200_series = sma(&closes, 200);
    let sma_20 = *sma_20_series.last().unwrap();
    let sma_50 = *sma_50_series.last().unwrap();
    let sma_200 = *sma_200_series.last().unwrap();

    let mut score = 0.0;
    if close > sma_20 {
        score += 20.0;
    }
    if close > sma_50 {
        score += 20.0;
    }
    if close > sma_200 {
        score += 20.0;
    }
    if sma_20 > sma_50 && sma_50 > sma_200 {
        score += 20.0;
    }
    if ma_slope(&sma_20_series, 20) > 0.0
        && ma_slope(&sma_50_series, 50) > 0.0
        && ma_slope(&sma_200_series, 200) > 0.0
    {
        score += 20.0;
    }
    score
}

/// Breadth sub-score: 20% of the universe above its MA maps to 0 and 80%
/// to 100, weighted 60/40 toward the 200 DMA.
fn breadth_score(sample: &BreadthSample) -> f64 {
    if sample.total == 0 {
        return 50.0;
    }
    let part = |count: usize| {
        let frac = count as f64 / sample.total as f64;
        ((frac - 0.20) / 0.60 * 100.0).clamp(0.0, 100.0)
    };
    0.6 * part(sample.above_200dma) + 0.4 * part(sample.above_50dma)
}

/// Volatility sub-score from the VIX series: absolute band (0-40) plus
/// direction (0-40) plus a no-spike bonus (0-20).
fn volatility_score(vix: &[f64]) -> f64 {
    let Some(&current) = vix.last() else {
        return 50.0;
    };

    let band = if current < 13.0 {
        40.0
    } else if current < 16.0 {
        35.0
    } else if current < 20.0 {
        25.0
    } else if current < 25.0 {
        10.0
    } else {
        0.0
    };

    let tail = &vix[vix.len().saturating_sub(10)..];
    let avg_10 = tail.iter().sum::<f64>() / tail.len() as f64;

    let direction = if current < avg_10 * 0.97 {
        40.0
    } else if current <= avg_10 * 1.03 {
        20.0
    } else {
        0.0
    };

    let no_spike = if current > avg_10 * 1.3 { 0.0 } else { 20.0 };

    band + direction + no_spike
}

/// Annualized realized-vol stand-in for a missing VIX series.
fn synthetic_vix(nifty_bars: &[Bar]) -> Vec<f64> {
    let closes: Vec<f64> = nifty_bars.iter().map(|b| b.close).collect();
    if closes.len() < 31 {
        return vec![];
    }
    // one synthetic reading per day over the last ~2 weeks
    (0..10)
        .rev()
        .filter_map(|back| {
            let end = closes.len() - back;
            if end < 21 {
                return None;
            }
            let vol = return_volatility(&closes[..end], 20);
            Some(vol * (252.0f64).sqrt() * 100.0)
        })
        .collect()
}

/// Leadership sub-score: banded cyclical-minus-defensive spread.
fn leadership_score(cyclical: &[f64], defensive: &[f64]) -> f64 {
    if cyclical.is_empty() || defensive.is_empty() {
        return 50.0;
    }
    let cyc = cyclical.iter().sum::<f64>() / cyclical.len() as f64;
    let def = defensive.iter().sum::<f64>() / defensive.len() as f64;
    let spread = cyc - def;

    if spread >= 0.03 {
        100.0
    } else if spread >= 0.01 {
        75.0
    } else if spread >= -0.01 {
        50.0
    } else if spread >= -0.03 {
        25.0
    } else {
        0.0
    }
}

/// Trend sub-scores below this are "weak" and halve conviction via the
/// 0.7 multiplier even in RISK_ON weeks.
const WEAK_TREND: f64 = 60.0;

/// Classify the week and derive the thresholds every downstream stage uses.
pub fn classify(
    inputs: &RegimeInputs,
    week: NaiveDate,
    calculated_at: DateTime<Utc>,
) -> Result<(RegimeAssessment, Thresholds), AnalysisError> {
    if inputs.nifty_bars.len() < 200 {
        return Err(AnalysisError::BenchmarkUnavailable(format!(
            "{} Nifty bars, need 200",
            inputs.nifty_bars.len()
        )));
    }

    let vix_series = match &inputs.vix_closes {
        Some(v) if !v.is_empty() => v.clone(),
        _ => synthetic_vix(&inputs.nifty_bars),
    };

    let subscores = RegimeSubscores {
        trend: trend_score(&inputs.nifty_bars),
        breadth: breadth_score(&inputs.breadth),
        volatility: volatility_score(&vix_series),
        leadership: leadership_score(&inputs.cyclical_returns, &inputs.defensive_returns),
    };
    let composite = subscores.composite();

    let state = if composite >= 70.0 {
        RegimeState::RiskOn
    } else if composite >= 40.0 {
        RegimeState::Choppy
    } else {
        RegimeState::RiskOff
    };

    let mut thresholds = Thresholds::for_regime(state);
    if state == RegimeState::RiskOn && subscores.trend < WEAK_TREND {
        thresholds.multiplier = 0.7;
    }

    // Distance from the nearest classification boundary drives confidence.
    let boundary_distance = (composite - 70.0).abs().min((composite - 40.0).abs());
    let confidence = (0.5 + boundary_distance / 60.0).clamp(0.0, 1.0);

    let reasoning = format!(
        "{} (composite {:.1}: trend {:.0}, breadth {:.0}, vol {:.0}, leadership {:.0})",
        state.as_str(),
        composite,
        subscores.trend,
        subscores.breadth,
        subscores.volatility,
        subscores.leadership
    );

    let assessment = RegimeAssessment {
        week,
        state,
        composite,
        confidence,
        subscores,
        multiplier: thresholds.multiplier,
        reasoning,
        calculated_at,
    };
    Ok((assessment, thresholds))
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

    fn nifty_bars(n: usize, step: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let p = 20_000.0 + step * i as f64;
                Bar {
                    date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
                        + chrono::Duration::days(i as i64),
                    open: p,
                    high: p + 50.0,
                    low: p - 50.0,
                    close: p,
                    volume: 1e9,
                }
            })
            .collect()
    }

    fn bullish_inputs() -> RegimeInputs {
        RegimeInputs {
            nifty_bars: nifty_bars(300, 20.0),
            vix_closes: Some(vec![14.0, 13.5, 13.2, 13.0, 12.8, 12.5, 12.4, 12.2, 12.0, 11.8]),
            breadth: BreadthSample {
                above_200dma: 75,
                above_50dma: 70,
                total: 100,
            },
            cyclical_returns: vec![0.05, 0.04, 0.06, 0.05],
            defensive_returns: vec![0.01, 0.00, 0.01],
        }
    }

    fn bearish_inputs() -> RegimeInputs {
        RegimeInputs {
            nifty_bars: nifty_bars(300, -20.0),
            vix_closes: Some(vec![20.0, 22.0, 24.0, 25.0, 26.0, 27.0, 28.0, 30.0, 32.0, 34.0]),
            breadth: BreadthSample {
                above_200dma: 12,
                above_50dma: 18,
                total: 100,
            },
            cyclical_returns: vec![-0.06, -0.08, -0.05, -0.07],
            defensive_returns: vec![-0.01, 0.00, -0.02],
        }
    }

    #[test]
    fn bullish_market_is_risk_on() {
        let (assessment, thresholds) = classify(&bullish_inputs(), week(), now()).unwrap();
        assert_eq!(assessment.state, RegimeState::RiskOn);
        assert_eq!(assessment.multiplier, 1.0);
        assert_eq!(thresholds.rr_floor, 2.0);
        assert!(assessment.composite >= 70.0);
    }

    #[test]
    fn bearish_market_is_risk_off_with_zero_multiplier() {
        let (assessment, thresholds) = classify(&bearish_inputs(), week(), now()).unwrap();
        assert_eq!(assessment.state, RegimeState::RiskOff);
        assert_eq!(assessment.multiplier, 0.0);
        assert!(thresholds.allowed_setups.is_empty());
        assert!(assessment.composite < 40.0);
    }

    #[test]
    fn mixed_market_is_choppy() {
        let mut inputs = bullish_inputs();
        // flat index, middling breadth, elevated but stable vol
        inputs.nifty_bars = nifty_bars(300, 0.0);
        inputs.breadth = BreadthSample {
            above_200dma: 50,
            above_50dma: 55,
            total: 100,
        };
        inputs.vix_closes = Some(vec![18.0; 10]);
        inputs.cyclical_returns = vec![0.0, 0.01, -0.01, 0.0];
        inputs.defensive_returns = vec![0.0, 0.01, 0.0];

        let (assessment, thresholds) = classify(&inputs, week(), now()).unwrap();
        assert_eq!(assessment.state, RegimeState::Choppy);
        assert_eq!(assessment.multiplier, 0.5);
        assert_eq!(thresholds.rr_floor, 2.5);
        assert_eq!(
            thresholds.allowed_setups,
            vec![analyzer_core::SetupType::Pullback]
        );
    }

    #[test]
    fn weak_trend_risk_on_drops_to_07() {
        let mut inputs = bullish_inputs();
        // index below its short MAs but everything else euphoric
        let n = inputs.nifty_bars.len();
        for bar in inputs.nifty_bars[n - 30..].iter_mut() {
            bar.close *= 0.96;
            bar.open = bar.close;
            bar.high = bar.close + 50.0;
            bar.low = bar.close - 50.0;
        }
        inputs.vix_closes = Some(vec![12.0; 10]);
        inputs.breadth = BreadthSample {
            above_200dma: 90,
            above_50dma: 85,
            total: 100,
        };

        let (assessment, _) = classify(&inputs, week(), now()).unwrap();
        if assessment.state == RegimeState::RiskOn {
            assert!(assessment.subscores.trend < WEAK_TREND);
            assert_eq!(assessment.multiplier, 0.7);
        }
    }

    #[test]
    fn vix_spike_zeroes_direction_and_spike_points() {
        // stable 14s then a spike to 19: band 25 (16..20), direction 0
        // (rising), spike 0 (19 > 1.3 x 14.5 avg)
        let vix = vec![14.0, 14.0, 14.0, 14.0, 14.0, 14.0, 14.0, 14.0, 14.0, 19.0];
        let score = volatility_score(&vix);
        assert_eq!(score, 25.0);
    }

    #[test]
    fn missing_vix_falls_back_to_realized_vol() {
        let mut inputs = bullish_inputs();
        inputs.vix_closes = None;
        let (assessment, _) = classify(&inputs, week(), now()).unwrap();
        // a smooth uptrend has tiny realized vol -> top volatility band
        assert!(assessment.subscores.volatility >= 80.0);
    }

    #[test]
    fn leadership_bands() {
        assert_eq!(leadership_score(&[0.05], &[0.01]), 100.0);
        assert_eq!(leadership_score(&[0.02], &[0.005]), 75.0);
        assert_eq!(leadership_score(&[0.01], &[0.01]), 50.0);
        assert_eq!(leadership_score(&[-0.02], &[0.0]), 25.0);
        assert_eq!(leadership_score(&[-0.05], &[0.0]), 0.0);
    }

    #[test]
    fn short_benchmark_history_is_fatal() {
        let mut inputs = bullish_inputs();
        inputs.nifty_bars.truncate(100);
        assert!(matches!(
            classify(&inputs, week(), now()),
            Err(AnalysisError::BenchmarkUnavailable(_))
        ));
    }
}
