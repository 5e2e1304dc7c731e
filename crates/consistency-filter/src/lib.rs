//! Weekly-return consistency screening (stage S3).
//!
//! Nine metrics over the trailing 52 weeks (26- and 13-week windows for
//! recency), regime-adaptive gates, and a one-sided binomial significance
//! test that rejects stocks whose positive-week rate is statistically
//! indistinguishable from a coin flip.

use chrono::{DateTime, NaiveDate, Utc};

use analyzer_core::{AnalysisError, ConsistencyScore, Thresholds, WeeklyBar};

/// Minimum weekly observations; below this the symbol is skipped.
pub const MIN_WEEKS: usize = 40;

/// Significance level for the positive-week binomial test.
pub const SIGNIFICANCE_P: f64 = 0.10;

const RISK_FREE_WEEKLY: f64 = 0.06 / 52.0;

/// Raw per-symbol metrics before universe normalization.
#[derive(Debug, Clone)]
pub struct WeeklyMetrics {
    pub pos_pct: f64,
    pub plus3_pct: f64,
    pub plus5_pct: f64,
    pub avg_return: f64,
    pub std_dev: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_win_streak: u32,
    pub pos_pct_26w: f64,
    pub avg_return_13w: f64,
    pub positive_weeks: u32,
    pub total_weeks: u32,
}

/// Compute metrics from weekly returns (fractions), oldest first.
pub fn weekly_metrics(returns: &[f64]) -> Result<WeeklyMetrics, AnalysisError> {
    if returns.len() < MIN_WEEKS {
        return Err(AnalysisError::InsufficientData(format!(
            "{} weekly returns, need {MIN_WEEKS}",
            returns.len()
        )));
    }

    let window = &returns[returns.len().saturating_sub(52)..];
    let n = window.len() as f64;

    let positive_weeks = window.iter().filter(|r| **r > 0.0).count() as u32;
    let pos_pct = f64::from(positive_weeks) / n;
    let plus3_pct = window.iter().filter(|r| **r >= 0.03).count() as f64 / n;
    let plus5_pct = window.iter().filter(|r| **r >= 0.05).count() as f64 / n;

    let avg_return = window.iter().sum::<f64>() / n;
    let variance = window.iter().map(|r| (r - avg_return).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let sharpe = if std_dev > 0.0 {
        (avg_return - RISK_FREE_WEEKLY) / std_dev
    } else {
        0.0
    };

    let negatives: Vec<f64> = window.iter().copied().filter(|r| *r < 0.0).collect();
    let sortino = if negatives.len() >= 2 {
        let neg_mean = negatives.iter().sum::<f64>() / negatives.len() as f64;
        let downside = (negatives.iter().map(|r| (r - neg_mean).powi(2)).sum::<f64>()
            / negatives.len() as f64)
            .sqrt();
        if downside > 0.0 {
            (avg_return - RISK_FREE_WEEKLY) / downside
        } else {
            0.0
        }
    } else {
        sharpe
    };

    let mut max_win_streak = 0u32;
    let mut streak = 0u32;
    for r in window {
        if *r > 0.0 {
            streak += 1;
            max_win_streak = max_win_streak.max(streak);
        } else {
            streak = 0;
        }
    }

    let recent_26 = &returns[returns.len().saturating_sub(26)..];
    let pos_pct_26w = recent_26.iter().filter(|r| **r > 0.0).count() as f64
        / recent_26.len() as f64;

    let recent_13 = &returns[returns.len().saturating_sub(13)..];
    let avg_return_13w = recent_13.iter().sum::<f64>() / recent_13.len() as f64;

    Ok(WeeklyMetrics {
        pos_pct,
        plus3_pct,
        plus5_pct,
        avg_return,
        std_dev,
        sharpe,
        sortino,
        max_win_streak,
        pos_pct_26w,
        avg_return_13w,
        positive_weeks,
        total_weeks: window.len() as u32,
    })
}

/// Returns series from resampled weekly bars.
pub fn returns_from_weekly(bars: &[WeeklyBar]) -> Vec<f64> {
    bars.iter().filter_map(|b| b.weekly_return).collect()
}

/// One-sided binomial tail P(X >= k | n, 0.5).
///
/// Exact summation; n never exceeds 52 here so the iterative pmf stays
/// well inside f64 range.
pub fn binomial_sf(k: u32, n: u32) -> f64 {
    if k == 0 {
        return 1.0;
    }
    if k > n {
        return 0.0;
    }
    let mut pmf = 0.5f64.powi(n as i32); // P(X = 0)
    let mut tail = 0.0;
    for i in 0..n {
        pmf *= (n - i) as f64 / (i + 1) as f64;
        if i + 1 >= k {
            tail += pmf;
        }
    }
    tail.clamp(0.0, 1.0)
}

/// Universe min/max bounds used to normalize the composite score.
#[derive(Debug, Clone, Copy)]
pub struct UniverseStats {
    pub pos_min: f64,
    pub pos_max: f64,
    pub plus3_min: f64,
    pub plus3_max: f64,
    pub vol_min: f64,
    pub vol_max: f64,
    pub sharpe_min: f64,
    pub sharpe_max: f64,
}

impl UniverseStats {
    pub fn from_metrics<'a, I: Iterator<Item = &'a WeeklyMetrics>>(metrics: I) -> Self {
        let mut stats = Self {
            pos_min: f64::MAX,
            pos_max: f64::MIN,
            plus3_min: f64::MAX,
            plus3_max: f64::MIN,
            vol_min: f64::MAX,
            vol_max: f64::MIN,
            sharpe_min: f64::MAX,
            sharpe_max: f64::MIN,
        };
        let mut any = false;
        for m in metrics {
            any = true;
            stats.pos_min = stats.pos_min.min(m.pos_pct);
            stats.pos_max = stats.pos_max.max(m.pos_pct);
            stats.plus3_min = stats.plus3_min.min(m.plus3_pct);
            stats.plus3_max = stats.plus3_max.max(m.plus3_pct);
            stats.vol_min = stats.vol_min.min(m.std_dev);
            stats.vol_max = stats.vol_max.max(m.std_dev);
            stats.sharpe_min = stats.sharpe_min.min(m.sharpe);
            stats.sharpe_max = stats.sharpe_max.max(m.sharpe);
        }
        if !any {
            return Self::fallback();
        }
        stats
    }

    /// Bounds used when the universe is degenerate (single symbol).
    pub fn fallback() -> Self {
        Self {
            pos_min: 0.40,
            pos_max: 0.80,
            plus3_min: 0.10,
            plus3_max: 0.50,
            vol_min: 0.02,
            vol_max: 0.10,
            sharpe_min: -0.1,
            sharpe_max: 0.4,
        }
    }
}

fn normalize(value: f64, min: f64, max: f64, inverse: bool) -> f64 {
    if (max - min).abs() < f64::EPSILON {
        return 50.0;
    }
    let mut norm = (value - min) / (max - min);
    if inverse {
        norm = 1.0 - norm;
    }
    (norm * 100.0).clamp(0.0, 100.0)
}

/// Composite consistency score, 0-100.
///
/// 25% positive weeks + 25% +3% weeks + 20% inverse volatility +
/// 15% Sharpe + 15% recent win behavior.
pub fn consistency_score(m: &WeeklyMetrics, stats: &UniverseStats) -> f64 {
    let pos_n = normalize(m.pos_pct, stats.pos_min, stats.pos_max, false);
    let plus3_n = normalize(m.plus3_pct, stats.plus3_min, stats.plus3_max, false);
    let vol_n = normalize(m.std_dev, stats.vol_min, stats.vol_max, true);
    let sharpe_n = normalize(m.sharpe, stats.sharpe_min, stats.sharpe_max, false);
    // recent 26-week positive rate over a fixed 40-80% band
    let streak_n = normalize(m.pos_pct_26w, 0.40, 0.80, false);

    0.25 * pos_n + 0.25 * plus3_n + 0.20 * vol_n + 0.15 * sharpe_n + 0.15 * streak_n
}

/// Recent-vs-history performance ratio, clipped to [0, 3].
pub fn regime_score(avg_13w: f64, avg_52w: f64) -> f64 {
    if avg_52w <= 0.0 {
        return if avg_13w > 0.0 { 2.0 } else { 1.0 };
    }
    (avg_13w / avg_52w).clamp(0.0, 3.0)
}

/// Final ranking score.
pub fn final_score(consistency: f64, regime: f64, sharpe: f64, percentile: f64) -> f64 {
    let regime_n = ((regime - 0.5) / 2.5 * 100.0).clamp(0.0, 100.0);
    let sharpe_n = ((sharpe + 0.1) / 0.5 * 100.0).clamp(0.0, 100.0);
    (0.40 * consistency + 0.25 * regime_n + 0.20 * percentile + 0.15 * sharpe_n)
        .clamp(0.0, 100.0)
}

/// Score a batch of symbols under the run's regime thresholds.
///
/// Normalization and percentile rank are relative to the batch, so the
/// whole stage scores in one call; symbols with short history should be
/// dropped before this point.
pub fn score_batch(
    metrics_by_symbol: &[(String, WeeklyMetrics)],
    thresholds: &Thresholds,
    week: NaiveDate,
    calculated_at: DateTime<Utc>,
) -> Vec<ConsistencyScore> {
    if metrics_by_symbol.is_empty() {
        return vec![];
    }

    let stats = if metrics_by_symbol.len() >= 2 {
        UniverseStats::from_metrics(metrics_by_symbol.iter().map(|(_, m)| m))
    } else {
        UniverseStats::fallback()
    };

    let mut scored: Vec<(String, f64)> = metrics_by_symbol
        .iter()
        .map(|(symbol, m)| (symbol.clone(), consistency_score(m, &stats)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let n = scored.len() as f64;
    let percentile_of = |symbol: &str| {
        scored
            .iter()
            .position(|(s, _)| s == symbol)
            .map(|i| (n - i as f64) / n * 100.0)
            .unwrap_or(50.0)
    };

    let mut results: Vec<ConsistencyScore> = metrics_by_symbol
        .iter()
        .map(|(symbol, m)| {
            let cons = consistency_score(m, &stats);
            let regime = regime_score(m.avg_return_13w, m.avg_return);
            let percentile = percentile_of(symbol);
            let fin = final_score(cons, regime, m.sharpe, percentile);

            let passes_pos = m.pos_pct >= thresholds.pos_pct_min;
            let passes_plus3 = m.plus3_pct >= thresholds.plus3_pct_min
                && m.plus3_pct <= thresholds.plus3_pct_max;
            let passes_vol = m.std_dev <= thresholds.std_dev_max;
            let passes_sharpe = m.sharpe >= thresholds.sharpe_min;
            let passes_consistency = cons >= 75.0;
            let passes_regime = regime >= 1.0;

            let filters_passed = [
                passes_pos,
                passes_plus3,
                passes_vol,
                passes_sharpe,
                passes_consistency,
                passes_regime,
            ]
            .iter()
            .filter(|b| **b)
            .count() as u8;

            let binomial_p = binomial_sf(m.positive_weeks, m.total_weeks);
            let significant = binomial_p < SIGNIFICANCE_P;

            ConsistencyScore {
                symbol: symbol.clone(),
                week,
                pos_pct: m.pos_pct,
                plus3_pct: m.plus3_pct,
                plus5_pct: m.plus5_pct,
                avg_return: m.avg_return,
                std_dev: m.std_dev,
                sharpe: m.sharpe,
                sortino: m.sortino,
                max_win_streak: m.max_win_streak,
                pos_pct_26w: m.pos_pct_26w,
                avg_return_13w: m.avg_return_13w,
                consistency_score: cons,
                regime_score: regime,
                percentile,
                final_score: fin,
                binomial_p,
                significant,
                filters_passed,
                // the significance test is a hard reject on top of 5-of-6
                qualifies: filters_passed >= 5 && significant,
                market_regime: thresholds.regime,
                calculated_at,
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyzer_core::RegimeState;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 25, 0, 0, 0).unwrap()
    }

    fn week() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 27).unwrap()
    }

    /// ~71% positive weeks with ~31% at +3%: a textbook steady compounder.
    fn steady_returns() -> Vec<f64> {
        let cycle = [
            0.035, 0.015, -0.015, 0.015, 0.035, -0.015, 0.015, 0.015, 0.035, -0.015, 0.015,
            0.035, -0.015,
        ];
        let mut returns: Vec<f64> = cycle.iter().cycle().take(52).copied().collect();
        // one fewer losing week in the recent quarter keeps regime >= 1
        returns[48] = 0.015;
        returns
    }

    #[test]
    fn thirty_nine_weeks_is_a_skip_forty_runs() {
        let returns = vec![0.01; 39];
        assert!(matches!(
            weekly_metrics(&returns),
            Err(AnalysisError::InsufficientData(_))
        ));
        let returns = vec![0.01; 40];
        assert!(weekly_metrics(&returns).is_ok());
    }

    #[test]
    fn metrics_count_the_window() {
        let m = weekly_metrics(&steady_returns()).unwrap();
        assert_eq!(m.total_weeks, 52);
        assert!(m.pos_pct > 0.6 && m.pos_pct < 0.72, "pos {}", m.pos_pct);
        assert!(m.std_dev < 0.02);
        assert!(m.sharpe > 0.15);
        assert!(m.max_win_streak >= 2);
    }

    #[test]
    fn binomial_tail_matches_known_values() {
        // 27/52 positive: indistinguishable from a coin flip
        let p = binomial_sf(27, 52);
        assert!(p > 0.39 && p < 0.48, "p {p}");

        // 34/52 positive: clearly better than chance
        let p = binomial_sf(34, 52);
        assert!(p < 0.03, "p {p}");

        // degenerate edges
        assert_eq!(binomial_sf(0, 52), 1.0);
        assert!(binomial_sf(52, 52) > 0.0);
        assert_eq!(binomial_sf(53, 52), 0.0);
    }

    #[test]
    fn coin_flip_stock_is_rejected_despite_good_metrics() {
        // 27/52 positive weeks with juicy wins: metrics can look fine but
        // the significance test must kill it
        let returns: Vec<f64> = (0..52)
            .map(|i| if i % 2 == 0 { 0.03 } else { -0.01 })
            .collect();
        let m = weekly_metrics(&returns).unwrap();
        let scores = score_batch(
            &[("FLIPPER".to_string(), m)],
            &Thresholds::for_regime(RegimeState::RiskOn),
            week(),
            now(),
        );
        assert!(!scores[0].significant);
        assert!(!scores[0].qualifies);
    }

    #[test]
    fn steady_winner_qualifies_in_risk_on() {
        let m = weekly_metrics(&steady_returns()).unwrap();
        let scores = score_batch(
            &[("STEADY".to_string(), m)],
            &Thresholds::for_regime(RegimeState::RiskOn),
            week(),
            now(),
        );
        let s = &scores[0];
        assert!(s.significant, "p {}", s.binomial_p);
        assert!(s.filters_passed >= 5, "passed {}", s.filters_passed);
        assert!(s.qualifies);
    }

    #[test]
    fn bear_thresholds_are_stricter() {
        // volatility that passes RISK_ON (0.065) but fails RISK_OFF (0.045)
        let returns: Vec<f64> = (0..52)
            .map(|i| if i % 3 == 2 { -0.06 } else { 0.055 })
            .collect();
        let m = weekly_metrics(&returns).unwrap();
        assert!(m.std_dev > 0.045 && m.std_dev <= 0.065);

        let bull = score_batch(
            &[("VOLATILE".to_string(), m.clone())],
            &Thresholds::for_regime(RegimeState::RiskOn),
            week(),
            now(),
        );
        let bear = score_batch(
            &[("VOLATILE".to_string(), m)],
            &Thresholds::for_regime(RegimeState::RiskOff),
            week(),
            now(),
        );
        let vol_ok_bull = bull[0].std_dev <= 0.065;
        let vol_ok_bear = bear[0].std_dev <= 0.045;
        assert!(vol_ok_bull);
        assert!(!vol_ok_bear);
        assert!(bull[0].filters_passed > bear[0].filters_passed);
    }

    #[test]
    fn regime_score_edge_cases() {
        assert_eq!(regime_score(0.01, 0.0), 2.0);
        assert_eq!(regime_score(-0.01, -0.02), 1.0);
        assert_eq!(regime_score(0.09, 0.01), 3.0); // clipped
        assert_eq!(regime_score(0.0, 0.01), 0.0);
    }

    #[test]
    fn percentile_ranks_batch_members() {
        let strong = weekly_metrics(&steady_returns()).unwrap();
        let weak_returns: Vec<f64> = (0..52)
            .map(|i| if i % 2 == 0 { 0.01 } else { -0.015 })
            .collect();
        let weak = weekly_metrics(&weak_returns).unwrap();

        let scores = score_batch(
            &[("STRONG".to_string(), strong), ("WEAK".to_string(), weak)],
            &Thresholds::for_regime(RegimeState::RiskOn),
            week(),
            now(),
        );
        assert_eq!(scores[0].symbol, "STRONG");
        assert!(scores[0].percentile > scores[1].percentile);
    }
}
