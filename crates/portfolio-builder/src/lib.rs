//! Portfolio construction (stage S6).
//!
//! Greedy conviction-ordered selection under four constraints: pairwise
//! return correlation, per-sector position count, per-sector value cap,
//! and the regime's cash reserve. RISK_OFF short-circuits to an empty
//! book.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};

use analyzer_core::{
    EngineConfig, PortfolioAllocation, PortfolioPosition, PositionSize, RecommendationStatus,
    RegimeState, Thresholds, TradeSetup,
};

/// Maximum absolute pairwise 60-day return correlation for kept pairs.
pub const MAX_CORRELATION: f64 = 0.70;

/// Pearson correlation over the overlapping tail of two return series.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];

    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// Symmetric pairwise correlation lookup for the candidate set. Unknown
/// pairs read as uncorrelated.
pub struct CorrelationMatrix {
    index: HashMap<String, usize>,
    values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    /// Build from per-symbol daily return series (60-day tails).
    pub fn from_returns(series: &[(String, Vec<f64>)]) -> Self {
        let n = series.len();
        let mut values = vec![vec![0.0; n]; n];
        for i in 0..n {
            values[i][i] = 1.0;
            for j in (i + 1)..n {
                let corr = pearson(&series[i].1, &series[j].1);
                values[i][j] = corr;
                values[j][i] = corr;
            }
        }
        let index = series
            .iter()
            .enumerate()
            .map(|(i, (symbol, _))| (symbol.clone(), i))
            .collect();
        Self { index, values }
    }

    pub fn get(&self, a: &str, b: &str) -> f64 {
        match (self.index.get(a), self.index.get(b)) {
            (Some(&i), Some(&j)) => self.values[i][j],
            _ => 0.0,
        }
    }
}

/// A sized setup entering selection.
pub struct Candidate {
    pub size: PositionSize,
    pub setup: TradeSetup,
}

/// Greedy constrained selection.
///
/// Candidates that fail sizing are ignored; the rest are taken best-first
/// by quality composite, skipping any that would breach the correlation,
/// sector, or cash constraints. Skips are counted for the funnel readout.
pub fn construct_portfolio(
    mut candidates: Vec<Candidate>,
    correlations: &CorrelationMatrix,
    thresholds: &Thresholds,
    config: &EngineConfig,
    week: NaiveDate,
    calculated_at: DateTime<Utc>,
) -> PortfolioAllocation {
    if thresholds.regime == RegimeState::RiskOff || thresholds.multiplier == 0.0 {
        return empty_allocation(
            week,
            thresholds.regime,
            "risk-off regime: no new positions",
            calculated_at,
        );
    }

    candidates.retain(|c| c.size.qualifies && c.size.final_shares >= 1);
    candidates.sort_by(|a, b| {
        b.size
            .quality_composite
            .partial_cmp(&a.size.quality_composite)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let investable = (1.0 - thresholds.cash_reserve_pct) * config.portfolio_value;
    let sector_cap_value = config.max_sector_pct * config.portfolio_value;

    let mut selected: Vec<&Candidate> = Vec::new();
    let mut sector_count: HashMap<String, usize> = HashMap::new();
    let mut sector_value: HashMap<String, f64> = HashMap::new();
    let mut cumulative_value = 0.0;
    let mut correlation_filtered = 0u32;
    let mut sector_filtered = 0u32;

    for candidate in &candidates {
        if selected.len() >= config.max_positions {
            break;
        }

        let symbol = &candidate.size.symbol;
        let value = candidate.size.position_value;
        let sector = candidate.size.sector.clone();

        let too_correlated = selected
            .iter()
            .any(|s| correlations.get(symbol, &s.size.symbol).abs() > MAX_CORRELATION);
        if too_correlated {
            correlation_filtered += 1;
            continue;
        }

        if sector_count.get(&sector).copied().unwrap_or(0) >= config.max_sector_positions {
            sector_filtered += 1;
            continue;
        }
        if sector_value.get(&sector).copied().unwrap_or(0.0) + value > sector_cap_value {
            sector_filtered += 1;
            continue;
        }

        if cumulative_value + value > investable {
            continue;
        }

        selected.push(candidate);
        *sector_count.entry(sector.clone()).or_insert(0) += 1;
        *sector_value.entry(sector).or_insert(0.0) += value;
        cumulative_value += value;
    }

    let positions: Vec<PortfolioPosition> = selected
        .iter()
        .enumerate()
        .map(|(i, c)| PortfolioPosition {
            rank: (i + 1) as u32,
            symbol: c.size.symbol.clone(),
            sector: c.size.sector.clone(),
            setup_type: c.size.setup_type,
            entry_low: c.setup.entry_low,
            entry_high: c.setup.entry_high,
            stop: c.setup.stop,
            target_1: c.setup.target_1,
            target_2: c.setup.target_2,
            rr: c.setup.rr,
            shares: c.size.final_shares,
            position_value: c.size.position_value,
            risk_amount: c.size.final_risk,
            position_pct: c.size.position_pct,
            quality_composite: c.size.quality_composite,
        })
        .collect();

    let total_value: f64 = positions.iter().map(|p| p.position_value).sum();
    let total_risk: f64 = positions.iter().map(|p| p.risk_amount).sum();
    let sector_allocation: BTreeMap<String, f64> = sector_value
        .iter()
        .map(|(sector, value)| (sector.clone(), value / config.portfolio_value * 100.0))
        .collect();

    let reason = if positions.is_empty() {
        Some("no candidate cleared the portfolio constraints".to_string())
    } else {
        None
    };

    PortfolioAllocation {
        week,
        regime_state: thresholds.regime,
        positions,
        sector_allocation,
        allocated_pct: total_value / config.portfolio_value * 100.0,
        cash_pct: 100.0 - total_value / config.portfolio_value * 100.0,
        total_risk_pct: total_risk / config.portfolio_value * 100.0,
        correlation_filtered,
        sector_filtered,
        status: RecommendationStatus::Draft,
        reason,
        calculated_at,
    }
}

fn empty_allocation(
    week: NaiveDate,
    regime: RegimeState,
    reason: &str,
    calculated_at: DateTime<Utc>,
) -> PortfolioAllocation {
    PortfolioAllocation {
        week,
        regime_state: regime,
        positions: vec![],
        sector_allocation: BTreeMap::new(),
        allocated_pct: 0.0,
        cash_pct: 100.0,
        total_risk_pct: 0.0,
        correlation_filtered: 0,
        sector_filtered: 0,
        status: RecommendationStatus::Draft,
        reason: Some(reason.to_string()),
        calculated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyzer_core::{SetupType, StopMethod};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 25, 0, 0, 0).unwrap()
    }

    fn week() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 27).unwrap()
    }

    fn candidate(symbol: &str, sector: &str, quality: f64, value: f64) -> Candidate {
        let mid = 100.0;
        let shares = (value / mid) as u64;
        let setup = TradeSetup {
            symbol: symbol.to_string(),
            week: week(),
            setup_type: SetupType::Pullback,
            close: 102.0,
            entry_low: 99.0,
            entry_high: 101.0,
            stop: 96.0,
            stop_method: StopMethod::Structure,
            stop_distance_pct: 0.04,
            target_1: 108.0,
            target_2: 112.0,
            rr: 2.0,
            conditions_met: 4,
            confidence: 85.0,
            quality_composite: quality,
            calculated_at: now(),
        };
        let size = PositionSize {
            symbol: symbol.to_string(),
            week: week(),
            setup_type: SetupType::Pullback,
            sector: sector.to_string(),
            mid_entry: mid,
            stop: 96.0,
            stop_method: StopMethod::Structure,
            risk_per_share: 4.0,
            base_shares: shares,
            vol_adjustment: 1.0,
            kelly_fraction: 0.5,
            regime_multiplier: 1.0,
            final_shares: shares,
            position_value: value,
            final_risk: shares as f64 * 4.0,
            position_pct: value / 1_000_000.0,
            quality_composite: quality,
            qualifies: true,
            calculated_at: now(),
        };
        Candidate { size, setup }
    }

    fn no_correlation() -> CorrelationMatrix {
        CorrelationMatrix::from_returns(&[])
    }

    #[test]
    fn pearson_of_identical_series_is_one() {
        let series = vec![0.01, -0.02, 0.015, 0.005, -0.01];
        assert!((pearson(&series, &series) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn pearson_of_inverted_series_is_minus_one() {
        let a = vec![0.01, -0.02, 0.015, 0.005, -0.01];
        let b: Vec<f64> = a.iter().map(|v| -v).collect();
        assert!((pearson(&a, &b) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn correlated_pair_keeps_the_better_ranked() {
        // A and B move together; A ranks higher. C oscillates at a
        // completely different frequency.
        let base: Vec<f64> = (0..60).map(|i| (i as f64 * 0.3).sin() * 0.01).collect();
        let noisy: Vec<f64> = base.iter().map(|v| v * 0.95 + 0.001).collect();
        let other: Vec<f64> = (0..60)
            .map(|i| if i % 2 == 0 { 0.012 } else { -0.009 })
            .collect();
        let matrix = CorrelationMatrix::from_returns(&[
            ("AAA".to_string(), base),
            ("BBB".to_string(), noisy),
            ("CCC".to_string(), other),
        ]);
        assert!(matrix.get("AAA", "BBB") > 0.9);

        let allocation = construct_portfolio(
            vec![
                candidate("AAA", "Metals", 90.0, 50_000.0),
                candidate("BBB", "Energy", 85.0, 50_000.0),
                candidate("CCC", "Autos", 80.0, 50_000.0),
            ],
            &matrix,
            &Thresholds::for_regime(RegimeState::RiskOn),
            &EngineConfig::default(),
            week(),
            now(),
        );

        let symbols: Vec<&str> = allocation.positions.iter().map(|p| p.symbol.as_str()).collect();
        assert!(symbols.contains(&"AAA"));
        assert!(!symbols.contains(&"BBB"));
        assert!(symbols.contains(&"CCC"));
        assert_eq!(allocation.correlation_filtered, 1);
    }

    #[test]
    fn sector_count_cap_keeps_first_three() {
        let allocation = construct_portfolio(
            vec![
                candidate("A1", "Banks", 95.0, 40_000.0),
                candidate("A2", "Banks", 90.0, 40_000.0),
                candidate("A3", "Banks", 85.0, 40_000.0),
                candidate("A4", "Banks", 80.0, 40_000.0),
            ],
            &no_correlation(),
            &Thresholds::for_regime(RegimeState::RiskOn),
            &EngineConfig::default(),
            week(),
            now(),
        );
        assert_eq!(allocation.positions.len(), 3);
        assert_eq!(allocation.sector_filtered, 1);
        assert!(allocation
            .positions
            .iter()
            .all(|p| p.symbol != "A4"));
    }

    #[test]
    fn sector_value_cap_binds() {
        // three 100k positions in one sector would be 30% > 25% cap
        let allocation = construct_portfolio(
            vec![
                candidate("B1", "IT", 95.0, 100_000.0),
                candidate("B2", "IT", 90.0, 100_000.0),
                candidate("B3", "IT", 85.0, 100_000.0),
            ],
            &no_correlation(),
            &Thresholds::for_regime(RegimeState::RiskOn),
            &EngineConfig::default(),
            week(),
            now(),
        );
        assert_eq!(allocation.positions.len(), 2);
        assert_eq!(allocation.sector_filtered, 1);
        let it_pct = allocation.sector_allocation.get("IT").copied().unwrap_or(0.0);
        assert!(it_pct <= 25.0 + 1e-9);
    }

    #[test]
    fn cash_reserve_caps_total_allocation() {
        // 30% reserve leaves 700k investable; ten 100k candidates
        let candidates: Vec<Candidate> = (0..10)
            .map(|i| candidate(&format!("C{i}"), &format!("S{i}"), 90.0 - i as f64, 100_000.0))
            .collect();
        let allocation = construct_portfolio(
            candidates,
            &no_correlation(),
            &Thresholds::for_regime(RegimeState::RiskOn),
            &EngineConfig::default(),
            week(),
            now(),
        );
        assert_eq!(allocation.positions.len(), 7);
        assert!(allocation.allocated_pct <= 70.0 + 1e-9);
        assert!(allocation.cash_pct >= 30.0 - 1e-9);
    }

    #[test]
    fn risk_off_returns_empty_book() {
        let allocation = construct_portfolio(
            vec![candidate("X", "Banks", 95.0, 50_000.0)],
            &no_correlation(),
            &Thresholds::for_regime(RegimeState::RiskOff),
            &EngineConfig::default(),
            week(),
            now(),
        );
        assert!(allocation.positions.is_empty());
        assert_eq!(allocation.cash_pct, 100.0);
        assert!(allocation.reason.is_some());
    }

    #[test]
    fn starved_constraints_report_a_reason() {
        // a single unqualified candidate yields an empty book with reason
        let mut c = candidate("X", "Banks", 95.0, 50_000.0);
        c.size.qualifies = false;
        let allocation = construct_portfolio(
            vec![c],
            &no_correlation(),
            &Thresholds::for_regime(RegimeState::RiskOn),
            &EngineConfig::default(),
            week(),
            now(),
        );
        assert!(allocation.positions.is_empty());
        assert!(allocation.reason.is_some());
    }

    proptest! {
        /// The portfolio caps hold for arbitrary candidate sets.
        #[test]
        fn constraints_hold_for_arbitrary_candidates(
            specs in proptest::collection::vec(
                (0u8..6, 10_000.0f64..120_000.0, 50.0f64..100.0),
                0..20,
            )
        ) {
            let config = EngineConfig::default();
            let candidates: Vec<Candidate> = specs
                .iter()
                .enumerate()
                .map(|(i, (sector, value, quality))| {
                    candidate(&format!("SYM{i}"), &format!("SEC{sector}"), *quality, *value)
                })
                .collect();

            let allocation = construct_portfolio(
                candidates,
                &no_correlation(),
                &Thresholds::for_regime(RegimeState::RiskOn),
                &config,
                week(),
                now(),
            );

            // position count cap
            prop_assert!(allocation.positions.len() <= config.max_positions);

            // cash reserve cap
            let total: f64 = allocation.positions.iter().map(|p| p.position_value).sum();
            prop_assert!(total <= 0.70 * config.portfolio_value + 1e-6);

            // sector caps
            let mut by_sector: HashMap<&str, (usize, f64)> = HashMap::new();
            for p in &allocation.positions {
                let entry = by_sector.entry(p.sector.as_str()).or_insert((0, 0.0));
                entry.0 += 1;
                entry.1 += p.position_value;
            }
            for (count, value) in by_sector.values() {
                prop_assert!(*count <= config.max_sector_positions);
                prop_assert!(*value <= config.max_sector_pct * config.portfolio_value + 1e-6);
            }

            // level ordering invariant carried through from the setups
            for p in &allocation.positions {
                prop_assert!(p.stop < p.entry_low);
                prop_assert!(p.entry_low < p.entry_high);
                prop_assert!(p.entry_high < p.target_1);
                prop_assert!(p.target_1 <= p.target_2);
            }
        }
    }
}
