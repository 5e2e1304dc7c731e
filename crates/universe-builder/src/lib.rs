//! Universe construction and quality tiering (stage S1).
//!
//! Joins the NSE instruments list with MTF eligibility and Nifty index
//! membership into quality-scored, tiered stock records. MTF eligibility is
//! the primary quality signal (exchange-vetted liquidity and volatility);
//! index membership adds a size/liquidity bonus on top.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use analyzer_core::{FundamentalSnapshot, Instrument, QualityTier, StockRecord};

/// Index membership sets for one refresh.
#[derive(Debug, Default)]
pub struct IndexMembership {
    pub nifty_50: HashSet<String>,
    pub nifty_100: HashSet<String>,
    pub nifty_200: HashSet<String>,
    pub nifty_500: HashSet<String>,
}

impl IndexMembership {
    pub fn from_lists(
        nifty_50: Vec<String>,
        nifty_100: Vec<String>,
        nifty_200: Vec<String>,
        nifty_500: Vec<String>,
    ) -> Self {
        Self {
            nifty_50: nifty_50.into_iter().collect(),
            nifty_100: nifty_100.into_iter().collect(),
            nifty_200: nifty_200.into_iter().collect(),
            nifty_500: nifty_500.into_iter().collect(),
        }
    }
}

/// Quality score for one symbol: MTF base plus the best index bonus.
///
/// A symbol that is neither MTF-eligible nor in any Nifty index lands in
/// tier D and is excluded from the pipeline.
pub fn quality_score(is_mtf: bool, membership: &IndexMembership, symbol: &str) -> f64 {
    let base = if is_mtf { 40.0 } else { 0.0 };
    let bonus = if membership.nifty_50.contains(symbol) {
        50.0
    } else if membership.nifty_100.contains(symbol) {
        35.0
    } else if membership.nifty_200.contains(symbol) {
        25.0
    } else if membership.nifty_500.contains(symbol) {
        20.0
    } else {
        0.0
    };
    base + bonus
}

/// Score and tier the full instruments list. Output is sorted best first.
pub fn build_universe(
    instruments: &[Instrument],
    mtf_symbols: &HashSet<String>,
    membership: &IndexMembership,
    calculated_at: DateTime<Utc>,
) -> Vec<StockRecord> {
    let mut records: Vec<StockRecord> = instruments
        .iter()
        .map(|inst| {
            let is_mtf = mtf_symbols.contains(&inst.symbol);
            let score = quality_score(is_mtf, membership, &inst.symbol);
            StockRecord {
                symbol: inst.symbol.clone(),
                name: inst.name.clone(),
                isin: inst.isin.clone(),
                sector: inst.sector.clone().unwrap_or_else(|| "Unknown".to_string()),
                lot_size: inst.lot_size,
                tick_size: inst.tick_size,
                is_mtf,
                in_nifty_50: membership.nifty_50.contains(&inst.symbol),
                in_nifty_100: membership.nifty_100.contains(&inst.symbol),
                in_nifty_200: membership.nifty_200.contains(&inst.symbol),
                in_nifty_500: membership.nifty_500.contains(&inst.symbol),
                quality_score: score,
                tier: QualityTier::from_score(score),
                active: true,
                fundamental_score: None,
                calculated_at,
            }
        })
        .collect();

    records.sort_by(|a, b| {
        b.quality_score
            .partial_cmp(&a.quality_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    records
}

/// Tier counts for the run summary log.
pub fn tier_counts(records: &[StockRecord]) -> (usize, usize, usize, usize) {
    let mut counts = (0, 0, 0, 0);
    for r in records {
        match r.tier {
            QualityTier::A => counts.0 += 1,
            QualityTier::B => counts.1 += 1,
            QualityTier::C => counts.2 += 1,
            QualityTier::D => counts.3 += 1,
        }
    }
    counts
}

/// Fundamental score (0-100) from the optional monthly snapshot.
///
/// 30% growth + 25% profitability + 20% leverage + 15% cash flow +
/// 10% earnings quality. Financial-sector names get looser ROCE and D/E
/// hurdles (leverage is their business).
pub fn fundamental_score(data: &FundamentalSnapshot, sector: &str) -> f64 {
    let is_financial = matches!(
        sector,
        "Banks" | "NBFC" | "Insurance" | "Financial Services" | "Finance"
    );

    let eps_score = (data.eps_qoq_growth / 0.10 * 100.0).clamp(0.0, 100.0);
    let rev_score = (data.revenue_yoy_growth / 0.15 * 100.0).clamp(0.0, 100.0);
    let growth = 0.6 * eps_score + 0.4 * rev_score;

    let roce_hurdle = if is_financial { 12.0 } else { 18.0 };
    let roce_score = (data.roce / (roce_hurdle * 1.5) * 100.0).clamp(0.0, 100.0);
    let roe_score = (data.roe / 30.0 * 100.0).clamp(0.0, 100.0);
    let profitability = 0.5 * roce_score + 0.5 * roe_score;

    let de_hurdle = if is_financial { 4.0 } else { 0.8 };
    let leverage = if data.debt_equity <= 0.0 {
        100.0
    } else if data.debt_equity < de_hurdle {
        (100.0 - data.debt_equity / de_hurdle * 100.0).max(0.0)
    } else {
        (50.0 - (data.debt_equity - de_hurdle) / de_hurdle * 50.0).max(0.0)
    };

    let cash_flow = if data.fcf_yield > 0.0 {
        (data.fcf_yield / 0.08 * 100.0).min(100.0)
    } else {
        (50.0 + data.fcf_yield * 1000.0).max(0.0)
    };

    let earnings_quality = (data.cash_eps_ratio * 100.0).clamp(0.0, 100.0);

    0.30 * growth + 0.25 * profitability + 0.20 * leverage + 0.15 * cash_flow
        + 0.10 * earnings_quality
}
