//! Recommendation assembly (stage S8).
//!
//! Joins per-symbol stage outputs into trade cards with a 0-10 conviction
//! score, action steps, a Monday gap contingency and invalidation rules,
//! then wraps the cards into the weekly recommendation document.

use chrono::{DateTime, NaiveDate, Utc};

use analyzer_core::{
    ConsistencyScore, FunnelCounts, IndicatorSet, LiquidityScore, MomentumScore,
    PortfolioAllocation, PositionSize, RecommendationStatus, RegimeAssessment, StockRecord,
    TradeCard, TradeSetup, WeeklyRecommendation,
};

/// Conviction weights: momentum, consistency, liquidity, fundamental,
/// setup confidence.
const W_MOMENTUM: f64 = 0.25;
const W_CONSISTENCY: f64 = 0.20;
const W_LIQUIDITY: f64 = 0.15;
const W_FUNDAMENTAL: f64 = 0.20;
const W_SETUP: f64 = 0.20;

/// Conviction 0-10 plus its label.
///
/// When the monthly fundamental snapshot is absent its weight renormalizes
/// across the present components instead of silently scoring it zero.
pub fn conviction(
    momentum: f64,
    consistency: f64,
    liquidity: f64,
    fundamental: Option<f64>,
    setup_confidence: f64,
) -> (f64, String) {
    let mut weighted = W_MOMENTUM * momentum
        + W_CONSISTENCY * consistency
        + W_LIQUIDITY * liquidity
        + W_SETUP * setup_confidence;
    let mut weight_sum = W_MOMENTUM + W_CONSISTENCY + W_LIQUIDITY + W_SETUP;

    if let Some(f) = fundamental {
        weighted += W_FUNDAMENTAL * f;
        weight_sum += W_FUNDAMENTAL;
    }

    let score = (weighted / weight_sum / 10.0).clamp(0.0, 10.0);
    (score, conviction_label(score).to_string())
}

pub fn conviction_label(score: f64) -> &'static str {
    if score >= 8.0 {
        "Very High"
    } else if score >= 6.5 {
        "High"
    } else if score >= 5.0 {
        "Medium"
    } else if score >= 3.5 {
        "Low"
    } else {
        "Very Low"
    }
}

/// Everything a card joins across the stages for one symbol.
pub struct CardInputs<'a> {
    pub stock: &'a StockRecord,
    pub momentum: &'a MomentumScore,
    pub consistency: &'a ConsistencyScore,
    pub liquidity: &'a LiquidityScore,
    pub setup: &'a TradeSetup,
    pub size: &'a PositionSize,
    pub indicators: &'a IndicatorSet,
}

fn action_steps(card: &TradeCard) -> Vec<String> {
    vec![
        format!(
            "Place limit buy order in Rs.{:.2} - Rs.{:.2}",
            card.entry_low, card.entry_high
        ),
        format!(
            "Set stop-loss at Rs.{:.2} ({:.1}% below entry, {} stop)",
            card.stop,
            (1.0 - card.stop / ((card.entry_low + card.entry_high) / 2.0)) * 100.0,
            match card.stop_method {
                analyzer_core::StopMethod::Structure => "structure",
                analyzer_core::StopMethod::Volatility => "volatility",
            }
        ),
        format!(
            "Buy {} shares (Rs.{:.0}, {:.1}% of portfolio)",
            card.shares,
            card.investment,
            card.position_pct * 100.0
        ),
        format!(
            "Target 1: Rs.{:.2} ({:.1}R) - take 50% profit",
            card.target_1, card.rr
        ),
        format!("Target 2: Rs.{:.2} - exit remaining", card.target_2),
        "At +1R move stop to breakeven".to_string(),
        "At +2R trail stop to +1R".to_string(),
    ]
}

fn gap_contingency(entry_low: f64, entry_high: f64, stop: f64) -> String {
    [
        format!("open <= Rs.{stop:.2} (stop): SKIP"),
        format!("open in Rs.{entry_low:.2}-{entry_high:.2}: ENTER at open"),
        format!("open > Rs.{:.2} (+2%): SKIP, do not chase", entry_high * 1.02),
        format!("open between Rs.{stop:.2} and Rs.{entry_low:.2}: ENTER at open (small gap against)"),
        "otherwise: WAIT and watch for a pullback into the zone".to_string(),
    ]
    .join(" | ")
}

fn invalidation(card: &TradeCard) -> Vec<String> {
    vec![
        format!("Daily close below Rs.{:.2}", card.stop),
        "Not triggered by Friday close (setup expires)".to_string(),
        "Regime shifts to RISK_OFF before entry".to_string(),
    ]
}

/// Build one trade card from the joined stage outputs.
pub fn build_card(inputs: &CardInputs<'_>) -> TradeCard {
    let (score, label) = conviction(
        inputs.momentum.score,
        inputs.consistency.consistency_score,
        inputs.liquidity.score,
        inputs.stock.fundamental_score,
        inputs.setup.confidence,
    );

    let mut card = TradeCard {
        symbol: inputs.stock.symbol.clone(),
        name: inputs.stock.name.clone(),
        sector: inputs.stock.sector.clone(),
        week: inputs.setup.week,
        setup_type: inputs.setup.setup_type,
        momentum_score: inputs.momentum.score,
        consistency_score: inputs.consistency.consistency_score,
        liquidity_score: inputs.liquidity.score,
        fundamental_score: inputs.stock.fundamental_score,
        setup_confidence: inputs.setup.confidence,
        conviction: score,
        conviction_label: label,
        current_price: inputs.indicators.close,
        high_52w: inputs.indicators.high_52w,
        sma_20: inputs.indicators.sma_20,
        sma_50: inputs.indicators.sma_50,
        sma_200: inputs.indicators.sma_200,
        atr_14: inputs.indicators.atr_14,
        entry_low: inputs.setup.entry_low,
        entry_high: inputs.setup.entry_high,
        stop: inputs.setup.stop,
        stop_method: inputs.setup.stop_method,
        target_1: inputs.setup.target_1,
        target_2: inputs.setup.target_2,
        rr: inputs.setup.rr,
        shares: inputs.size.final_shares,
        investment: inputs.size.position_value,
        risk_amount: inputs.size.final_risk,
        position_pct: inputs.size.position_pct,
        action_steps: vec![],
        gap_contingency: gap_contingency(
            inputs.setup.entry_low,
            inputs.setup.entry_high,
            inputs.setup.stop,
        ),
        invalidation: vec![],
    };
    card.action_steps = action_steps(&card);
    card.invalidation = invalidation(&card);
    card
}

/// Wrap the cards into the weekly recommendation document. An empty card
/// list is a valid output (RISK_OFF or constraint starvation), recorded
/// with the regime snapshot and funnel counts.
pub fn assemble(
    week: NaiveDate,
    regime: &RegimeAssessment,
    allocation: &PortfolioAllocation,
    cards: Vec<TradeCard>,
    funnel: FunnelCounts,
    portfolio_value: f64,
    fatal_reasons: Vec<String>,
    created_at: DateTime<Utc>,
) -> WeeklyRecommendation {
    let allocated_capital: f64 = cards.iter().map(|c| c.investment).sum();
    let total_risk: f64 = cards.iter().map(|c| c.risk_amount).sum();
    let mut fatal_reasons = fatal_reasons;
    if let Some(reason) = &allocation.reason {
        fatal_reasons.push(reason.clone());
    }

    WeeklyRecommendation {
        week,
        market_regime: regime.state,
        regime_confidence: regime.confidence,
        position_multiplier: regime.multiplier,
        total_setups: cards.len() as u32,
        cards,
        allocated_capital,
        allocated_pct: if portfolio_value > 0.0 {
            allocated_capital / portfolio_value * 100.0
        } else {
            0.0
        },
        total_risk_pct: if portfolio_value > 0.0 {
            total_risk / portfolio_value * 100.0
        } else {
            0.0
        },
        funnel,
        status: RecommendationStatus::Draft,
        fatal_reasons,
        created_at,
    }
}

/// Printable card for sharing; the structured record stays canonical.
pub fn render_text(card: &TradeCard) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "TRADE RECOMMENDATION - week of {}\n\
         {} ({}) | {} | {}\n\
         Conviction {:.1}/10 ({})\n",
        card.week,
        card.symbol,
        card.name,
        card.sector,
        card.setup_type.as_str(),
        card.conviction,
        card.conviction_label,
    ));
    out.push_str(&format!(
        "Scores: momentum {:.0}, consistency {:.0}, liquidity {:.0}, setup {:.0}",
        card.momentum_score, card.consistency_score, card.liquidity_score, card.setup_confidence
    ));
    match card.fundamental_score {
        Some(f) => out.push_str(&format!(", fundamental {f:.0}\n")),
        None => out.push_str(", fundamental n/a\n"),
    }
    out.push_str(&format!(
        "Price Rs.{:.2} | 52w high Rs.{:.2} | DMA 20/50/200: {:.2}/{:.2}/{:.2}\n",
        card.current_price, card.high_52w, card.sma_20, card.sma_50, card.sma_200
    ));
    out.push_str(&format!(
        "Entry Rs.{:.2}-{:.2} | Stop Rs.{:.2} | T1 Rs.{:.2} | T2 Rs.{:.2} | R:R {:.1}\n",
        card.entry_low, card.entry_high, card.stop, card.target_1, card.target_2, card.rr
    ));
    out.push_str(&format!(
        "Size: {} shares, Rs.{:.0} ({:.1}% of portfolio), risk Rs.{:.0}\n",
        card.shares,
        card.investment,
        card.position_pct * 100.0,
        card.risk_amount
    ));
    for step in &card.action_steps {
        out.push_str(&format!("  - {step}\n"));
    }
    out.push_str(&format!("Gap plan: {}\n", card.gap_contingency));
    out
}
