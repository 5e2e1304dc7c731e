//! End-to-end pipeline scenarios over the in-memory store and a static
//! market-data provider.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};

use analyzer_core::{
    Bar, Clock, EngineConfig, FixedClock, GapAction, Instrument, MarketIndex, NiftyIndex,
    PortfolioAllocation, PortfolioPosition, RecommendationStatus, RegimeState, SetupType,
};
use analyzer_store::DocStore;
use market_data::StaticProvider;
use pipeline_orchestrator::{PipelineEngine, StageInvocation};

fn run_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(
        Utc.with_ymd_and_hms(2026, 7, 25, 10, 0, 0).unwrap(),
    ))
}

fn week_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 7, 27).unwrap()
}

fn instrument(symbol: &str, sector: &str) -> Instrument {
    Instrument {
        symbol: symbol.to_string(),
        name: symbol.to_string(),
        isin: format!("INE{symbol}"),
        segment: "NSE_EQ".to_string(),
        instrument_type: "EQ".to_string(),
        lot_size: 1,
        tick_size: 0.05,
        sector: Some(sector.to_string()),
    }
}

/// Trading-day bars (Mon-Fri) from a series of daily closes, starting on a
/// Monday so the weekly resample lines up.
fn bars_from_closes(start: NaiveDate, closes: &[f64], volume: f64) -> Vec<Bar> {
    assert_eq!(start.weekday(), Weekday::Mon);
    let mut bars = Vec::with_capacity(closes.len());
    let mut date = start;
    let mut prev = closes[0];
    for close in closes {
        while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            date += Duration::days(1);
        }
        let open = prev;
        bars.push(Bar {
            date,
            open,
            high: open.max(*close) * 1.001,
            low: open.min(*close) * 0.999,
            close: *close,
            volume,
        });
        prev = *close;
        date += Duration::days(1);
    }
    bars
}

/// Daily closes compounding the given weekly returns, five days per week,
/// preceded by one flat seed week.
fn closes_from_weekly(weekly_returns: &[f64], start_price: f64) -> Vec<f64> {
    let mut closes = vec![start_price; 5];
    let mut price = start_price;
    for weekly in weekly_returns {
        let daily = (1.0 + weekly).powf(1.0 / 5.0);
        for _ in 0..5 {
            price *= daily;
            closes.push(price);
        }
    }
    closes
}

/// The consistency-grade weekly pattern: ~71% positive weeks, ~31% of
/// weeks at +3%, recent quarter slightly stronger than the year.
fn steady_weekly_pattern() -> Vec<f64> {
    let cycle = [
        0.035, 0.015, -0.015, 0.015, 0.035, -0.015, 0.015, 0.015, 0.035, -0.015, 0.015, 0.035,
        -0.015,
    ];
    let mut pattern: Vec<f64> = std::iter::repeat(0.01)
        .take(7)
        .chain(cycle.iter().cycle().take(52).copied())
        .collect();
    let n = pattern.len();
    pattern[n - 4] = 0.015;
    pattern
}

fn flat_noisy_closes(n: usize, level: f64) -> Vec<f64> {
    (0..n)
        .map(|i| level * if i % 2 == 0 { 1.001 } else { 0.999 })
        .collect()
}

fn trending_index_closes(n: usize, start: f64, drift: f64) -> Vec<f64> {
    let mut closes = Vec::with_capacity(n);
    let mut price = start;
    for i in 0..n {
        let wiggle = if i % 2 == 0 { 0.0045 } else { -0.0035 };
        price *= 1.0 + drift + wiggle;
        closes.push(price);
    }
    closes
}

fn history_start() -> NaiveDate {
    // a Monday 60 weeks before the run week
    NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
}

/// Provider with one strong candidate, one flat dud, and a bullish market.
fn bullish_provider() -> StaticProvider {
    let mut provider = StaticProvider::default();
    let start = history_start();

    let strong_closes = closes_from_weekly(&steady_weekly_pattern(), 100.0);
    provider.bars.insert(
        "STRONG".to_string(),
        bars_from_closes(start, &strong_closes, 3_000_000.0),
    );
    provider.bars.insert(
        "DUD".to_string(),
        bars_from_closes(start, &flat_noisy_closes(305, 100.0), 3_000_000.0),
    );

    provider.index_bars.insert(
        MarketIndex::Nifty50,
        bars_from_closes(start, &trending_index_closes(305, 22_000.0, 0.0005), 1e9),
    );
    provider.index_bars.insert(
        MarketIndex::IndiaVix,
        bars_from_closes(
            NaiveDate::from_ymd_opt(2026, 6, 29).unwrap(),
            &[13.0, 12.9, 12.7, 12.6, 12.5, 12.4, 12.3, 12.2, 12.1, 12.0],
            0.0,
        ),
    );
    for index in MarketIndex::CYCLICALS {
        provider.index_bars.insert(
            index,
            bars_from_closes(
                NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
                &trending_index_closes(40, 10_000.0, 0.001),
                0.0,
            ),
        );
    }
    for index in MarketIndex::DEFENSIVES {
        provider.index_bars.insert(
            index,
            bars_from_closes(
                NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
                &flat_noisy_closes(40, 10_000.0),
                0.0,
            ),
        );
    }

    provider.instruments = vec![
        instrument("STRONG", "Capital Goods"),
        instrument("DUD", "Chemicals"),
    ];
    provider.mtf = vec!["STRONG".to_string(), "DUD".to_string()];
    provider.constituents.insert(
        NiftyIndex::Nifty50,
        vec!["STRONG".to_string(), "DUD".to_string()],
    );
    provider
        .constituents
        .insert(NiftyIndex::Nifty100, vec!["STRONG".to_string(), "DUD".to_string()]);
    provider
        .constituents
        .insert(NiftyIndex::Nifty200, vec!["STRONG".to_string(), "DUD".to_string()]);
    provider
        .constituents
        .insert(NiftyIndex::Nifty500, vec!["STRONG".to_string(), "DUD".to_string()]);
    provider
}

/// Provider with a collapsing market: downtrending index, spiking VIX.
fn bearish_provider() -> StaticProvider {
    let mut provider = bullish_provider();
    let start = history_start();
    let falling: Vec<f64> = {
        let mut closes = Vec::new();
        let mut price = 26_000.0;
        for i in 0..305 {
            let wiggle = if i % 2 == 0 { 0.002 } else { -0.003 };
            price *= 1.0 - 0.001 + wiggle;
            closes.push(price);
        }
        closes
    };
    provider
        .index_bars
        .insert(MarketIndex::Nifty50, bars_from_closes(start, &falling, 1e9));
    provider.index_bars.insert(
        MarketIndex::IndiaVix,
        bars_from_closes(
            NaiveDate::from_ymd_opt(2026, 6, 29).unwrap(),
            &[18.0, 19.0, 20.0, 21.0, 22.0, 24.0, 26.0, 28.0, 30.0, 34.0],
            0.0,
        ),
    );
    // defensives now lead cyclicals
    for index in MarketIndex::CYCLICALS {
        let mut closes = Vec::new();
        let mut price = 10_000.0;
        for _ in 0..40 {
            price *= 0.996;
            closes.push(price);
        }
        provider.index_bars.insert(
            index,
            bars_from_closes(NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(), &closes, 0.0),
        );
    }
    // the one candidate also rolls over
    let mut weekly = steady_weekly_pattern();
    for r in weekly.iter_mut() {
        *r = -*r * 0.5;
    }
    provider.bars.insert(
        "STRONG".to_string(),
        bars_from_closes(start, &closes_from_weekly(&weekly, 100.0), 3_000_000.0),
    );
    provider
}

async fn engine_with(provider: StaticProvider) -> PipelineEngine {
    let store = DocStore::in_memory().await.unwrap();
    PipelineEngine::new(
        store,
        Arc::new(provider),
        EngineConfig::default(),
        run_clock(),
    )
}

#[tokio::test]
async fn risk_off_week_emits_zero_setups() {
    let engine = engine_with(bearish_provider()).await;
    let invocation = StageInvocation::new(week_start(), 1_000_000.0, 0.015);

    let report = engine.run_weekly(&invocation).await.unwrap();

    assert_eq!(report.regime, RegimeState::RiskOff);
    assert_eq!(report.recommendation.total_setups, 0);
    assert_eq!(report.recommendation.market_regime, RegimeState::RiskOff);
    assert_eq!(report.recommendation.position_multiplier, 0.0);

    let allocation = engine.store().portfolio(week_start()).await.unwrap().unwrap();
    assert!(allocation.positions.is_empty());
    assert_eq!(allocation.cash_pct, 100.0);

    let rec = engine
        .store()
        .recommendation(week_start())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.total_setups, 0);
    assert!(!rec.fatal_reasons.is_empty());
}

#[tokio::test]
async fn bullish_week_runs_the_full_funnel_monotonically() {
    let engine = engine_with(bullish_provider()).await;
    let invocation = StageInvocation::new(week_start(), 1_000_000.0, 0.015);

    let report = engine.run_weekly(&invocation).await.unwrap();

    // the dud never out-qualifies the strong candidate
    let funnel = &report.funnel;
    assert!(funnel.universe >= 2);
    assert!(funnel.momentum_qualified >= 1, "funnel: {funnel:?}");
    assert!(funnel.momentum_qualified <= funnel.universe);
    assert!(funnel.consistency_qualified <= funnel.momentum_qualified);
    assert!(funnel.liquidity_qualified <= funnel.consistency_qualified);
    assert!(funnel.setups_detected <= funnel.liquidity_qualified);
    assert!(funnel.size_qualified <= funnel.setups_detected);
    assert!(funnel.portfolio_positions <= funnel.size_qualified);

    // the strong compounder survives to liquidity at least
    assert_eq!(funnel.consistency_qualified, 1);
    assert_eq!(funnel.liquidity_qualified, 1);

    // whatever made it into the book satisfies the cross-stage invariants
    let allocation = engine.store().portfolio(week_start()).await.unwrap().unwrap();
    for position in &allocation.positions {
        let size = engine
            .store()
            .position_size_for(&position.symbol, week_start())
            .await
            .unwrap()
            .expect("portfolio position must have a sized record");
        assert!(size.qualifies);
        let setup = engine
            .store()
            .setup_for(&position.symbol, week_start())
            .await
            .unwrap()
            .expect("portfolio position must have a setup");
        assert!(setup.stop < setup.entry_low);
        assert!(setup.entry_low < setup.entry_high);
        assert!(setup.entry_high < setup.target_1);
        assert!(setup.target_1 <= setup.target_2);
    }

    let rec = engine
        .store()
        .recommendation(week_start())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.status, RecommendationStatus::Draft);
    assert_eq!(rec.market_regime, RegimeState::RiskOn);
    assert_eq!(rec.total_setups as usize, allocation.positions.len());
}

#[tokio::test]
async fn momentum_rerun_is_idempotent() {
    let engine = engine_with(bullish_provider()).await;
    engine.run_universe().await.unwrap();

    engine.run_momentum(week_start()).await.unwrap();
    let first = engine
        .store()
        .momentum_scores(week_start(), false)
        .await
        .unwrap();

    engine.run_momentum(week_start()).await.unwrap();
    let second = engine
        .store()
        .momentum_scores(week_start(), false)
        .await
        .unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(
            serde_json::to_string(a).unwrap(),
            serde_json::to_string(b).unwrap()
        );
    }
}

#[tokio::test]
async fn benchmark_outage_fails_the_momentum_stage() {
    let mut provider = bullish_provider();
    provider.index_bars.remove(&MarketIndex::Nifty50);
    let engine = engine_with(provider).await;
    engine.run_universe().await.unwrap();

    let err = engine.run_momentum(week_start()).await.unwrap_err();
    assert!(matches!(
        err,
        analyzer_core::AnalysisError::BenchmarkUnavailable(_)
    ));
}

fn seeded_position(symbol: &str) -> PortfolioPosition {
    PortfolioPosition {
        rank: 1,
        symbol: symbol.to_string(),
        sector: "Capital Goods".to_string(),
        setup_type: SetupType::Pullback,
        entry_low: 94.0,
        entry_high: 96.0,
        stop: 93.0,
        target_1: 99.0,
        target_2: 101.0,
        rr: 2.0,
        shares: 100,
        position_value: 9_500.0,
        risk_amount: 200.0,
        position_pct: 0.0095,
        quality_composite: 85.0,
    }
}

async fn seed_approved_portfolio(engine: &PipelineEngine, positions: Vec<PortfolioPosition>) {
    let allocation = PortfolioAllocation {
        week: week_start(),
        regime_state: RegimeState::RiskOn,
        positions,
        sector_allocation: BTreeMap::new(),
        allocated_pct: 1.0,
        cash_pct: 99.0,
        total_risk_pct: 0.02,
        correlation_filtered: 0,
        sector_filtered: 0,
        status: RecommendationStatus::Approved,
        reason: None,
        calculated_at: engine_now(),
    };
    engine.store().upsert_portfolio(&allocation).await.unwrap();
}

fn engine_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 25, 10, 0, 0).unwrap()
}

fn monday_bars(prev_close: f64, open: f64, close: f64) -> Vec<Bar> {
    vec![
        Bar {
            date: NaiveDate::from_ymd_opt(2026, 7, 24).unwrap(),
            open: prev_close,
            high: prev_close * 1.01,
            low: prev_close * 0.99,
            close: prev_close,
            volume: 1_000_000.0,
        },
        Bar {
            date: NaiveDate::from_ymd_opt(2026, 7, 27).unwrap(),
            open,
            high: open.max(close) * 1.01,
            low: open.min(close) * 0.99,
            close,
            volume: 1_000_000.0,
        },
    ]
}

#[tokio::test]
async fn monday_gap_through_stop_skips_without_entry() {
    let mut provider = StaticProvider::default();
    provider
        .bars
        .insert("GAPPED".to_string(), monday_bars(97.0, 92.0, 91.5));
    let engine = engine_with(provider).await;
    seed_approved_portfolio(&engine, vec![seeded_position("GAPPED")]).await;

    let decisions = engine.run_monday(week_start()).await.unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].action, GapAction::SkipGappedThroughStop);

    // no entry recorded for a skip
    let outcomes = engine
        .store()
        .outcomes_since(week_start() - Duration::weeks(1))
        .await
        .unwrap();
    assert!(outcomes.is_empty());
}

#[tokio::test]
async fn monday_entry_opens_an_outcome_and_friday_summarizes() {
    let mut provider = StaticProvider::default();
    provider
        .bars
        .insert("FILLED".to_string(), monday_bars(96.5, 95.0, 97.5));
    let engine = engine_with(provider).await;
    seed_approved_portfolio(&engine, vec![seeded_position("FILLED")]).await;

    let decisions = engine.run_monday(week_start()).await.unwrap();
    assert_eq!(decisions[0].action, GapAction::EnterAtOpen);

    let outcomes = engine
        .store()
        .outcomes_since(week_start() - Duration::weeks(1))
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, "open");
    assert_eq!(outcomes[0].entry_price, 95.0);

    let summary = engine.run_friday(week_start()).await.unwrap();
    assert_eq!(summary.open_trades, 1);
    assert_eq!(summary.closed_trades, 0);
    // in profit at 97.5 against a 95.0 entry
    assert!(summary.unrealized_pnl > 0.0);

    let stored = engine
        .store()
        .friday_summary(week_start())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.open_trades, 1);
}
