//! Stage workflows over the store and the market-data provider.
//!
//! Each stage reads only collections earlier in the DAG, writes only its
//! own collection, and goes through [`run_activity`] for every I/O-bearing
//! step. Per-symbol failures are skips; benchmark failures are fatal to
//! the stage and bubble up for the orchestrator to retry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;

use analyzer_core::{
    AnalysisError, Bar, BenchmarkSnapshot, Clock, EngineConfig, FridaySummary, FunnelCounts,
    GapDecision, MarketDataProvider, MarketIndex, NiftyIndex, PortfolioAllocation,
    RegimeAssessment, RegimeState, RegimeSubscores, Thresholds, TradeOutcome,
    WeeklyRecommendation,
};
use analyzer_store::DocStore;
use market_data::indicators::{compute_indicators, wilder_atr};
use market_data::{fetch_daily_batch, resample_weekly};

use crate::activity::{run_activity, ActivityKind, CancelFlag, RetryPolicy};

/// Horizons, in calendar days, handed to the provider per stage.
const MOMENTUM_HORIZON: u32 = 600; // ~400 trading days
const CONSISTENCY_HORIZON: u32 = 430; // ~60 weeks
const LIQUIDITY_HORIZON: u32 = 140; // ~90 trading days
const CORRELATION_HORIZON: u32 = 100; // ~65 trading days
const BREADTH_SAMPLE: usize = 100;

pub struct PipelineEngine {
    store: DocStore,
    provider: Arc<dyn MarketDataProvider>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    cancel: CancelFlag,
}

/// Universe refresh summary for the run log.
#[derive(Debug, Clone, Copy)]
pub struct UniverseSummary {
    pub total: u32,
    pub tradable: u32,
    pub tier_a: u32,
    pub tier_b: u32,
    pub deactivated: u32,
}

impl PipelineEngine {
    pub fn new(
        store: DocStore,
        provider: Arc<dyn MarketDataProvider>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            provider,
            config,
            clock,
            policy: RetryPolicy::default(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn store(&self) -> &DocStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ----- S1: universe -----

    pub async fn run_universe(&self) -> Result<UniverseSummary, AnalysisError> {
        let provider = Arc::clone(&self.provider);
        let instruments = run_activity(
            "fetch-instruments",
            ActivityKind::SingleFetch,
            &self.policy,
            &self.cancel,
            || provider.instruments(),
        )
        .await?;

        let provider = Arc::clone(&self.provider);
        let mtf: HashSet<String> = run_activity(
            "fetch-mtf",
            ActivityKind::SingleFetch,
            &self.policy,
            &self.cancel,
            || provider.mtf_symbols(),
        )
        .await?
        .into_iter()
        .collect();

        let mut lists = Vec::with_capacity(4);
        for index in [
            NiftyIndex::Nifty50,
            NiftyIndex::Nifty100,
            NiftyIndex::Nifty200,
            NiftyIndex::Nifty500,
        ] {
            let provider = Arc::clone(&self.provider);
            let list = run_activity(
                "fetch-constituents",
                ActivityKind::SingleFetch,
                &self.policy,
                &self.cancel,
                move || {
                    let provider = Arc::clone(&provider);
                    async move { provider.index_constituents(index).await }
                },
            )
            .await?;
            lists.push(list);
        }
        let mut lists = lists.into_iter();
        let membership = universe_builder::IndexMembership::from_lists(
            lists.next().unwrap_or_default(),
            lists.next().unwrap_or_default(),
            lists.next().unwrap_or_default(),
            lists.next().unwrap_or_default(),
        );

        let now = self.clock.now();
        let mut records = universe_builder::build_universe(&instruments, &mtf, &membership, now);

        // optional monthly fundamentals for the tradable slice
        for record in records
            .iter_mut()
            .filter(|r| r.quality_score >= self.config.min_quality_score)
        {
            match self.provider.fundamentals(&record.symbol).await {
                Ok(Some(snapshot)) => {
                    record.fundamental_score = Some(universe_builder::fundamental_score(
                        &snapshot,
                        &record.sector,
                    ));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("fundamentals skipped for {}: {e}", record.symbol),
            }
        }

        let present: Vec<String> = records.iter().map(|r| r.symbol.clone()).collect();
        for record in &records {
            self.store.upsert_stock(record).await?;
        }
        let deactivated = self.store.deactivate_missing(&present).await?;

        let (a, b, _, _) = universe_builder::tier_counts(&records);
        let tradable = records
            .iter()
            .filter(|r| r.quality_score >= self.config.min_quality_score)
            .count();
        let summary = UniverseSummary {
            total: records.len() as u32,
            tradable: tradable as u32,
            tier_a: a as u32,
            tier_b: b as u32,
            deactivated: deactivated as u32,
        };
        tracing::info!(
            "universe: {} instruments, {} tradable, tier A {}, tier B {}, {} deactivated",
            summary.total,
            summary.tradable,
            summary.tier_a,
            summary.tier_b,
            summary.deactivated
        );
        Ok(summary)
    }

    // ----- benchmark -----

    async fn fetch_index_bars(&self, days: u32) -> Result<Vec<Bar>, AnalysisError> {
        let provider = Arc::clone(&self.provider);
        run_activity(
            "fetch-benchmark",
            ActivityKind::SingleFetch,
            &self.policy,
            &self.cancel,
            move || {
                let provider = Arc::clone(&provider);
                async move { provider.index_daily_bars(MarketIndex::Nifty50, days).await }
            },
        )
        .await
    }

    async fn benchmark(&self, days: u32) -> Result<(Vec<Bar>, BenchmarkSnapshot), AnalysisError> {
        let bars = self.fetch_index_bars(days).await?;
        let snapshot = benchmark_snapshot(&bars)?;
        Ok((bars, snapshot))
    }

    // ----- S2: momentum -----

    pub async fn run_momentum(&self, week: NaiveDate) -> Result<(u32, u32), AnalysisError> {
        let stocks = self.store.active_stocks(self.config.min_quality_score).await?;
        let symbols: Vec<String> = stocks.iter().map(|s| s.symbol.clone()).collect();
        tracing::info!("momentum: scoring {} symbols", symbols.len());

        let (_, benchmark) = self.benchmark(MOMENTUM_HORIZON).await?;

        let provider = Arc::clone(&self.provider);
        let concurrency = self.config.fetch_concurrency;
        let bars_by_symbol = run_activity(
            "fetch-momentum-bars",
            ActivityKind::BatchIo,
            &self.policy,
            &self.cancel,
            || {
                fetch_daily_batch(
                    Arc::clone(&provider),
                    &symbols,
                    MOMENTUM_HORIZON,
                    concurrency,
                )
            },
        )
        .await?;

        let now = self.clock.now();
        let mut analyzed = 0u32;
        let mut qualified = 0u32;
        for (symbol, bars) in &bars_by_symbol {
            let ind = match compute_indicators(bars) {
                Ok(ind) => ind,
                Err(AnalysisError::InsufficientData(msg)) => {
                    tracing::debug!("momentum skip {symbol}: {msg}");
                    continue;
                }
                Err(e) => return Err(e),
            };
            match momentum_filter::score_momentum(symbol, week, bars, &ind, &benchmark, now) {
                Ok(score) => {
                    analyzed += 1;
                    if score.qualifies {
                        qualified += 1;
                    }
                    self.store.upsert_momentum(&score).await?;
                }
                Err(AnalysisError::InsufficientData(msg)) => {
                    tracing::debug!("momentum skip {symbol}: {msg}");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!("momentum: {analyzed} analyzed, {qualified} qualified");
        Ok((analyzed, qualified))
    }

    // ----- C5: regime -----

    pub async fn run_regime(
        &self,
        week: NaiveDate,
        regime_override: Option<RegimeState>,
    ) -> Result<(RegimeAssessment, Thresholds), AnalysisError> {
        if let Some(state) = regime_override {
            let thresholds = Thresholds::for_regime(state);
            let assessment = RegimeAssessment {
                week,
                state,
                composite: 0.0,
                confidence: 1.0,
                subscores: RegimeSubscores {
                    trend: 0.0,
                    breadth: 0.0,
                    volatility: 0.0,
                    leadership: 0.0,
                },
                multiplier: thresholds.multiplier,
                reasoning: format!("operator override: {}", state.as_str()),
                calculated_at: self.clock.now(),
            };
            self.store.upsert_regime(&assessment).await?;
            return Ok((assessment, thresholds));
        }

        let nifty_bars = self.fetch_index_bars(MOMENTUM_HORIZON).await?;

        // VIX is optional; realized vol substitutes
        let provider = Arc::clone(&self.provider);
        let vix_closes = match run_activity(
            "fetch-vix",
            ActivityKind::SingleFetch,
            &self.policy,
            &self.cancel,
            move || {
                let provider = Arc::clone(&provider);
                async move { provider.index_daily_bars(MarketIndex::IndiaVix, 30).await }
            },
        )
        .await
        {
            Ok(bars) => Some(bars.iter().map(|b| b.close).collect::<Vec<f64>>()),
            Err(e) => {
                tracing::warn!("VIX unavailable, using realized vol: {e}");
                None
            }
        };

        let breadth = self.breadth_sample().await?;
        let cyclical = self.sector_returns(&MarketIndex::CYCLICALS).await;
        let defensive = self.sector_returns(&MarketIndex::DEFENSIVES).await;

        let inputs = regime_detector::RegimeInputs {
            nifty_bars,
            vix_closes,
            breadth,
            cyclical_returns: cyclical,
            defensive_returns: defensive,
        };
        let (assessment, thresholds) = regime_detector::classify(&inputs, week, self.clock.now())?;
        tracing::info!("regime: {}", assessment.reasoning);
        self.store.upsert_regime(&assessment).await?;
        Ok((assessment, thresholds))
    }

    /// Fraction of a universe sample above its long moving averages.
    async fn breadth_sample(&self) -> Result<regime_detector::BreadthSample, AnalysisError> {
        let stocks = self.store.active_stocks(self.config.min_quality_score).await?;
        let sample: Vec<String> = stocks
            .iter()
            .take(BREADTH_SAMPLE)
            .map(|s| s.symbol.clone())
            .collect();

        let provider = Arc::clone(&self.provider);
        let concurrency = self.config.fetch_concurrency;
        let bars_by_symbol = run_activity(
            "fetch-breadth-sample",
            ActivityKind::BatchIo,
            &self.policy,
            &self.cancel,
            || fetch_daily_batch(Arc::clone(&provider), &sample, 320, concurrency),
        )
        .await?;

        let mut above_200 = 0usize;
        let mut above_50 = 0usize;
        let mut total = 0usize;
        for bars in bars_by_symbol.values() {
            if bars.len() < 200 {
                continue;
            }
            let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
            let close = closes[closes.len() - 1];
            let sma_200 = closes[closes.len() - 200..].iter().sum::<f64>() / 200.0;
            let sma_50 = closes[closes.len() - 50..].iter().sum::<f64>() / 50.0;
            total += 1;
            if close > sma_200 {
                above_200 += 1;
            }
            if close > sma_50 {
                above_50 += 1;
            }
        }

        Ok(regime_detector::BreadthSample {
            above_200dma: above_200,
            above_50dma: above_50,
            total,
        })
    }

    /// 20-day returns of a set of sector indices; failures drop out.
    async fn sector_returns(&self, indices: &[MarketIndex]) -> Vec<f64> {
        let mut returns = Vec::with_capacity(indices.len());
        for index in indices {
            match self.provider.index_daily_bars(*index, 40).await {
                Ok(bars) if bars.len() >= 21 => {
                    let last = bars[bars.len() - 1].close;
                    let base = bars[bars.len() - 21].close;
                    if base > 0.0 {
                        returns.push(last / base - 1.0);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("sector index {index:?} skipped: {e}"),
            }
        }
        returns
    }

    // ----- S3: consistency -----

    pub async fn run_consistency(
        &self,
        week: NaiveDate,
        thresholds: &Thresholds,
    ) -> Result<(u32, u32), AnalysisError> {
        let momentum = self.store.momentum_scores(week, true).await?;
        let symbols: Vec<String> = momentum.iter().map(|m| m.symbol.clone()).collect();
        tracing::info!("consistency: scoring {} symbols", symbols.len());

        let provider = Arc::clone(&self.provider);
        let concurrency = self.config.fetch_concurrency;
        let bars_by_symbol = run_activity(
            "fetch-weekly-bars",
            ActivityKind::BatchIo,
            &self.policy,
            &self.cancel,
            || {
                fetch_daily_batch(
                    Arc::clone(&provider),
                    &symbols,
                    CONSISTENCY_HORIZON,
                    concurrency,
                )
            },
        )
        .await?;

        let mut metrics = Vec::new();
        for (symbol, bars) in &bars_by_symbol {
            let weekly = resample_weekly(bars);
            let returns = consistency_filter::returns_from_weekly(&weekly);
            match consistency_filter::weekly_metrics(&returns) {
                Ok(m) => metrics.push((symbol.clone(), m)),
                Err(AnalysisError::InsufficientData(msg)) => {
                    tracing::debug!("consistency skip {symbol}: {msg}");
                }
                Err(e) => return Err(e),
            }
        }
        // batch order feeds percentile ranking; keep reruns byte-identical
        metrics.sort_by(|a, b| a.0.cmp(&b.0));

        let scores =
            consistency_filter::score_batch(&metrics, thresholds, week, self.clock.now());
        let mut qualified = 0u32;
        for score in &scores {
            if score.qualifies {
                qualified += 1;
            }
            self.store.upsert_consistency(score).await?;
        }

        tracing::info!("consistency: {} analyzed, {qualified} qualified", scores.len());
        Ok((scores.len() as u32, qualified))
    }

    // ----- S4A: liquidity -----

    pub async fn run_liquidity(&self, week: NaiveDate) -> Result<(u32, u32), AnalysisError> {
        let consistency = self.store.consistency_scores(week, true).await?;
        let symbols: Vec<String> = consistency.iter().map(|c| c.symbol.clone()).collect();
        tracing::info!("liquidity: scoring {} symbols", symbols.len());

        let provider = Arc::clone(&self.provider);
        let concurrency = self.config.fetch_concurrency;
        let bars_by_symbol = run_activity(
            "fetch-liquidity-bars",
            ActivityKind::BatchIo,
            &self.policy,
            &self.cancel,
            || {
                fetch_daily_batch(
                    Arc::clone(&provider),
                    &symbols,
                    LIQUIDITY_HORIZON,
                    concurrency,
                )
            },
        )
        .await?;

        let now = self.clock.now();
        let mut analyzed = 0u32;
        let mut qualified = 0u32;
        for (symbol, bars) in &bars_by_symbol {
            match liquidity_filter::score_liquidity(symbol, week, bars, now) {
                Ok(score) => {
                    analyzed += 1;
                    if score.qualifies {
                        qualified += 1;
                    }
                    self.store.upsert_liquidity(&score).await?;
                }
                Err(AnalysisError::InsufficientData(msg)) => {
                    tracing::debug!("liquidity skip {symbol}: {msg}");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!("liquidity: {analyzed} analyzed, {qualified} qualified");
        Ok((analyzed, qualified))
    }

    // ----- S4B: setups -----

    pub async fn run_setups(
        &self,
        week: NaiveDate,
        thresholds: &Thresholds,
    ) -> Result<u32, AnalysisError> {
        let liquidity = self.store.liquidity_scores(week, true).await?;
        let symbols: Vec<String> = liquidity.iter().map(|l| l.symbol.clone()).collect();
        tracing::info!("setups: probing {} symbols", symbols.len());

        let provider = Arc::clone(&self.provider);
        let concurrency = self.config.fetch_concurrency;
        let bars_by_symbol = run_activity(
            "fetch-setup-bars",
            ActivityKind::BatchIo,
            &self.policy,
            &self.cancel,
            || {
                fetch_daily_batch(
                    Arc::clone(&provider),
                    &symbols,
                    MOMENTUM_HORIZON,
                    concurrency,
                )
            },
        )
        .await?;

        let now = self.clock.now();
        let mut detected = 0u32;
        for liq in &liquidity {
            let Some(bars) = bars_by_symbol.get(&liq.symbol) else {
                continue;
            };
            let ind = match compute_indicators(bars) {
                Ok(ind) => ind,
                Err(_) => continue,
            };
            let momentum = self.store.momentum_for(&liq.symbol, week).await?;
            let consistency = self.store.consistency_for(&liq.symbol, week).await?;
            let scores = setup_detector::StageScores {
                momentum: momentum.map(|m| m.score).unwrap_or(0.0),
                consistency: consistency.map(|c| c.consistency_score).unwrap_or(0.0),
                liquidity: liq.score,
            };

            match setup_detector::detect_setup(
                &liq.symbol,
                week,
                bars,
                &ind,
                scores,
                thresholds,
                self.config.max_stop_distance_pct,
                now,
            ) {
                Ok(Some(setup)) => {
                    detected += 1;
                    self.store.upsert_setup(&setup).await?;
                }
                Ok(None) => {}
                Err(AnalysisError::InsufficientData(msg)) => {
                    tracing::debug!("setup skip {}: {msg}", liq.symbol);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!("setups: {detected} detected");
        Ok(detected)
    }

    // ----- S5: sizing -----

    pub async fn run_sizing(
        &self,
        week: NaiveDate,
        thresholds: &Thresholds,
    ) -> Result<(u32, u32), AnalysisError> {
        let setups = self.store.setups(week).await?;
        tracing::info!("sizing: {} setups", setups.len());
        if setups.is_empty() {
            return Ok((0, 0));
        }

        let nifty_bars = self.fetch_index_bars(90).await?;
        if nifty_bars.len() < 15 {
            return Err(AnalysisError::BenchmarkUnavailable(format!(
                "{} benchmark bars, need 15 for ATR",
                nifty_bars.len()
            )));
        }
        let nifty_atr_series = wilder_atr(&nifty_bars, 14);
        let nifty_close = nifty_bars.last().map(|b| b.close).unwrap_or(0.0);
        let nifty_atr_frac = match (nifty_atr_series.last(), nifty_close > 0.0) {
            (Some(atr), true) => atr / nifty_close,
            _ => 0.01,
        };

        let stats = self.store.outcome_stats(week).await?;
        let now = self.clock.now();

        let mut qualified = 0u32;
        for setup in &setups {
            let sector = self
                .store
                .stock(&setup.symbol)
                .await?
                .map(|s| s.sector)
                .unwrap_or_else(|| "Unknown".to_string());

            // the entry band spans one ATR, so recover the stock ATR from it
            let stock_atr = setup.entry_high - setup.entry_low;
            let nifty_atr_scaled = nifty_atr_frac * setup.mid_entry();

            let size = risk_geometry::size_position(
                setup,
                &sector,
                nifty_atr_scaled,
                stock_atr,
                &stats,
                &self.config,
                thresholds,
                now,
            );
            if size.qualifies {
                qualified += 1;
            }
            self.store.upsert_position_size(&size).await?;
        }

        tracing::info!("sizing: {qualified}/{} qualified", setups.len());
        Ok((setups.len() as u32, qualified))
    }

    // ----- S6: portfolio -----

    pub async fn run_portfolio(
        &self,
        week: NaiveDate,
        thresholds: &Thresholds,
    ) -> Result<PortfolioAllocation, AnalysisError> {
        let sizes = self.store.position_sizes(week, true).await?;
        let mut candidates = Vec::new();
        for size in sizes {
            if let Some(setup) = self.store.setup_for(&size.symbol, week).await? {
                candidates.push(portfolio_builder::Candidate { size, setup });
            }
        }
        tracing::info!("portfolio: {} candidates", candidates.len());

        let correlations = if candidates.len() >= 2 {
            let symbols: Vec<String> =
                candidates.iter().map(|c| c.size.symbol.clone()).collect();
            let provider = Arc::clone(&self.provider);
            let concurrency = self.config.fetch_concurrency;
            let bars_by_symbol = run_activity(
                "fetch-correlation-bars",
                ActivityKind::BatchIo,
                &self.policy,
                &self.cancel,
                || {
                    fetch_daily_batch(
                        Arc::clone(&provider),
                        &symbols,
                        CORRELATION_HORIZON,
                        concurrency,
                    )
                },
            )
            .await?;

            let series: Vec<(String, Vec<f64>)> = bars_by_symbol
                .iter()
                .map(|(symbol, bars)| {
                    let returns: Vec<f64> = bars
                        .windows(2)
                        .map(|w| (w[1].close - w[0].close) / w[0].close)
                        .collect();
                    let tail = returns.len().saturating_sub(60);
                    (symbol.clone(), returns[tail..].to_vec())
                })
                .collect();
            portfolio_builder::CorrelationMatrix::from_returns(&series)
        } else {
            portfolio_builder::CorrelationMatrix::from_returns(&[])
        };

        let allocation = portfolio_builder::construct_portfolio(
            candidates,
            &correlations,
            thresholds,
            &self.config,
            week,
            self.clock.now(),
        );
        tracing::info!(
            "portfolio: {} positions, {:.1}% allocated, {} corr-filtered, {} sector-filtered",
            allocation.positions.len(),
            allocation.allocated_pct,
            allocation.correlation_filtered,
            allocation.sector_filtered
        );
        self.store.upsert_portfolio(&allocation).await?;
        Ok(allocation)
    }

    // ----- S8: recommendation -----

    pub async fn run_recommendation(
        &self,
        week: NaiveDate,
        regime: &RegimeAssessment,
        allocation: &PortfolioAllocation,
        funnel: FunnelCounts,
        fatal_reasons: Vec<String>,
    ) -> Result<WeeklyRecommendation, AnalysisError> {
        let mut cards = Vec::new();
        for position in &allocation.positions {
            let symbol = &position.symbol;
            let (stock, momentum, consistency, liquidity, setup, size) = match (
                self.store.stock(symbol).await?,
                self.store.momentum_for(symbol, week).await?,
                self.store.consistency_for(symbol, week).await?,
                self.store.liquidity_for(symbol, week).await?,
                self.store.setup_for(symbol, week).await?,
                self.store.position_size_for(symbol, week).await?,
            ) {
                (Some(a), Some(b), Some(c), Some(d), Some(e), Some(f)) => (a, b, c, d, e, f),
                _ => {
                    tracing::warn!("recommendation: incomplete stage data for {symbol}");
                    continue;
                }
            };

            let bars = match self.provider.daily_bars(symbol, MOMENTUM_HORIZON).await {
                Ok(bars) => bars,
                Err(e) => {
                    tracing::warn!("recommendation: price context failed for {symbol}: {e}");
                    continue;
                }
            };
            let Ok(indicators) = compute_indicators(&bars) else {
                continue;
            };

            cards.push(recommendation_builder::build_card(
                &recommendation_builder::CardInputs {
                    stock: &stock,
                    momentum: &momentum,
                    consistency: &consistency,
                    liquidity: &liquidity,
                    setup: &setup,
                    size: &size,
                    indicators: &indicators,
                },
            ));
        }

        let recommendation = recommendation_builder::assemble(
            week,
            regime,
            allocation,
            cards,
            funnel,
            self.config.portfolio_value,
            fatal_reasons,
            self.clock.now(),
        );
        self.store.upsert_recommendation(&recommendation).await?;
        self.store
            .expire_stale_recommendations(self.clock.now())
            .await?;
        tracing::info!(
            "recommendation: {} setups for week {week} ({})",
            recommendation.total_setups,
            recommendation.market_regime.as_str()
        );
        Ok(recommendation)
    }

    // ----- S7: execution -----

    /// Monday pre-open gap decisions over the latest approved portfolio.
    /// Entered positions open a trade outcome; skipped ones leave none.
    pub async fn run_monday(&self, week: NaiveDate) -> Result<Vec<GapDecision>, AnalysisError> {
        let Some(portfolio) = self.store.latest_approved_portfolio().await? else {
            tracing::info!("monday: no approved portfolio");
            return Ok(vec![]);
        };

        let mut decisions = Vec::new();
        for position in &portfolio.positions {
            let bars = match self.provider.daily_bars(&position.symbol, 10).await {
                Ok(bars) if bars.len() >= 2 => bars,
                Ok(_) | Err(_) => {
                    tracing::warn!("monday: no fresh prices for {}", position.symbol);
                    continue;
                }
            };
            let open = bars[bars.len() - 1].open;
            let prev_close = bars[bars.len() - 2].close;

            let decision = execution_monitor::gap_decision(position, open, prev_close, week);
            tracing::info!(
                "monday {}: {} ({})",
                position.symbol,
                decision.action.as_str(),
                decision.reason
            );
            self.store.upsert_gap_decision(&decision).await?;

            if decision.action.is_entry() {
                let entry = open;
                let outcome = TradeOutcome {
                    symbol: position.symbol.clone(),
                    week,
                    entry_price: entry,
                    stop: position.stop,
                    shares: position.shares,
                    exit_price: None,
                    exit_date: None,
                    pnl: 0.0,
                    r_multiple: 0.0,
                    status: "open".to_string(),
                    calculated_at: self.clock.now(),
                };
                self.store.upsert_outcome(&outcome).await?;
            }
            decisions.push(decision);
        }
        Ok(decisions)
    }

    /// Friday close: refresh open outcomes, then write the weekly summary
    /// with the system health verdict.
    pub async fn run_friday(&self, week: NaiveDate) -> Result<FridaySummary, AnalysisError> {
        let portfolio = self.store.latest_approved_portfolio().await?;
        let positions: HashMap<String, _> = portfolio
            .iter()
            .flat_map(|p| p.positions.iter())
            .map(|p| (p.symbol.clone(), p.clone()))
            .collect();

        let cutoff = week - chrono::Duration::weeks(52);
        let outcomes = self.store.outcomes_since(cutoff).await?;

        for outcome in outcomes.iter().filter(|o| o.status == "open") {
            let Some(position) = positions.get(&outcome.symbol) else {
                continue;
            };
            let close = match self.provider.daily_bars(&outcome.symbol, 10).await {
                Ok(bars) if !bars.is_empty() => bars[bars.len() - 1].close,
                _ => continue,
            };

            let status = execution_monitor::position_status(position, close);
            let risk = (outcome.entry_price - outcome.stop).max(f64::EPSILON);
            let mut updated = outcome.clone();
            match status.state {
                analyzer_core::PositionState::StoppedOut => {
                    updated.status = "closed_loss".to_string();
                    updated.exit_price = Some(outcome.stop);
                    updated.exit_date = Some(week + chrono::Duration::days(4));
                    updated.pnl = (outcome.stop - outcome.entry_price) * outcome.shares as f64;
                    updated.r_multiple = (outcome.stop - outcome.entry_price) / risk;
                }
                analyzer_core::PositionState::Target2Hit => {
                    updated.status = "closed_win".to_string();
                    updated.exit_price = Some(position.target_2);
                    updated.exit_date = Some(week + chrono::Duration::days(4));
                    updated.pnl =
                        (position.target_2 - outcome.entry_price) * outcome.shares as f64;
                    updated.r_multiple = (position.target_2 - outcome.entry_price) / risk;
                }
                _ => {
                    updated.pnl = (close - outcome.entry_price) * outcome.shares as f64;
                    updated.r_multiple = (close - outcome.entry_price) / risk;
                }
            }
            self.store.upsert_outcome(&updated).await?;
        }

        // execution adherence: planned entries vs entries actually opened
        let decisions = self.store.gap_decisions(week).await?;
        let planned = decisions.iter().filter(|d| d.action.is_entry()).count() as u32;
        let outcomes = self.store.outcomes_since(cutoff).await?;
        let executed = outcomes
            .iter()
            .filter(|o| o.week == week && o.status != "skipped")
            .count() as u32;
        let exec_score = execution_monitor::execution_score(planned, executed.min(planned));

        let health = execution_monitor::system_health(&outcomes, week, exec_score);
        let summary =
            execution_monitor::friday_summary(week, &outcomes, health, self.clock.now());
        self.store.upsert_friday_summary(&summary).await?;
        tracing::info!(
            "friday: {} closed, {:.0}% win rate, health {:.0} ({:?})",
            summary.closed_trades,
            summary.win_rate * 100.0,
            summary.health.score,
            summary.health.action
        );
        Ok(summary)
    }
}

/// Benchmark snapshot from raw index bars: trailing returns, ATR and
/// realized vols.
pub fn benchmark_snapshot(bars: &[Bar]) -> Result<BenchmarkSnapshot, AnalysisError> {
    if bars.len() < 130 {
        return Err(AnalysisError::BenchmarkUnavailable(format!(
            "{} benchmark bars, need 130",
            bars.len()
        )));
    }
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let close = closes[closes.len() - 1];
    let trailing = |days: usize| {
        if closes.len() > days {
            close / closes[closes.len() - 1 - days] - 1.0
        } else {
            0.0
        }
    };
    let atr = wilder_atr(bars, 14);
    Ok(BenchmarkSnapshot {
        close,
        return_1m: trailing(21),
        return_3m: trailing(63),
        return_6m: trailing(126),
        atr_14: atr.last().copied().unwrap_or(0.0),
        vol_20: market_data::indicators::return_volatility(&closes, 20),
        vol_30: market_data::indicators::return_volatility(&closes, 30),
    })
}
