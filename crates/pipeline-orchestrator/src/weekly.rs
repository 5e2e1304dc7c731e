//! The master weekly workflow: S1 -> S2 -> regime -> S3 -> S4A -> S4B ->
//! S5 -> S6 -> S8, with the funnel counts threaded into the final
//! recommendation. S7 (Monday/Friday execution runs) is independent and
//! reads the latest approved portfolio.

use chrono::NaiveDate;

use analyzer_core::{
    AnalysisError, FunnelCounts, RegimeState, WeeklyRecommendation,
};

use crate::engine::PipelineEngine;

/// Parameters every stage invocation carries.
#[derive(Debug, Clone)]
pub struct StageInvocation {
    pub week_start: NaiveDate,
    pub portfolio_value: f64,
    pub risk_pct_per_trade: f64,
    pub regime_override: Option<RegimeState>,
}

impl StageInvocation {
    pub fn new(week_start: NaiveDate, portfolio_value: f64, risk_pct_per_trade: f64) -> Self {
        Self {
            week_start,
            portfolio_value,
            risk_pct_per_trade,
            regime_override: None,
        }
    }
}

/// What a completed weekly run produced, stage by stage.
#[derive(Debug, Clone)]
pub struct WeeklyRunReport {
    pub week: NaiveDate,
    pub regime: RegimeState,
    pub funnel: FunnelCounts,
    pub recommendation: WeeklyRecommendation,
}

impl PipelineEngine {
    /// Run the full weekend pipeline for one week.
    ///
    /// Stages are sequential on the DAG; a cancelled run stops between
    /// stages and leaves completed stages as durable, re-runnable history.
    pub async fn run_weekly(
        &self,
        invocation: &StageInvocation,
    ) -> Result<WeeklyRunReport, AnalysisError> {
        let week = invocation.week_start;
        let cancel = self.cancel_flag();
        let mut funnel = FunnelCounts::default();
        let mut fatal_reasons = Vec::new();

        tracing::info!("weekly pipeline: starting for week {week}");

        let universe = self.run_universe().await?;
        funnel.universe = universe.tradable;
        cancel.check()?;

        let (_, momentum_qualified) = self.run_momentum(week).await?;
        funnel.momentum_qualified = momentum_qualified;
        cancel.check()?;

        let (regime, thresholds) = self
            .run_regime(week, invocation.regime_override)
            .await?;
        cancel.check()?;

        if regime.state == RegimeState::RiskOff {
            // normal operation, not an error: persist the empty book and a
            // zero-setup recommendation so the week is fully recorded
            fatal_reasons.push("risk-off regime halted screening after S2".to_string());
            let allocation = self.run_portfolio(week, &thresholds).await?;
            let recommendation = self
                .run_recommendation(week, &regime, &allocation, funnel.clone(), fatal_reasons)
                .await?;
            return Ok(WeeklyRunReport {
                week,
                regime: regime.state,
                funnel: recommendation.funnel.clone(),
                recommendation,
            });
        }

        let (_, consistency_qualified) = self.run_consistency(week, &thresholds).await?;
        funnel.consistency_qualified = consistency_qualified;
        cancel.check()?;

        let (_, liquidity_qualified) = self.run_liquidity(week).await?;
        funnel.liquidity_qualified = liquidity_qualified;
        cancel.check()?;

        let setups_detected = self.run_setups(week, &thresholds).await?;
        funnel.setups_detected = setups_detected;
        cancel.check()?;

        let (_, size_qualified) = self.run_sizing(week, &thresholds).await?;
        funnel.size_qualified = size_qualified;
        cancel.check()?;

        let allocation = self.run_portfolio(week, &thresholds).await?;
        funnel.portfolio_positions = allocation.positions.len() as u32;
        cancel.check()?;

        let recommendation = self
            .run_recommendation(week, &regime, &allocation, funnel.clone(), fatal_reasons)
            .await?;

        tracing::info!(
            "weekly pipeline done: {} -> {} -> {} -> {} -> {} -> {} -> {} positions",
            funnel.universe,
            funnel.momentum_qualified,
            funnel.consistency_qualified,
            funnel.liquidity_qualified,
            funnel.setups_detected,
            funnel.size_qualified,
            funnel.portfolio_positions
        );

        Ok(WeeklyRunReport {
            week,
            regime: regime.state,
            funnel,
            recommendation,
        })
    }
}
