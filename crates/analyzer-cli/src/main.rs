//! trade-analyzer: weekend trade-selection pipeline for NSE equities.
//!
//! Usage:
//!   trade-analyzer weekly                      # full S1-S8 pipeline
//!   trade-analyzer weekly --regime-override RISK_OFF
//!   trade-analyzer stage momentum              # one stage for this week
//!   trade-analyzer monday                      # gap decisions at the open
//!   trade-analyzer friday                      # weekly close summary
//!   trade-analyzer approve                     # approve this week's draft
//!   trade-analyzer show                        # print the current cards

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};

use analyzer_core::{week_start_of, EngineConfig, RecommendationStatus, RegimeState, SystemClock};
use analyzer_store::DocStore;
use market_data::YahooChartProvider;
use pipeline_orchestrator::{PipelineEngine, StageInvocation};

#[derive(Parser)]
#[command(name = "trade-analyzer", about = "Weekly trade-selection engine for NSE equities")]
struct Cli {
    /// SQLite database path.
    #[arg(long, env = "ANALYZER_DB", default_value = "sqlite:trade_analyzer.db")]
    db: String,

    /// Total portfolio value in INR.
    #[arg(long, env = "ANALYZER_PORTFOLIO_VALUE", default_value_t = 1_000_000.0)]
    portfolio_value: f64,

    /// Risk per trade as a fraction of portfolio value.
    #[arg(long, env = "ANALYZER_RISK_PCT", default_value_t = 0.015)]
    risk_pct: f64,

    /// Week to operate on (ISO date of any day in the week); defaults to
    /// the current week.
    #[arg(long)]
    week: Option<NaiveDate>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum RegimeArg {
    RiskOn,
    Choppy,
    RiskOff,
}

impl From<RegimeArg> for RegimeState {
    fn from(value: RegimeArg) -> Self {
        match value {
            RegimeArg::RiskOn => RegimeState::RiskOn,
            RegimeArg::Choppy => RegimeState::Choppy,
            RegimeArg::RiskOff => RegimeState::RiskOff,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StageName {
    Universe,
    Momentum,
    Regime,
    Consistency,
    Liquidity,
    Setups,
    Sizing,
    Portfolio,
    Recommend,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full weekend pipeline (S1 through S8).
    Weekly {
        #[arg(long, value_enum)]
        regime_override: Option<RegimeArg>,
    },
    /// Run a single stage for the week.
    Stage {
        #[arg(value_enum)]
        name: StageName,
    },
    /// Monday pre-open gap decisions for the approved portfolio.
    Monday,
    /// Friday close summary and system health.
    Friday,
    /// Approve this week's draft recommendation and portfolio.
    Approve,
    /// Print this week's recommendation cards.
    Show,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(Cli::parse()))
}

async fn run(cli: Cli) -> Result<()> {
    let week = week_start_of(cli.week.unwrap_or_else(|| Utc::now().date_naive()));

    let config = EngineConfig {
        portfolio_value: cli.portfolio_value,
        risk_pct_per_trade: cli.risk_pct,
        ..EngineConfig::default()
    };
    let store = DocStore::new(&cli.db).await.context("opening store")?;
    let provider =
        YahooChartProvider::new(config.fetch_delay_ms, config.fetch_concurrency)
            .context("building provider")?;
    let engine = PipelineEngine::new(
        store.clone(),
        Arc::new(provider),
        config,
        Arc::new(SystemClock),
    );

    match cli.command {
        Command::Weekly { regime_override } => {
            let mut invocation =
                StageInvocation::new(week, cli.portfolio_value, cli.risk_pct);
            invocation.regime_override = regime_override.map(Into::into);
            let report = engine.run_weekly(&invocation).await?;
            println!(
                "week {}: {} regime, {} setups, funnel {:?}",
                report.week,
                report.regime.as_str(),
                report.recommendation.total_setups,
                report.funnel
            );
        }
        Command::Stage { name } => run_stage(&engine, name, week).await?,
        Command::Monday => {
            let decisions = engine.run_monday(week).await?;
            for d in &decisions {
                println!("{}: {} ({})", d.symbol, d.action.as_str(), d.reason);
            }
            if decisions.is_empty() {
                println!("no approved portfolio for week {week}");
            }
        }
        Command::Friday => {
            let summary = engine.run_friday(week).await?;
            println!(
                "week {}: {} closed ({} wins), {:.0} realized P&L, health {:.0} ({:?})",
                summary.week,
                summary.closed_trades,
                summary.wins,
                summary.realized_pnl,
                summary.health.score,
                summary.health.action
            );
        }
        Command::Approve => {
            let rec = store
                .set_recommendation_status(week, RecommendationStatus::Approved)
                .await?;
            let port = store
                .set_portfolio_status(week, RecommendationStatus::Approved)
                .await?;
            if !rec && !port {
                bail!("nothing to approve for week {week}");
            }
            println!("approved week {week}");
        }
        Command::Show => match store.recommendation(week).await? {
            Some(rec) => {
                println!(
                    "week {} [{}] regime {} ({} setups)",
                    rec.week,
                    rec.status.as_str(),
                    rec.market_regime.as_str(),
                    rec.total_setups
                );
                for card in &rec.cards {
                    println!("{}", recommendation_builder::render_text(card));
                }
            }
            None => println!("no recommendation for week {week}"),
        },
    }

    Ok(())
}

async fn run_stage(engine: &PipelineEngine, name: StageName, week: NaiveDate) -> Result<()> {
    // stages after the classifier need this week's thresholds
    let thresholds = || async {
        match engine.store().regime(week).await? {
            Some(assessment) => {
                let mut t = analyzer_core::Thresholds::for_regime(assessment.state);
                t.multiplier = assessment.multiplier;
                Ok(t)
            }
            None => bail!("no regime assessment for week {week}; run `stage regime` first"),
        }
    };

    match name {
        StageName::Universe => {
            let summary = engine.run_universe().await?;
            println!(
                "universe: {} instruments, {} tradable (A {}, B {})",
                summary.total, summary.tradable, summary.tier_a, summary.tier_b
            );
        }
        StageName::Momentum => {
            let (analyzed, qualified) = engine.run_momentum(week).await?;
            println!("momentum: {qualified}/{analyzed} qualified");
        }
        StageName::Regime => {
            let (assessment, _) = engine.run_regime(week, None).await?;
            println!("regime: {}", assessment.reasoning);
        }
        StageName::Consistency => {
            let t = thresholds().await?;
            let (analyzed, qualified) = engine.run_consistency(week, &t).await?;
            println!("consistency: {qualified}/{analyzed} qualified");
        }
        StageName::Liquidity => {
            let (analyzed, qualified) = engine.run_liquidity(week).await?;
            println!("liquidity: {qualified}/{analyzed} qualified");
        }
        StageName::Setups => {
            let t = thresholds().await?;
            let detected = engine.run_setups(week, &t).await?;
            println!("setups: {detected} detected");
        }
        StageName::Sizing => {
            let t = thresholds().await?;
            let (total, qualified) = engine.run_sizing(week, &t).await?;
            println!("sizing: {qualified}/{total} qualified");
        }
        StageName::Portfolio => {
            let t = thresholds().await?;
            let allocation = engine.run_portfolio(week, &t).await?;
            println!(
                "portfolio: {} positions, {:.1}% allocated, {:.1}% cash",
                allocation.positions.len(),
                allocation.allocated_pct,
                allocation.cash_pct
            );
        }
        StageName::Recommend => {
            let Some(assessment) = engine.store().regime(week).await? else {
                bail!("no regime assessment for week {week}");
            };
            let Some(allocation) = engine.store().portfolio(week).await? else {
                bail!("no portfolio allocation for week {week}");
            };
            let funnel = analyzer_core::FunnelCounts {
                portfolio_positions: allocation.positions.len() as u32,
                ..Default::default()
            };
            let rec = engine
                .run_recommendation(week, &assessment, &allocation, funnel, vec![])
                .await?;
            println!("recommendation: {} setups", rec.total_setups);
        }
    }
    Ok(())
}
