//! Position sizing (stage S5).
//!
//! Base size from the per-trade risk budget, scaled by a volatility
//! adjustment against the benchmark ATR, a Kelly fraction from the rolling
//! outcome statistics, and the regime multiplier, then capped by capital.

use chrono::{DateTime, Utc};

use analyzer_core::{EngineConfig, OutcomeStats, PositionSize, Thresholds, TradeSetup};

/// Kelly fraction f* = (p*b - q) / b with b = avgWin/avgLoss, clipped to
/// [0, 1]. A negative edge sizes to zero rather than shorting the idea.
pub fn kelly_fraction(stats: &OutcomeStats) -> f64 {
    if stats.avg_win_r <= 0.0 || stats.avg_loss_r <= 0.0 {
        return 0.0;
    }
    let p = stats.win_rate;
    let q = 1.0 - p;
    let b = stats.avg_win_r / stats.avg_loss_r;
    ((p * b - q) / b).clamp(0.0, 1.0)
}

/// Volatility adjustment: benchmark ATR over stock ATR, clamped to
/// [0.5, 1.5]. Callers pass ATRs on a comparable scale (the orchestrator
/// normalizes the index ATR by its level before handing it over).
pub fn volatility_adjustment(nifty_atr: f64, stock_atr: f64) -> f64 {
    if stock_atr <= 0.0 || nifty_atr <= 0.0 {
        return 1.0;
    }
    (nifty_atr / stock_atr).clamp(0.5, 1.5)
}

/// Size one setup.
pub fn size_position(
    setup: &TradeSetup,
    sector: &str,
    nifty_atr: f64,
    stock_atr: f64,
    stats: &OutcomeStats,
    config: &EngineConfig,
    thresholds: &Thresholds,
    calculated_at: DateTime<Utc>,
) -> PositionSize {
    let mid_entry = setup.mid_entry();
    let risk_per_share = setup.risk_per_share();

    let base_risk_budget = config.portfolio_value * config.risk_pct_per_trade;
    let base_shares = if risk_per_share > 0.0 {
        (base_risk_budget / risk_per_share).floor() as u64
    } else {
        0
    };

    let vol_adjustment = volatility_adjustment(nifty_atr, stock_atr);
    let kelly = kelly_fraction(stats);
    let regime_multiplier = thresholds.multiplier;

    let mut final_shares =
        (base_shares as f64 * vol_adjustment * kelly * regime_multiplier).floor() as u64;

    // capital cap: one position never exceeds its slice of the book
    let max_value = config.portfolio_value * config.max_position_pct;
    if final_shares as f64 * mid_entry > max_value && mid_entry > 0.0 {
        final_shares = (max_value / mid_entry).floor() as u64;
    }

    let position_value = final_shares as f64 * mid_entry;
    let final_risk = final_shares as f64 * risk_per_share;
    let position_pct = if config.portfolio_value > 0.0 {
        position_value / config.portfolio_value
    } else {
        0.0
    };

    let qualifies = final_shares >= 1
        && setup.rr >= thresholds.rr_floor
        && setup.stop_distance_pct <= config.max_stop_distance_pct;

    PositionSize {
        symbol: setup.symbol.clone(),
        week: setup.week,
        setup_type: setup.setup_type,
        sector: sector.to_string(),
        mid_entry,
        stop: setup.stop,
        stop_method: setup.stop_method,
        risk_per_share,
        base_shares,
        vol_adjustment,
        kelly_fraction: kelly,
        regime_multiplier,
        final_shares,
        position_value,
        final_risk,
        position_pct,
        quality_composite: setup.quality_composite,
        qualifies,
        calculated_at,
    }
}
