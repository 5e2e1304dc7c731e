//! Execution decision engine (stage S7).
//!
//! Pure decision functions over the approved portfolio and market
//! observations: the Monday gap decision tree, intraweek position status
//! with alerts, and the Friday summary with the system health verdict.
//! No orders are placed anywhere; the output is a decision record.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use analyzer_core::{
    FridaySummary, GapAction, GapDecision, HealthAction, PortfolioPosition, PositionState,
    PositionStatus, SystemHealth, TradeOutcome,
};

/// Monday-open gap decision for one position. The branch order is the
/// contract: the stop check dominates everything else.
pub fn gap_decision(
    position: &PortfolioPosition,
    open: f64,
    prev_close: f64,
    week: NaiveDate,
) -> GapDecision {
    let gap_pct = if prev_close > 0.0 {
        (open - prev_close) / prev_close * 100.0
    } else {
        0.0
    };

    let (action, reason) = if open <= position.stop {
        (
            GapAction::SkipGappedThroughStop,
            format!("open {open:.2} at or below stop {:.2}", position.stop),
        )
    } else if open > position.entry_high * 1.02 {
        (
            GapAction::SkipDoNotChase,
            format!(
                "open {open:.2} more than 2% above entry zone top {:.2}",
                position.entry_high
            ),
        )
    } else if open >= position.entry_low && open <= position.entry_high {
        (
            GapAction::EnterAtOpen,
            format!(
                "open {open:.2} inside entry zone {:.2}-{:.2}",
                position.entry_low, position.entry_high
            ),
        )
    } else if open > position.stop && open < position.entry_low {
        (
            GapAction::EnterAtOpenSmallGapAgainst,
            format!(
                "open {open:.2} below entry zone but above stop {:.2}",
                position.stop
            ),
        )
    } else {
        (
            GapAction::WaitAndWatch,
            format!("open {open:.2} slightly above entry zone, wait for a pullback"),
        )
    };

    GapDecision {
        symbol: position.symbol.clone(),
        week,
        open_price: open,
        gap_pct,
        action,
        reason,
    }
}

/// Intraweek status for an open position at `current` price.
pub fn position_status(position: &PortfolioPosition, current: f64) -> PositionStatus {
    let entry = (position.entry_low + position.entry_high) / 2.0;
    let risk_per_share = (entry - position.stop).max(f64::EPSILON);

    let state = if current <= position.stop {
        PositionState::StoppedOut
    } else if current >= position.target_2 {
        PositionState::Target2Hit
    } else if current >= position.target_1 {
        PositionState::Target1Hit
    } else if current > entry {
        PositionState::InProfit
    } else {
        PositionState::InLoss
    };

    let pnl = (current - entry) * position.shares as f64;
    let pnl_pct = if entry > 0.0 {
        (current - entry) / entry * 100.0
    } else {
        0.0
    };
    let r_multiple = (current - entry) / risk_per_share;

    let mut alerts = Vec::new();
    let stop_distance_pct = (current - position.stop) / current * 100.0;
    if stop_distance_pct > 0.0 && stop_distance_pct < 2.0 {
        alerts.push(format!("{}: price within 2% of stop", position.symbol));
    }
    if current > entry {
        let to_t1 = (position.target_1 - current) / current * 100.0;
        if to_t1 > 0.0 && to_t1 < 2.0 {
            alerts.push(format!(
                "{}: approaching target 1 ({:.2})",
                position.symbol, position.target_1
            ));
        }
        let to_t2 = (position.target_2 - current) / current * 100.0;
        if to_t2 > 0.0 && to_t2 < 2.0 {
            alerts.push(format!(
                "{}: approaching target 2 ({:.2})",
                position.symbol, position.target_2
            ));
        }
    }
    if (0.95..=1.05).contains(&r_multiple) {
        alerts.push(format!(
            "{}: at 1R, move stop to breakeven",
            position.symbol
        ));
    } else if (1.95..=2.05).contains(&r_multiple) {
        alerts.push(format!(
            "{}: at 2R (target 1), take partial profits",
            position.symbol
        ));
    }
    if r_multiple >= 1.5 {
        let trail = entry + 0.5 * risk_per_share;
        alerts.push(format!(
            "{}: trail stop to {:.2} to lock in 0.5R",
            position.symbol, trail
        ));
    }

    PositionStatus {
        symbol: position.symbol.clone(),
        state,
        current_price: current,
        pnl,
        pnl_pct,
        r_multiple,
        alerts,
    }
}

/// Fraction of planned entries actually executed per the gap decisions;
/// feeds the health score's execution component.
pub fn execution_score(decisions_planned: u32, decisions_executed: u32) -> f64 {
    if decisions_planned == 0 {
        return 100.0;
    }
    f64::from(decisions_executed) / f64::from(decisions_planned) * 100.0
}

/// System health over the rolling outcome history.
///
/// 40% twelve-week win rate + 30% expectancy (0.5R saturates) +
/// 20% inverse drawdown (20% saturates) + 10% execution adherence.
pub fn system_health(
    outcomes: &[TradeOutcome],
    as_of: NaiveDate,
    execution_score: f64,
) -> SystemHealth {
    let closed: Vec<&TradeOutcome> = outcomes
        .iter()
        .filter(|o| o.status == "closed_win" || o.status == "closed_loss")
        .collect();

    if closed.is_empty() {
        return SystemHealth {
            score: 50.0,
            win_rate_12w: 0.0,
            expectancy_12w: 0.0,
            drawdown_pct: 0.0,
            execution_score,
            action: HealthAction::Pause,
        };
    }

    let twelve_weeks_ago = as_of - Duration::weeks(12);
    let recent: Vec<&&TradeOutcome> = closed
        .iter()
        .filter(|o| o.exit_date.map(|d| d > twelve_weeks_ago).unwrap_or(false))
        .collect();

    let (win_rate_12w, expectancy_12w) = if recent.is_empty() {
        (0.0, 0.0)
    } else {
        let wins: Vec<&&&TradeOutcome> = recent.iter().filter(|o| o.pnl > 0.0).collect();
        let win_rate = wins.len() as f64 / recent.len() as f64;
        let avg_win = if wins.is_empty() {
            0.0
        } else {
            wins.iter().map(|o| o.r_multiple).sum::<f64>() / wins.len() as f64
        };
        let losses: Vec<&&&TradeOutcome> = recent.iter().filter(|o| o.pnl <= 0.0).collect();
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            (losses.iter().map(|o| o.r_multiple).sum::<f64>() / losses.len() as f64).abs()
        };
        (win_rate, win_rate * avg_win - (1.0 - win_rate) * avg_loss)
    };

    // current drawdown of cumulative P&L from its peak, oldest first
    let mut chronological: Vec<&TradeOutcome> = closed.clone();
    chronological.sort_by_key(|o| (o.exit_date, o.week));
    let mut running = 0.0;
    let mut peak = 0.0f64;
    for o in chronological {
        running += o.pnl;
        peak = peak.max(running);
    }
    let drawdown_frac = if peak > 0.0 {
        ((peak - running) / peak).max(0.0)
    } else if running < 0.0 {
        1.0
    } else {
        0.0
    };

    let expectancy_n = (expectancy_12w / 0.5).clamp(0.0, 1.0);
    let drawdown_n = (drawdown_frac / 0.20).clamp(0.0, 1.0);

    let score = 0.4 * win_rate_12w * 100.0
        + 0.3 * expectancy_n * 100.0
        + 0.2 * (100.0 - drawdown_n * 100.0)
        + 0.1 * execution_score;

    let action = if score >= 70.0 {
        HealthAction::Continue
    } else if score >= 50.0 {
        HealthAction::Reduce
    } else if score >= 30.0 {
        HealthAction::Pause
    } else {
        HealthAction::Stop
    };

    SystemHealth {
        score,
        win_rate_12w,
        expectancy_12w,
        drawdown_pct: drawdown_frac * 100.0,
        execution_score,
        action,
    }
}

/// Friday close summary for one week of outcomes.
pub fn friday_summary(
    week: NaiveDate,
    outcomes: &[TradeOutcome],
    health: SystemHealth,
    calculated_at: DateTime<Utc>,
) -> FridaySummary {
    let week_outcomes: Vec<&TradeOutcome> =
        outcomes.iter().filter(|o| o.week == week).collect();

    let closed: Vec<&&TradeOutcome> = week_outcomes
        .iter()
        .filter(|o| o.status == "closed_win" || o.status == "closed_loss")
        .collect();
    let open: Vec<&&TradeOutcome> =
        week_outcomes.iter().filter(|o| o.status == "open").collect();

    let wins = closed.iter().filter(|o| o.pnl > 0.0).count() as u32;
    let losses = closed.len() as u32 - wins;
    let realized_pnl: f64 = closed.iter().map(|o| o.pnl).sum();
    let unrealized_pnl: f64 = open.iter().map(|o| o.pnl).sum();
    let weekly_r_sum: f64 = closed.iter().map(|o| o.r_multiple).sum();
    let win_rate = if closed.is_empty() {
        0.0
    } else {
        f64::from(wins) / closed.len() as f64
    };

    FridaySummary {
        week,
        closed_trades: closed.len() as u32,
        open_trades: open.len() as u32,
        wins,
        losses,
        win_rate,
        realized_pnl,
        unrealized_pnl,
        weekly_r_sum,
        health,
        calculated_at,
    }
}
