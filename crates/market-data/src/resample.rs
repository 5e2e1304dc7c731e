//! Daily-to-weekly resampling.

use analyzer_core::{week_start_of, Bar, WeeklyBar};
use chrono::{Datelike, Weekday};

/// Resample daily bars into ISO-week (Monday-Friday) bars.
///
/// The final week is dropped unless its last bar falls on a Friday, so a
/// run started mid-week never emits a partial bar. Weekly returns are
/// close-over-close against the prior week.
pub fn resample_weekly(bars: &[Bar]) -> Vec<WeeklyBar> {
    if bars.is_empty() {
        return vec![];
    }

    let mut weeks: Vec<WeeklyBar> = Vec::new();
    let mut current: Option<WeeklyBar> = None;

    for bar in bars {
        let ws = week_start_of(bar.date);
        match current.as_mut() {
            Some(w) if w.week_start == ws => {
                w.high = w.high.max(bar.high);
                w.low = w.low.min(bar.low);
                w.close = bar.close;
                w.volume += bar.volume;
            }
            _ => {
                if let Some(done) = current.take() {
                    weeks.push(done);
                }
                current = Some(WeeklyBar {
                    week_start: ws,
                    open: bar.open,
                    high: bar.high,
                    low: bar.low,
                    close: bar.close,
                    volume: bar.volume,
                    weekly_return: None,
                });
            }
        }
    }

    let last_date = bars.last().map(|b| b.date);
    if let Some(w) = current.take() {
        if last_date.map(|d| d.weekday() == Weekday::Fri).unwrap_or(false) {
            weeks.push(w);
        }
    }

    for i in 1..weeks.len() {
        let prev_close = weeks[i - 1].close;
        if prev_close > 0.0 {
            weeks[i].weekly_return = Some((weeks[i].close - prev_close) / prev_close);
        }
    }

    weeks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(y: i32, m: u32, d: u32, open: f64, high: f64, low: f64, close: f64, vol: f64) -> Bar {
        Bar {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            open,
            high,
            low,
            close,
            volume: vol,
        }
    }

    #[test]
    fn aggregates_one_full_week() {
        // 2026-07-20 (Mon) .. 2026-07-24 (Fri)
        let bars = vec![
            bar(2026, 7, 20, 100.0, 105.0, 99.0, 103.0, 10.0),
            bar(2026, 7, 21, 103.0, 107.0, 102.0, 106.0, 12.0),
            bar(2026, 7, 22, 106.0, 106.5, 101.0, 102.0, 9.0),
            bar(2026, 7, 23, 102.0, 104.0, 100.0, 104.0, 11.0),
            bar(2026, 7, 24, 104.0, 110.0, 103.0, 109.0, 15.0),
        ];
        let weeks = resample_weekly(&bars);
        assert_eq!(weeks.len(), 1);
        let w = &weeks[0];
        assert_eq!(w.week_start, NaiveDate::from_ymd_opt(2026, 7, 20).unwrap());
        assert_eq!(w.open, 100.0);
        assert_eq!(w.high, 110.0);
        assert_eq!(w.low, 99.0);
        assert_eq!(w.close, 109.0);
        assert_eq!(w.volume, 57.0);
        assert!(w.weekly_return.is_none());
    }

    #[test]
    fn drops_partial_final_week() {
        let mut bars = vec![
            bar(2026, 7, 20, 100.0, 101.0, 99.0, 100.0, 1.0),
            bar(2026, 7, 21, 100.0, 101.0, 99.0, 100.0, 1.0),
            bar(2026, 7, 22, 100.0, 101.0, 99.0, 100.0, 1.0),
            bar(2026, 7, 23, 100.0, 101.0, 99.0, 100.0, 1.0),
            bar(2026, 7, 24, 100.0, 101.0, 99.0, 102.0, 1.0),
        ];
        // Next week: Monday-Wednesday only
        bars.push(bar(2026, 7, 27, 102.0, 103.0, 101.0, 102.5, 1.0));
        bars.push(bar(2026, 7, 28, 102.5, 104.0, 102.0, 103.0, 1.0));
        bars.push(bar(2026, 7, 29, 103.0, 105.0, 102.0, 104.0, 1.0));

        let weeks = resample_weekly(&bars);
        assert_eq!(weeks.len(), 1);
        assert_eq!(weeks[0].close, 102.0);
    }

    #[test]
    fn holiday_shortened_interior_week_is_kept() {
        // Week 1 full, week 2 has four bars ending Friday, week 3 partial.
        let mut bars: Vec<Bar> = (0..5)
            .map(|i| bar(2026, 7, 20 + i, 100.0, 101.0, 99.0, 100.0, 1.0))
            .collect();
        // 2026-07-27 is a holiday; Tue-Fri only
        for d in [28, 29, 30, 31] {
            bars.push(bar(2026, 7, d, 100.0, 101.0, 99.0, 101.0, 1.0));
        }
        let weeks = resample_weekly(&bars);
        assert_eq!(weeks.len(), 2);
        assert_eq!(
            weeks[1].week_start,
            NaiveDate::from_ymd_opt(2026, 7, 27).unwrap()
        );
        assert!((weeks[1].weekly_return.unwrap() - 0.01).abs() < 1e-9);
    }
}
