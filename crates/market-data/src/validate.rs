//! Bar-level data validation.

use analyzer_core::{AnalysisError, Bar};

/// Validate a fetched daily series before it enters any stage.
///
/// Rejects series with inverted ranges (high < low) or a close-over-close
/// move beyond 50% in a day, which on NSE cash equities means a corporate
/// action the provider failed to adjust for.
pub fn validate_bars(symbol: &str, bars: &[Bar]) -> Result<(), AnalysisError> {
    for bar in bars {
        if bar.high < bar.low {
            return Err(AnalysisError::InvalidData(format!(
                "{symbol} {}: high {} < low {}",
                bar.date, bar.high, bar.low
            )));
        }
        if bar.close <= 0.0 || bar.open <= 0.0 {
            return Err(AnalysisError::InvalidData(format!(
                "{symbol} {}: non-positive price",
                bar.date
            )));
        }
        if bar.volume < 0.0 {
            return Err(AnalysisError::InvalidData(format!(
                "{symbol} {}: negative volume",
                bar.date
            )));
        }
    }

    for w in bars.windows(2) {
        let prev = w[0].close;
        let change = ((w[1].close - prev) / prev).abs();
        if change > 0.50 {
            return Err(AnalysisError::InvalidData(format!(
                "{symbol} {}: {:.0}% daily move, likely unadjusted corporate action",
                w[1].date,
                change * 100.0
            )));
        }
    }

    Ok(())
}
