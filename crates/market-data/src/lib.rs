pub mod batch;
pub mod client;
pub mod indicators;
pub mod resample;
pub mod validate;

pub use batch::fetch_daily_batch;
pub use client::{PacedFetcher, StaticProvider, YahooChartProvider};
pub use indicators::{compute_indicators, ema, macd, sma, wilder_atr, wilder_rsi};
pub use resample::resample_weekly;
pub use validate::validate_bars;
