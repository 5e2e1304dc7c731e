use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AnalysisError;
use crate::types::{Bar, FundamentalSnapshot, Instrument, MarketIndex, NiftyIndex};

/// Market-data source abstraction. Implementations are rate-limited and
/// retryable; a failed symbol is the caller's per-symbol skip, a failed
/// benchmark is fatal to the calling stage.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Daily bars for one symbol, oldest first.
    async fn daily_bars(&self, symbol: &str, days: u32) -> Result<Vec<Bar>, AnalysisError>;

    /// Daily bars for a market index.
    async fn index_daily_bars(
        &self,
        index: MarketIndex,
        days: u32,
    ) -> Result<Vec<Bar>, AnalysisError>;

    /// Full NSE EQ instruments list.
    async fn instruments(&self) -> Result<Vec<Instrument>, AnalysisError>;

    /// MTF-eligible symbol set.
    async fn mtf_symbols(&self) -> Result<Vec<String>, AnalysisError>;

    /// Constituents of a Nifty index.
    async fn index_constituents(&self, index: NiftyIndex) -> Result<Vec<String>, AnalysisError>;

    /// Monthly fundamental snapshot; `None` when the provider has no data.
    async fn fundamentals(
        &self,
        symbol: &str,
    ) -> Result<Option<FundamentalSnapshot>, AnalysisError>;
}

/// Injected time source. Workflow code never reads the wall clock directly
/// so replays stay deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for tests and replay.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
