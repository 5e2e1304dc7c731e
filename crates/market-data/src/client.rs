//! HTTP market-data provider.
//!
//! All requests go through [`PacedFetcher`], which enforces the provider's
//! minimum inter-call delay, bounds concurrency, and retries transient
//! failures with backoff. A symbol that still fails after retries surfaces
//! as an error for the caller to skip; batch helpers in [`crate::batch`]
//! handle the skip-and-log policy.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

use analyzer_core::{
    AnalysisError, Bar, FundamentalSnapshot, Instrument, MarketDataProvider, MarketIndex,
    NiftyIndex,
};

const YAHOO_BASE: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const INSTRUMENTS_URL: &str = "https://assets.upstox.com/market-quote/instruments/exchange/NSE.json";
const MTF_URL: &str = "https://assets.upstox.com/market-quote/instruments/exchange/MTF.json";
const CONSTITUENTS_BASE: &str = "https://www.nseindia.com/api/equity-stockIndices";

const RETRY_BACKOFF_SECS: [u64; 3] = [2, 4, 8];

/// Shared HTTP client with a minimum inter-call delay, bounded concurrency,
/// and retry on transient failures.
pub struct PacedFetcher {
    client: Client,
    semaphore: Semaphore,
    min_delay: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl PacedFetcher {
    pub fn new(min_delay_ms: u64, max_concurrent: usize) -> Result<Self, AnalysisError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| AnalysisError::Provider(format!("http client: {e}")))?;

        Ok(Self {
            client,
            semaphore: Semaphore::new(max_concurrent),
            min_delay: Duration::from_millis(min_delay_ms),
            last_call: Mutex::new(None),
        })
    }

    /// Wait until at least `min_delay` has elapsed since the previous call.
    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// GET a JSON document with pacing, concurrency control, and retry on
    /// 429/timeout. Non-transient HTTP errors fail immediately.
    pub async fn get_json(&self, url: &str) -> Result<serde_json::Value, AnalysisError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| AnalysisError::Provider(format!("semaphore: {e}")))?;

        let mut last_err = String::new();
        for (attempt, backoff) in std::iter::once(0u64)
            .chain(RETRY_BACKOFF_SECS.iter().copied())
            .enumerate()
        {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }

            self.pace().await;

            match self.client.get(url).send().await {
                Ok(resp) => {
                    if resp.status() == 429 {
                        last_err = "rate limited (429)".to_string();
                        continue;
                    }
                    if !resp.status().is_success() {
                        return Err(AnalysisError::Provider(format!(
                            "HTTP {} for {url}",
                            resp.status()
                        )));
                    }
                    return resp
                        .json()
                        .await
                        .map_err(|e| AnalysisError::Provider(format!("bad JSON: {e}")));
                }
                Err(e) => {
                    last_err = format!("request error: {e}");
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(AnalysisError::Provider(last_err));
                }
            }
        }

        Err(AnalysisError::Provider(last_err))
    }
}

/// Yahoo-chart backed provider for NSE equities and indices.
pub struct YahooChartProvider {
    fetcher: PacedFetcher,
    exchange_suffix: String,
}

impl YahooChartProvider {
    pub fn new(min_delay_ms: u64, max_concurrent: usize) -> Result<Self, AnalysisError> {
        Ok(Self {
            fetcher: PacedFetcher::new(min_delay_ms, max_concurrent)?,
            exchange_suffix: ".NS".to_string(),
        })
    }

    fn index_symbol(index: MarketIndex) -> &'static str {
        match index {
            MarketIndex::Nifty50 => "^NSEI",
            MarketIndex::IndiaVix => "^INDIAVIX",
            MarketIndex::Bank => "^NSEBANK",
            MarketIndex::Metal => "^CNXMETAL",
            MarketIndex::Realty => "^CNXREALTY",
            MarketIndex::Auto => "^CNXAUTO",
            MarketIndex::Pharma => "^CNXPHARMA",
            MarketIndex::Fmcg => "^CNXFMCG",
            MarketIndex::It => "^CNXIT",
        }
    }

    fn constituents_index_name(index: NiftyIndex) -> &'static str {
        match index {
            NiftyIndex::Nifty50 => "NIFTY 50",
            NiftyIndex::Nifty100 => "NIFTY 100",
            NiftyIndex::Nifty200 => "NIFTY 200",
            NiftyIndex::Nifty500 => "NIFTY 500",
        }
    }

    async fn chart_bars(&self, yahoo_symbol: &str, days: u32) -> Result<Vec<Bar>, AnalysisError> {
        let end = Utc::now().timestamp();
        let start = end - i64::from(days) * 86_400;
        let url = format!(
            "{YAHOO_BASE}/{yahoo_symbol}?period1={start}&period2={end}&interval=1d&includeAdjustedClose=true"
        );

        let doc = self.fetcher.get_json(&url).await?;
        parse_chart_bars(&doc)
            .ok_or_else(|| AnalysisError::Provider(format!("empty chart for {yahoo_symbol}")))
    }
}

/// Pull the bar arrays out of a Yahoo chart document. Rows with any null
/// field are dropped (exchange holidays surface as nulls).
fn parse_chart_bars(doc: &serde_json::Value) -> Option<Vec<Bar>> {
    let result = doc.get("chart")?.get("result")?.get(0)?;
    let timestamps = result.get("timestamp")?.as_array()?;
    let quote = result.get("indicators")?.get("quote")?.get(0)?;

    let opens = quote.get("open")?.as_array()?;
    let highs = quote.get("high")?.as_array()?;
    let lows = quote.get("low")?.as_array()?;
    let closes = quote.get("close")?.as_array()?;
    let volumes = quote.get("volume")?.as_array()?;

    let mut bars = Vec::with_capacity(timestamps.len());
    for i in 0..timestamps.len() {
        let ts = timestamps.get(i)?.as_i64()?;
        let (open, high, low, close, volume) = match (
            opens.get(i).and_then(|v| v.as_f64()),
            highs.get(i).and_then(|v| v.as_f64()),
            lows.get(i).and_then(|v| v.as_f64()),
            closes.get(i).and_then(|v| v.as_f64()),
            volumes.get(i).and_then(|v| v.as_f64()),
        ) {
            (Some(o), Some(h), Some(l), Some(c), Some(v)) => (o, h, l, c, v),
            _ => continue,
        };
        let date = DateTime::from_timestamp(ts, 0)?.date_naive();
        bars.push(Bar {
            date,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    if bars.is_empty() {
        None
    } else {
        Some(bars)
    }
}

#[async_trait]
impl MarketDataProvider for YahooChartProvider {
    async fn daily_bars(&self, symbol: &str, days: u32) -> Result<Vec<Bar>, AnalysisError> {
        let yahoo_symbol = format!("{symbol}{}", self.exchange_suffix);
        self.chart_bars(&yahoo_symbol, days).await
    }

    async fn index_daily_bars(
        &self,
        index: MarketIndex,
        days: u32,
    ) -> Result<Vec<Bar>, AnalysisError> {
        self.chart_bars(Self::index_symbol(index), days)
            .await
            .map_err(|e| match index {
                // Everything downstream needs the benchmark; escalate.
                MarketIndex::Nifty50 => AnalysisError::BenchmarkUnavailable(e.to_string()),
                _ => e,
            })
    }

    async fn instruments(&self) -> Result<Vec<Instrument>, AnalysisError> {
        let doc = self.fetcher.get_json(INSTRUMENTS_URL).await?;
        let rows = doc
            .as_array()
            .ok_or_else(|| AnalysisError::Provider("instruments feed is not a list".into()))?;

        let mut out = Vec::new();
        for row in rows {
            let segment = row.get("segment").and_then(|v| v.as_str()).unwrap_or("");
            let itype = row
                .get("instrument_type")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if segment != "NSE_EQ" || itype != "EQ" {
                continue;
            }
            let symbol = match row.get("trading_symbol").and_then(|v| v.as_str()) {
                Some(s) if !s.is_empty() => s.to_string(),
                _ => continue,
            };
            out.push(Instrument {
                symbol,
                name: row
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                isin: row
                    .get("isin")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                segment: segment.to_string(),
                instrument_type: itype.to_string(),
                lot_size: row.get("lot_size").and_then(|v| v.as_u64()).unwrap_or(1) as u32,
                tick_size: row.get("tick_size").and_then(|v| v.as_f64()).unwrap_or(0.05),
                sector: row
                    .get("sector")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
            });
        }
        Ok(out)
    }

    async fn mtf_symbols(&self) -> Result<Vec<String>, AnalysisError> {
        let doc = self.fetcher.get_json(MTF_URL).await?;
        let rows = doc
            .as_array()
            .ok_or_else(|| AnalysisError::Provider("MTF feed is not a list".into()))?;
        let mut out: Vec<String> = rows
            .iter()
            .filter_map(|r| r.get("trading_symbol").and_then(|v| v.as_str()))
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    async fn index_constituents(&self, index: NiftyIndex) -> Result<Vec<String>, AnalysisError> {
        let name = Self::constituents_index_name(index).replace(' ', "%20");
        let url = format!("{CONSTITUENTS_BASE}?index={name}");
        let doc = self.fetcher.get_json(&url).await?;
        let rows = doc
            .get("data")
            .and_then(|v| v.as_array())
            .ok_or_else(|| AnalysisError::Provider("constituents feed missing data".into()))?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get("symbol").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
            .collect())
    }

    async fn fundamentals(
        &self,
        _symbol: &str,
    ) -> Result<Option<FundamentalSnapshot>, AnalysisError> {
        // The chart provider has no fundamentals endpoint. The monthly
        // snapshot arrives through a separately configured provider; absent
        // data renormalizes the conviction weights downstream.
        Ok(None)
    }
}

/// In-memory provider for tests and offline runs.
#[derive(Default)]
pub struct StaticProvider {
    pub bars: HashMap<String, Vec<Bar>>,
    pub index_bars: HashMap<MarketIndex, Vec<Bar>>,
    pub instruments: Vec<Instrument>,
    pub mtf: Vec<String>,
    pub constituents: HashMap<NiftyIndex, Vec<String>>,
    pub fundamentals: HashMap<String, FundamentalSnapshot>,
}

#[async_trait]
impl MarketDataProvider for StaticProvider {
    async fn daily_bars(&self, symbol: &str, _days: u32) -> Result<Vec<Bar>, AnalysisError> {
        self.bars
            .get(symbol)
            .cloned()
            .ok_or_else(|| AnalysisError::Provider(format!("no data for {symbol}")))
    }

    async fn index_daily_bars(
        &self,
        index: MarketIndex,
        _days: u32,
    ) -> Result<Vec<Bar>, AnalysisError> {
        self.index_bars.get(&index).cloned().ok_or_else(|| match index {
            MarketIndex::Nifty50 => {
                AnalysisError::BenchmarkUnavailable("no benchmark data".into())
            }
            _ => AnalysisError::Provider(format!("no data for {index:?}")),
        })
    }

    async fn instruments(&self) -> Result<Vec<Instrument>, AnalysisError> {
        Ok(self.instruments.clone())
    }

    async fn mtf_symbols(&self) -> Result<Vec<String>, AnalysisError> {
        Ok(self.mtf.clone())
    }

    async fn index_constituents(&self, index: NiftyIndex) -> Result<Vec<String>, AnalysisError> {
        Ok(self.constituents.get(&index).cloned().unwrap_or_default())
    }

    async fn fundamentals(
        &self,
        symbol: &str,
    ) -> Result<Option<FundamentalSnapshot>, AnalysisError> {
        Ok(self.fundamentals.get(symbol).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chart_document() {
        let doc: serde_json::Value = serde_json::from_str(
            r#"{"chart":{"result":[{
                "timestamp":[1753660800,1753747200],
                "indicators":{"quote":[{
                    "open":[100.0,102.0],
                    "high":[103.0,104.0],
                    "low":[99.0,101.0],
                    "close":[102.0,103.5],
                    "volume":[1000,1200]
                }]}
            }]}}"#,
        )
        .unwrap();
        let bars = parse_chart_bars(&doc).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 102.0);
        assert!(bars[0].date < bars[1].date);
    }

    #[test]
    fn null_rows_are_dropped() {
        let doc: serde_json::Value = serde_json::from_str(
            r#"{"chart":{"result":[{
                "timestamp":[1753660800,1753747200],
                "indicators":{"quote":[{
                    "open":[100.0,null],
                    "high":[103.0,null],
                    "low":[99.0,null],
                    "close":[102.0,null],
                    "volume":[1000,null]
                }]}
            }]}}"#,
        )
        .unwrap();
        let bars = parse_chart_bars(&doc).unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn empty_chart_is_none() {
        let doc: serde_json::Value =
            serde_json::from_str(r#"{"chart":{"result":[]}}"#).unwrap();
        assert!(parse_chart_bars(&doc).is_none());
    }

    #[tokio::test]
    async fn static_provider_benchmark_failure_is_fatal_kind() {
        let provider = StaticProvider::default();
        let err = provider
            .index_daily_bars(MarketIndex::Nifty50, 400)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::BenchmarkUnavailable(_)));
    }
}
