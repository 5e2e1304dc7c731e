//! Per-symbol batch fetch with the skip-and-log failure policy.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;

use analyzer_core::{AnalysisError, Bar, MarketDataProvider};

use crate::validate::validate_bars;

/// Fetch daily bars for a batch of symbols with bounded concurrency.
///
/// A symbol whose fetch or validation fails is omitted from the result and
/// logged; the batch itself only errors if the join machinery breaks. The
/// provider enforces its own pacing underneath, so `concurrency` bounds
/// in-flight work rather than request rate.
pub async fn fetch_daily_batch(
    provider: Arc<dyn MarketDataProvider>,
    symbols: &[String],
    days: u32,
    concurrency: usize,
) -> Result<HashMap<String, Vec<Bar>>, AnalysisError> {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for symbol in symbols {
        let provider = Arc::clone(&provider);
        let semaphore = Arc::clone(&semaphore);
        let symbol = symbol.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire().await;
            let result = provider.daily_bars(&symbol, days).await;
            (symbol, result)
        });
    }

    let mut out = HashMap::new();
    let mut skipped = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (symbol, result) =
            joined.map_err(|e| AnalysisError::Provider(format!("join error: {e}")))?;
        match result {
            Ok(bars) => match validate_bars(&symbol, &bars) {
                Ok(()) => {
                    out.insert(symbol, bars);
                }
                Err(e) => {
                    tracing::warn!("dropping {symbol}: {e}");
                    skipped += 1;
                }
            },
            Err(e) => {
                tracing::warn!("fetch failed for {symbol}: {e}");
                skipped += 1;
            }
        }
    }

    tracing::info!(
        "batch fetch complete: {}/{} symbols ({skipped} skipped)",
        out.len(),
        symbols.len()
    );
    Ok(out)
}
