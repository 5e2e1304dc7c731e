//! Activity execution under the durable-runtime contract.
//!
//! Every I/O-bearing unit of work runs through [`run_activity`]: bounded
//! retries with exponential backoff for retriable errors, a per-kind
//! timeout, and a cooperative cancellation check before each attempt.
//! Activities are idempotent by construction (all writes are keyed
//! upserts), so at-least-once execution is safe.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use analyzer_core::AnalysisError;

/// Retry schedule: 1 s initial, doubling, three attempts, 30 s ceiling.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub backoff: f64,
    pub max_attempts: u32,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            backoff: 2.0,
            max_attempts: 3,
            max_interval: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let secs = self.initial.as_secs_f64() * self.backoff.powi(attempt as i32);
        Duration::from_secs_f64(secs).min(self.max_interval)
    }
}

/// Activity class determines the timeout budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    /// Batch I/O over many symbols.
    BatchIo,
    /// Pure computation.
    Compute,
    /// One provider round-trip.
    SingleFetch,
}

impl ActivityKind {
    pub fn timeout(&self) -> Duration {
        match self {
            ActivityKind::BatchIo => Duration::from_secs(600),
            ActivityKind::Compute => Duration::from_secs(300),
            ActivityKind::SingleFetch => Duration::from_secs(180),
        }
    }
}

/// Cooperative cancellation shared across a run. Checked at activity
/// boundaries; in-flight work completes and its keyed output stands.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), AnalysisError> {
        if self.is_cancelled() {
            Err(AnalysisError::Validation("run cancelled".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Run one activity with retry, timeout, and cancellation.
///
/// `make` is invoked fresh for each attempt. Non-retriable errors
/// (validation, bad data) surface immediately; retriable errors exhaust
/// the policy before failing the activity.
pub async fn run_activity<T, F, Fut>(
    name: &str,
    kind: ActivityKind,
    policy: &RetryPolicy,
    cancel: &CancelFlag,
    make: F,
) -> Result<T, AnalysisError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AnalysisError>>,
{
    let mut last_err: Option<AnalysisError> = None;

    for attempt in 0..policy.max_attempts {
        cancel.check()?;

        if attempt > 0 {
            let delay = policy.delay_for(attempt - 1);
            tracing::warn!(
                "activity {name}: attempt {} after {:?} ({})",
                attempt + 1,
                delay,
                last_err.as_ref().map(|e| e.to_string()).unwrap_or_default()
            );
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout(kind.timeout(), make()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if e.is_retriable() => last_err = Some(e),
            Ok(Err(e)) => {
                tracing::error!("activity {name}: non-retriable failure: {e}");
                return Err(e);
            }
            Err(_) => {
                last_err = Some(AnalysisError::Provider(format!(
                    "activity {name} timed out after {:?}",
                    kind.timeout()
                )));
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| AnalysisError::Provider(format!("activity {name}: retries exhausted"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_millis(1),
            backoff: 2.0,
            max_attempts: 3,
            max_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let result = run_activity(
            "ok",
            ActivityKind::Compute,
            &fast_policy(),
            &CancelFlag::new(),
            || async { Ok::<_, AnalysisError>(42) },
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let result = run_activity(
            "flaky",
            ActivityKind::SingleFetch,
            &fast_policy(),
            &CancelFlag::new(),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(AnalysisError::Provider("transient".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_retries_on_persistent_transient_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let result: Result<(), _> = run_activity(
            "down",
            ActivityKind::SingleFetch,
            &fast_policy(),
            &CancelFlag::new(),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AnalysisError::Provider("still down".to_string()))
                }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn validation_errors_do_not_retry() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let result: Result<(), _> = run_activity(
            "bad-input",
            ActivityKind::Compute,
            &fast_policy(),
            &CancelFlag::new(),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AnalysisError::Validation("inverted bar".to_string()))
                }
            },
        )
        .await;
        assert!(matches!(result, Err(AnalysisError::Validation(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_before_attempt() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result: Result<i32, _> = run_activity(
            "cancelled",
            ActivityKind::Compute,
            &fast_policy(),
            &cancel,
            || async { Ok(1) },
        )
        .await;
        assert!(matches!(result, Err(AnalysisError::Validation(_))));
    }
}
