use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Calculation error: {0}")]
    Calculation(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Benchmark unavailable: {0}")]
    BenchmarkUnavailable(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl AnalysisError {
    /// Whether the orchestrator should retry the failed activity.
    ///
    /// I/O failures are retriable; data-shape and validation failures are
    /// not (retrying with the same input cannot succeed).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            AnalysisError::Provider(_)
                | AnalysisError::BenchmarkUnavailable(_)
                | AnalysisError::Store(_)
        )
    }
}
