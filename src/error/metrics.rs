use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Histogram error during {context}: {source}")]
    Histogram {
        context: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("Run has not reached Finished; summary is not available yet.")]
    RunNotFinished,
    #[error("Summary was already finalized for this run.")]
    AlreadyFinalized,
    #[error("Failed to build summary: {0}")]
    Metrics(#[from] MetricsError),
}
