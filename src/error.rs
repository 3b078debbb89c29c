use thiserror::Error;

/// Failures raised by the evaluation-and-tuning engine.
///
/// Command plumbing wraps these in `anyhow::Error`; the orchestrator matches
/// on them at the per-configuration boundary.
#[derive(Debug, Clone, Error)]
pub enum TuneError {
    /// A parameter option is missing, unknown, or has the wrong type.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Indexing, retrieval, or reading failed for one configuration.
    #[error("run execution failed: {0}")]
    RunExecution(String),
    /// A scorer was asked to aggregate over zero qualifying questions.
    #[error("metric undefined: {0}")]
    MetricUndefined(String),
}

impl TuneError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn undefined(message: impl Into<String>) -> Self {
        Self::MetricUndefined(message.into())
    }
}

impl From<rusqlite::Error> for TuneError {
    fn from(error: rusqlite::Error) -> Self {
        Self::RunExecution(format!("sqlite: {error}"))
    }
}

pub type TuneResult<T> = std::result::Result<T, TuneError>;
