use thiserror::Error;

/// Failure kinds for a single unit of work (one driver, one event).
///
/// Every variant is recoverable at unit granularity: a batch records the
/// failure against the unit and moves on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("insufficient data: need at least {required}, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("reference unavailable: {0}")]
    ReferenceUnavailable(String),

    #[error("upstream data unavailable for {source_key}: {reason}")]
    UpstreamUnavailable { source_key: String, reason: String },

    #[error("regression fit failed: {0}")]
    FitFailed(String),
}

impl AnalysisError {
    pub fn insufficient(required: usize, actual: usize) -> Self {
        AnalysisError::InsufficientData { required, actual }
    }

    pub fn upstream(source_key: impl ToString, reason: impl ToString) -> Self {
        AnalysisError::UpstreamUnavailable {
            source_key: source_key.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
