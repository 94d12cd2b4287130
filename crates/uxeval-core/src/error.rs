//! Error taxonomy for heuristic evaluation.

use crate::model::ModelError;
use crate::response::ResponseError;

/// Errors surfaced by the evaluation engine.
///
/// Transient model failures (`Timeout`, `Backend`) are absorbed by the
/// orchestrator's retry loop; callers only see them wrapped inside
/// [`EvalError::EvaluationFailed`] once the retry budget is spent.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unsupported artifact ({kind}): {reason}")]
    UnsupportedArtifact { kind: String, reason: String },

    #[error("model call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("model backend error: {0}")]
    Backend(String),

    #[error("malformed model response: {0}")]
    MalformedResponse(#[from] ResponseError),

    #[error("evaluation failed at heuristic '{heuristic_id}': {cause}")]
    EvaluationFailed {
        heuristic_id: String,
        cause: Box<EvalError>,
    },

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("inconsistent findings: {0}")]
    InconsistentFindings(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EvalError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn unsupported(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedArtifact {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Id of the heuristic a failed run stopped at, if any.
    pub fn failed_heuristic(&self) -> Option<&str> {
        match self {
            Self::EvaluationFailed { heuristic_id, .. } => Some(heuristic_id),
            _ => None,
        }
    }

    /// Whether this error is a caller-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<ModelError> for EvalError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Result type for evaluation operations.
pub type Result<T> = std::result::Result<T, EvalError>;
