use thiserror::Error;

use crate::incidents::lifecycle::Rejection;
use crate::models::incident::{IncidentAction, IncidentStatus};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Analysis failure: {0}")]
    AnalysisFailure(String),

    #[error("Redaction failure: {0}")]
    RedactionFailure(String),

    #[error("Transition rejected: cannot {action} from {from}: {reason}")]
    TransitionRejected {
        from: IncidentStatus,
        action: IncidentAction,
        reason: Rejection,
    },

    #[error("Delivery failure: {0}")]
    DeliveryFailure(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the operation may succeed if retried later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::ServiceUnavailable(_) | Self::DeliveryFailure(_)
        )
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::TransitionRejected { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
