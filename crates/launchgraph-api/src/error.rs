use serde_json::Value;
use thiserror::Error;

use launchgraph_core::state::Contradiction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    Conflict,
    InvalidArgument,
    Unprocessable,
    Blocked,
    Internal,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("validation failed: {message}")]
    Validation { message: String, details: Value },

    #[error("blocked: {message}")]
    Blocked {
        message: String,
        contradictions: Vec<Contradiction>,
    },

    #[error("internal: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Validation { .. } => ErrorCode::Unprocessable,
            Self::Blocked { .. } => ErrorCode::Blocked,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<launchgraph_core::CoreError> for ApiError {
    fn from(err: launchgraph_core::CoreError) -> Self {
        match err {
            launchgraph_core::CoreError::UnknownStateKey(key) => {
                ApiError::InvalidArgument(format!("unknown top-level state key: {key}"))
            }
            other => ApiError::InvalidArgument(other.to_string()),
        }
    }
}

impl From<launchgraph_core::StoreError> for ApiError {
    fn from(err: launchgraph_core::StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
