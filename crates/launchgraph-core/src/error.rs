use thiserror::Error;

/// Core error types shared across the state model.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown top-level state key: {0}")]
    UnknownStateKey(String),

    #[error("state schema violation: {0}")]
    Schema(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid json pointer: {0}")]
    Pointer(#[from] crate::state::PointerError),
}
