//! Error types for GymDesk

use thiserror::Error;

/// Result type alias for GymDesk operations
pub type GymDeskResult<T> = Result<T, GymDeskError>;

/// Main error type for GymDesk
#[derive(Error, Debug)]
pub enum GymDeskError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GymDeskError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
