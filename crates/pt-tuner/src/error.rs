use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunerError {
    #[error("Pool already registered: {0}")]
    DuplicateName(String),

    #[error("Invalid bounds for pool {name}: min_core {min_core} > max_core {max_core}")]
    InvalidBounds {
        name: String,
        min_core: u32,
        max_core: u32,
    },

    #[error("Pool not found: {0}")]
    NotFound(String),

    #[error("Recommendation failed: {0}")]
    Recommendation(#[from] RecommendationError),

    #[error("Recommendation for pool {pool} timed out after {after:?}")]
    Timeout { pool: String, after: Duration },

    #[error("Pool at capacity: {0}")]
    CapacityRejection(String),

    #[error("Queue of pool {0} is not resizable")]
    QueueNotResizable(String),

    #[error("Shutdown in progress")]
    ShutdownInProgress,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunerError {
    /// Errors caused by a bad registration rather than runtime conditions
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, TunerError::DuplicateName(_) | TunerError::InvalidBounds { .. })
    }
}

/// Failures of a single recommendation fetch. Always recoverable: the cycle is skipped.
#[derive(Error, Debug)]
pub enum RecommendationError {
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Recommendation service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed recommendation: {0}")]
    Malformed(String),

    #[error("Missing field in recommendation response: {0}")]
    MissingField(&'static str),

    #[error("No metric history available for pool {0}")]
    EmptyHistory(String),
}

impl From<serde_json::Error> for RecommendationError {
    fn from(e: serde_json::Error) -> Self {
        RecommendationError::Malformed(e.to_string())
    }
}
