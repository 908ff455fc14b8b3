//! Error types for isotrack core

use isotrack_types::DescriptorError;
use thiserror::Error;

/// Errors that can occur in isotrack core
///
/// Expected run-ending conditions (stall, mismatch, engine down) are not
/// errors; they are reported as [`isotrack_types::Outcome::Failed`]. This
/// type carries transport faults to be classified and the fatal conditions
/// that abort a run outright.
#[derive(Debug, Error)]
pub enum IsotrackError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Request rejected by engine: {0}")]
    Rejected(String),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Malformed engine response: {0}")]
    MalformedResponse(String),

    #[error("Release feed is missing field `{0}`")]
    MissingField(&'static str),

    #[error("No available release in feed")]
    NoRelease,

    #[error("Invalid release descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IsotrackError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            IsotrackError::Network(_) => true,
            IsotrackError::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Conditions that abort a run instead of being classified
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IsotrackError::MalformedResponse(_)
                | IsotrackError::MissingField(_)
                | IsotrackError::InvalidDescriptor(_)
                | IsotrackError::Task(_)
        )
    }
}
