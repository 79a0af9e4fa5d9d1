//! Error types for racegate-net

use racegate_core::RaceError;
use thiserror::Error;

/// Errors raised by the HTTP collaborators.
#[derive(Error, Debug)]
pub enum NetError {
    /// Transport-level failure (connect, TLS, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// A proxy address reqwest refused to use.
    #[error("invalid proxy address: {0}")]
    InvalidProxy(String),

    /// Provider response had no recognisable channel list.
    #[error("unparseable provider response: {0}")]
    Parse(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for NetError {
    fn from(err: reqwest::Error) -> Self {
        NetError::Http(err.to_string())
    }
}

impl NetError {
    /// Fold into the core error for a channel source failure.
    pub fn into_source_error(self) -> RaceError {
        RaceError::Source(self.to_string())
    }

    pub fn into_validation_error(self, channel: impl Into<String>) -> RaceError {
        RaceError::Validation {
            channel: channel.into(),
            reason: self.to_string(),
        }
    }
}

/// Result type for racegate-net operations.
pub type NetResult<T> = std::result::Result<T, NetError>;
