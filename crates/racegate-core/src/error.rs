//! Error taxonomy for racegate collaborators and configuration.
//!
//! None of these escape [`crate::OrchestrationRun::execute`]: collaborator
//! errors are folded into [`crate::AttemptOutcome`] values or treated as an
//! empty pool round.

/// Errors produced by racegate collaborators and configuration checks.
#[derive(Debug, thiserror::Error)]
pub enum RaceError {
    #[error("channel source failed: {0}")]
    Source(String),

    #[error("channel validation failed for {channel}: {reason}")]
    Validation { channel: String, reason: String },

    #[error("attempt failed: {0}")]
    Attempt(String),

    #[error("notifier failed: {0}")]
    Notify(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for racegate operations.
pub type Result<T> = std::result::Result<T, RaceError>;
