//! Attempt outcomes and their error classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::channel::Channel;

/// Classification of a failed attempt.
///
/// `Transient` and `Business` are retried on the next round; `Permanent`
/// ends the current round for the entity without affecting others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    None,
    Transient,
    Permanent,
    Business,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::None => write!(f, "none"),
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Permanent => write!(f, "permanent"),
            ErrorKind::Business => write!(f, "business"),
        }
    }
}

/// Result of one attempt (or one race of attempts) for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub succeeded: bool,
    pub error_kind: ErrorKind,
    pub detail: String,

    /// Channel the attempt went through; `None` for default routing.
    pub channel_used: Option<Channel>,

    /// Wall time spent on the attempt.
    #[serde(default)]
    pub elapsed: Duration,

    /// Raw response body, when the executor kept one.
    #[serde(default)]
    pub response: Option<serde_json::Value>,
}

impl AttemptOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            error_kind: ErrorKind::None,
            detail: detail.into(),
            channel_used: None,
            elapsed: Duration::ZERO,
            response: None,
        }
    }

    pub fn failure(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            error_kind: kind,
            detail: detail.into(),
            channel_used: None,
            elapsed: Duration::ZERO,
            response: None,
        }
        .normalized()
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self::failure(ErrorKind::Transient, detail)
    }

    pub fn business(detail: impl Into<String>) -> Self {
        Self::failure(ErrorKind::Business, detail)
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self::failure(ErrorKind::Permanent, detail)
    }

    /// Short-circuit result when an entity has nothing but sentinels.
    pub fn no_usable_channel() -> Self {
        Self::permanent("no usable channel")
    }

    pub fn with_channel(mut self, channel: Option<Channel>) -> Self {
        self.channel_used = channel;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn with_response(mut self, response: serde_json::Value) -> Self {
        self.response = Some(response);
        self
    }

    /// Make `succeeded` and `error_kind` agree.
    ///
    /// A success never carries an error kind; a failure without one counts
    /// as transient.
    pub fn normalized(mut self) -> Self {
        if self.succeeded {
            self.error_kind = ErrorKind::None;
        } else if self.error_kind == ErrorKind::None {
            self.error_kind = ErrorKind::Transient;
        }
        self
    }
}
