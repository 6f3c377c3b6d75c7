//! Error types for the tracker.

use crate::source::SourceError;
use fieldpulse_core::CoreError;
use fieldpulse_protocol::ProtocolError;
use thiserror::Error;

/// Result type for tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Errors that can occur while delivering positions.
///
/// The delivery machine only sees success or failure; the variants exist
/// for logs and for callers of the individual components.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The collector answered with a non-2xx status.
    #[error("collector rejected request: HTTP {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },

    /// Timeout.
    #[error("request timed out")]
    Timeout,

    /// The position could not be formatted.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Queue error.
    #[error("queue error: {0}")]
    Queue(#[from] CoreError),

    /// Position source error.
    #[error("position source error: {0}")]
    Source(#[from] SourceError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The controller task ended abnormally.
    #[error("controller task failed: {0}")]
    Join(String),
}

impl TrackerError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            TrackerError::Transport { retryable, .. } => *retryable,
            TrackerError::Timeout => true,
            TrackerError::Rejected { status } => *status == 429 || *status >= 500,
            TrackerError::Queue(e) => e.is_storage_fault(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(TrackerError::transport_retryable("connection reset").is_retryable());
        assert!(!TrackerError::transport_fatal("bad url").is_retryable());
        assert!(TrackerError::Timeout.is_retryable());
        assert!(TrackerError::Rejected { status: 503 }.is_retryable());
        assert!(TrackerError::Rejected { status: 429 }.is_retryable());
        assert!(!TrackerError::Rejected { status: 400 }.is_retryable());
        assert!(!TrackerError::Config("empty".into()).is_retryable());
        assert!(TrackerError::Queue(CoreError::Injected("insert")).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = TrackerError::Rejected { status: 404 };
        assert_eq!(err.to_string(), "collector rejected request: HTTP 404");

        let err = TrackerError::from(SourceError::PermissionDenied("location".into()));
        assert!(err.to_string().contains("permission denied"));
    }
}
