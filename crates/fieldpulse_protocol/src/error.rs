//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while formatting a request.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The endpoint cannot be used as a collector URL.
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// The rejected endpoint.
        endpoint: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The position cannot be expressed in this protocol.
    #[error("unencodable position {id}: {reason}")]
    Unencodable {
        /// Position id.
        id: u64,
        /// Why it could not be encoded.
        reason: &'static str,
    },
}

impl ProtocolError {
    pub(crate) fn invalid_endpoint(endpoint: &str, reason: &'static str) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::invalid_endpoint("ftp://x", "unsupported scheme");
        assert_eq!(
            err.to_string(),
            "invalid endpoint 'ftp://x': unsupported scheme"
        );

        let err = ProtocolError::Unencodable {
            id: 7,
            reason: "latitude is not finite",
        };
        assert_eq!(err.to_string(), "unencodable position 7: latitude is not finite");
    }
}
