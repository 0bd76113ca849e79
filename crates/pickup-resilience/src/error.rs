//! Error types for the resilience layer.
//!
//! Operation failures are carried through unchanged inside
//! [`ResilienceError::Request`]; the other variants describe conditions the
//! layer itself detects.

use crate::classifier::{classify, Classification, ErrorKind, UserMessage};
use crate::config::Messages;
use crate::http::RequestError;
use thiserror::Error;

/// Main error type for the resilience layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResilienceError {
    /// The wrapped operation failed; this is the original error.
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Network unavailable and no cached data for {cache_key:?}")]
    Offline { cache_key: Option<String> },

    #[error("Superseded by a newer execution (generation {generation})")]
    Superseded { generation: u64 },

    #[error("No previous operation to retry")]
    NothingToRetry,

    #[error("Error channel is not initialized: {context}")]
    MissingErrorChannel { context: String },

    #[error("Reachability probe error: {message}")]
    Probe { message: String },
}

/// Result type alias for resilience operations.
pub type Result<T> = std::result::Result<T, ResilienceError>;

impl ResilienceError {
    /// The original request failure, if this error wraps one.
    pub fn as_request(&self) -> Option<&RequestError> {
        match self {
            ResilienceError::Request(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, ResilienceError::Offline { .. })
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, ResilienceError::Superseded { .. })
    }
}

impl UserMessage for ResilienceError {
    fn classification(&self) -> Classification {
        match self {
            ResilienceError::Request(err) => classify(err),
            ResilienceError::Offline { .. } => Classification {
                kind: ErrorKind::Network,
                message: Messages::OFFLINE.to_string(),
            },
            other => Classification {
                kind: ErrorKind::Unknown,
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_is_transparent() {
        let original = RequestError::network("socket hang up");
        let err = ResilienceError::from(original.clone());
        assert_eq!(err.to_string(), "socket hang up");
        assert_eq!(err.as_request(), Some(&original));
    }

    #[test]
    fn test_offline_classification() {
        let err = ResilienceError::Offline {
            cache_key: Some("pickups".into()),
        };
        assert!(err.is_offline());
        let c = err.classification();
        assert_eq!(c.kind, ErrorKind::Network);
        assert_eq!(c.message, Messages::OFFLINE);
    }

    #[test]
    fn test_internal_errors_fall_back_to_display() {
        let err = ResilienceError::NothingToRetry;
        assert_eq!(err.classification().message, "No previous operation to retry");
    }
}
