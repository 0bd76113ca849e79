//! Maps request failures to user-facing categories and messages.

use crate::config::Messages;
use crate::http::RequestError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of a failure, as shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request never reached the server.
    Network,
    /// 401.
    Auth,
    /// 403.
    Permission,
    /// 404.
    NotFound,
    /// 422, possibly with several field messages.
    Validation,
    /// 5xx.
    Server,
    /// Any other response carrying a `detail` payload.
    Client,
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::Auth => write!(f, "auth"),
            ErrorKind::Permission => write!(f, "permission"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Server => write!(f, "server"),
            ErrorKind::Client => write!(f, "client"),
            ErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of classifying a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: ErrorKind,
    pub message: String,
}

impl Classification {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Classify a request failure. First matching rule wins.
pub fn classify(error: &RequestError) -> Classification {
    let response = match &error.response {
        Some(response) => response,
        None if error.is_transport_failure() => {
            return Classification::new(ErrorKind::Network, Messages::NETWORK)
        }
        None => return Classification::new(ErrorKind::Unknown, Messages::UNEXPECTED),
    };

    let detail = response.data.get("detail");

    match response.status {
        401 => return Classification::new(ErrorKind::Auth, Messages::SESSION_EXPIRED),
        403 => return Classification::new(ErrorKind::Permission, Messages::PERMISSION_DENIED),
        404 => return Classification::new(ErrorKind::NotFound, Messages::NOT_FOUND),
        422 => {
            if let Some(joined) = detail.and_then(join_field_messages) {
                return Classification::new(ErrorKind::Validation, joined);
            }
            if let Some(Value::String(text)) = detail {
                return Classification::new(ErrorKind::Validation, text.clone());
            }
        }
        _ => {}
    }

    if response.status >= 500 {
        return Classification::new(ErrorKind::Server, Messages::SERVER_ERROR);
    }

    match detail {
        Some(Value::String(text)) => Classification::new(ErrorKind::Client, text.clone()),
        _ => Classification::new(ErrorKind::Unknown, Messages::UNEXPECTED),
    }
}

/// Join the `msg` fields of a FastAPI-style validation array.
///
/// Returns `None` unless `detail` is a non-empty array whose every item has a
/// string `msg`.
fn join_field_messages(detail: &Value) -> Option<String> {
    let items = detail.as_array()?;
    if items.is_empty() {
        return None;
    }
    let messages = items
        .iter()
        .map(|item| item.get("msg").and_then(Value::as_str))
        .collect::<Option<Vec<_>>>()?;
    Some(messages.join(", "))
}

/// Errors that can describe themselves to users.
///
/// The error channel and the orchestrator only surface errors through this
/// trait.
pub trait UserMessage: std::error::Error + Send + Sync + 'static {
    fn classification(&self) -> Classification;
}

impl UserMessage for RequestError {
    fn classification(&self) -> Classification {
        classify(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(err: RequestError) -> String {
        classify(&err).message
    }

    #[test]
    fn test_network_failure() {
        let c = classify(&RequestError::network("ECONNREFUSED"));
        assert_eq!(c.kind, ErrorKind::Network);
        assert_eq!(
            c.message,
            "Unable to connect to the server. Please check your internet connection."
        );
    }

    #[test]
    fn test_fixed_status_messages() {
        assert_eq!(
            message(RequestError::status(401, json!({"detail": "ignored"}))),
            Messages::SESSION_EXPIRED
        );
        assert_eq!(
            message(RequestError::status(403, Value::Null)),
            Messages::PERMISSION_DENIED
        );
        assert_eq!(message(RequestError::status(404, Value::Null)), Messages::NOT_FOUND);
        assert_eq!(
            message(RequestError::status(503, json!({"detail": "maintenance"}))),
            Messages::SERVER_ERROR
        );
    }

    #[test]
    fn test_validation_array_joined() {
        let err = RequestError::status(
            422,
            json!({"detail": [
                {"loc": ["body", "address"], "msg": "field required"},
                {"loc": ["body", "date"], "msg": "invalid date"}
            ]}),
        );
        let c = classify(&err);
        assert_eq!(c.kind, ErrorKind::Validation);
        assert_eq!(c.message, "field required, invalid date");
    }

    #[test]
    fn test_validation_scalar_detail() {
        let c = classify(&RequestError::status(422, json!({"detail": "Weight too high"})));
        assert_eq!(c.kind, ErrorKind::Validation);
        assert_eq!(c.message, "Weight too high");
    }

    #[test]
    fn test_client_error_with_detail() {
        let c = classify(&RequestError::status(409, json!({"detail": "Pickup already scheduled"})));
        assert_eq!(c.kind, ErrorKind::Client);
        assert_eq!(c.message, "Pickup already scheduled");
    }

    #[test]
    fn test_fallbacks() {
        assert_eq!(message(RequestError::status(400, Value::Null)), Messages::UNEXPECTED);
        assert_eq!(message(RequestError::other("bad config")), Messages::UNEXPECTED);
        // Malformed validation payloads fall through.
        assert_eq!(
            message(RequestError::status(422, json!({"detail": [{"loc": []}]}))),
            Messages::UNEXPECTED
        );
        assert_eq!(
            message(RequestError::status(400, json!({"detail": {"code": 7}}))),
            Messages::UNEXPECTED
        );
    }
}
