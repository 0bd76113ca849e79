//! Failure shape reported by the application's HTTP client.
//!
//! The resilience layer never performs business requests itself; whatever client
//! the application uses reports failures as a [`RequestError`], and both the
//! classifier and the orchestrator depend only on this shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A response that reached the client but carried an error status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub status: u16,
    /// Decoded response body (`Value::Null` when there was none).
    #[serde(default)]
    pub data: Value,
}

/// A failed request.
///
/// `response` is set when the server answered; `request` is set when the
/// request was sent. A request that was sent but never answered is a
/// transport failure.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RequestError {
    pub message: String,
    #[serde(default)]
    pub response: Option<ResponseInfo>,
    /// Opaque description of the outgoing request (usually the URL).
    #[serde(default)]
    pub request: Option<String>,
}

impl RequestError {
    /// A request that was sent but never answered.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            response: None,
            request: Some("unknown".to_string()),
        }
    }

    /// A request answered with an error status.
    pub fn status(status: u16, data: Value) -> Self {
        Self {
            message: format!("Request failed with status code {}", status),
            response: Some(ResponseInfo { status, data }),
            request: None,
        }
    }

    /// A failure that happened before anything was sent.
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            response: None,
            request: None,
        }
    }

    /// Attach the outgoing request description.
    pub fn with_request(mut self, request: impl Into<String>) -> Self {
        self.request = Some(request.into());
        self
    }

    /// HTTP status of the response, if one arrived.
    pub fn status_code(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    /// The `detail` field of the response body, if present.
    pub fn detail(&self) -> Option<&Value> {
        self.response.as_ref().and_then(|r| r.data.get("detail"))
    }

    /// True when the request went out but no response came back.
    pub fn is_transport_failure(&self) -> bool {
        self.response.is_none() && self.request.is_some()
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        let request = err.url().map(|u| u.to_string());
        match err.status() {
            Some(status) => Self {
                message: err.to_string(),
                response: Some(ResponseInfo {
                    status: status.as_u16(),
                    data: Value::Null,
                }),
                request,
            },
            None => Self {
                message: err.to_string(),
                response: None,
                request: Some(request.unwrap_or_else(|| "unknown".to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_network_failure_has_no_response() {
        let err = RequestError::network("connection refused");
        assert!(err.is_transport_failure());
        assert_eq!(err.status_code(), None);
        assert_eq!(err.to_string(), "connection refused");
    }

    #[test]
    fn test_status_failure_exposes_detail() {
        let err = RequestError::status(400, json!({"detail": "Pickup slot is full"}));
        assert!(!err.is_transport_failure());
        assert_eq!(err.status_code(), Some(400));
        assert_eq!(err.detail(), Some(&json!("Pickup slot is full")));
    }

    #[test]
    fn test_unsent_request_is_not_transport_failure() {
        let err = RequestError::other("invalid header value");
        assert!(!err.is_transport_failure());
    }

    #[test]
    fn test_deserialize_client_payload() {
        let err: RequestError = serde_json::from_value(json!({
            "message": "Request failed with status code 404",
            "response": {"status": 404, "data": {"detail": "Not Found"}}
        }))
        .unwrap();
        assert_eq!(err.status_code(), Some(404));
        assert!(err.request.is_none());
    }
}
