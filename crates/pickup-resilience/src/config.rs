//! Centralized defaults for the resilience layer.
//!
//! Runtime configuration lives on builder-style structs next to the component
//! that consumes it (`RetryConfig`, `OrchestratorConfig`, ...). The constants
//! here are the values those builders start from.

use std::time::Duration;

/// Retry controller defaults.
pub struct RetryDefaults;

impl RetryDefaults {
    pub const MAX_RETRIES: u32 = 3;
    pub const INITIAL_DELAY: Duration = Duration::from_millis(1000);
    pub const BACKOFF_FACTOR: f64 = 2.0;
    pub const MAX_DELAY: Duration = Duration::from_secs(30);
}

/// Session cache defaults.
pub struct CacheDefaults;

impl CacheDefaults {
    /// Default freshness window for cached responses (5 minutes).
    pub const TTL: Duration = Duration::from_secs(300);
    /// Upper bound on how long the in-memory session store keeps anything.
    pub const SESSION_LIFETIME: Duration = Duration::from_secs(8 * 3600);
    pub const SESSION_MAX_ENTRIES: u64 = 512;
    /// Prefix applied to every key written to the session store.
    pub const KEY_PREFIX: &'static str = "pickup-cache:";
}

/// Notification display defaults.
pub struct NotificationDefaults;

impl NotificationDefaults {
    pub const SUCCESS_DURATION: Duration = Duration::from_secs(3);
    pub const INFO_DURATION: Duration = Duration::from_secs(3);
    pub const WARNING_DURATION: Duration = Duration::from_secs(5);
    pub const ERROR_DURATION: Duration = Duration::from_secs(6);
}

/// Network reachability defaults.
pub struct NetworkDefaults;

impl NetworkDefaults {
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
    pub const USER_AGENT: &'static str = "Pickup-Resilience/0.3";
}

/// User-facing message catalogue.
pub struct Messages;

impl Messages {
    pub const NETWORK: &'static str =
        "Unable to connect to the server. Please check your internet connection.";
    pub const SESSION_EXPIRED: &'static str = "Your session has expired. Please log in again.";
    pub const PERMISSION_DENIED: &'static str =
        "You do not have permission to perform this action.";
    pub const NOT_FOUND: &'static str = "The requested resource was not found.";
    pub const SERVER_ERROR: &'static str = "A server error occurred. Please try again later.";
    pub const UNEXPECTED: &'static str = "An unexpected error occurred. Please try again.";
    pub const OFFLINE: &'static str =
        "You are offline. Please check your connection and try again.";
    pub const RECOVERED: &'static str = "Connection recovered. Operation completed successfully.";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_outlasts_success() {
        assert!(NotificationDefaults::ERROR_DURATION > NotificationDefaults::SUCCESS_DURATION);
        assert!(NotificationDefaults::ERROR_DURATION > NotificationDefaults::INFO_DURATION);
    }

    #[test]
    fn test_retry_defaults_are_reasonable() {
        assert_eq!(RetryDefaults::MAX_RETRIES, 3);
        assert!(RetryDefaults::INITIAL_DELAY >= Duration::from_secs(1));
        assert!(RetryDefaults::MAX_DELAY > RetryDefaults::INITIAL_DELAY);
    }
}
