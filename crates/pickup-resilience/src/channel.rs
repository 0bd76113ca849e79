//! Global error channel: a single slot holding the last unhandled error.
//!
//! The channel is an explicit object. Create one per application scope, hand
//! clones to whatever needs to report or observe errors, and drop it to tear
//! it down. There is no ambient instance.

use crate::classifier::{Classification, ErrorKind, UserMessage};
use crate::clock::{Clock, SystemClock};
use crate::config::Messages;
use crate::notify::Notifier;
use chrono::{DateTime, Utc};
use std::error::Error as StdError;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// The error currently held by the channel.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    /// The error exactly as reported.
    pub original: Arc<dyn StdError + Send + Sync>,
    pub kind: ErrorKind,
    /// User-facing message.
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    /// Downcast the original error to its concrete type.
    pub fn original_as<E: StdError + 'static>(&self) -> Option<&E> {
        self.original.downcast_ref::<E>()
    }
}

/// Process-wide error slot.
///
/// Cheap to clone; clones share the slot.
#[derive(Clone)]
pub struct ErrorChannel {
    slot: Arc<watch::Sender<Option<ErrorRecord>>>,
    notifier: Option<Notifier>,
    clock: Arc<dyn Clock>,
}

impl ErrorChannel {
    /// Create an empty channel that only stores records.
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
            notifier: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Surface every recorded error as one error notification.
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record `error`, replacing whatever the slot held.
    pub fn set<E>(&self, error: &E) -> ErrorRecord
    where
        E: UserMessage + Clone,
    {
        let classification = catch_unwind(AssertUnwindSafe(|| error.classification()))
            .unwrap_or_else(|_| {
                warn!("Error classification panicked; falling back to error text");
                fallback_classification(error)
            });

        let record = ErrorRecord {
            original: Arc::new(error.clone()),
            kind: classification.kind,
            message: classification.message,
            timestamp: self.clock.now(),
        };

        debug!("Recording {} error: {}", record.kind, record.message);
        self.slot.send_replace(Some(record.clone()));

        if let Some(notifier) = &self.notifier {
            notifier.error(record.message.clone());
        }

        record
    }

    /// Empty the slot.
    pub fn clear(&self) {
        if self.slot.send_replace(None).is_some() {
            debug!("Error channel cleared");
        }
    }

    /// Await `operation`; on failure record the error and return it unchanged.
    pub async fn wrap<T, E, Fut>(&self, operation: Fut) -> std::result::Result<T, E>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
        E: UserMessage + Clone,
    {
        match operation.await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.set(&err);
                Err(err)
            }
        }
    }

    /// The record currently held, if any.
    pub fn current(&self) -> Option<ErrorRecord> {
        self.slot.borrow().clone()
    }

    pub fn has_error(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Observe changes to the slot.
    pub fn subscribe(&self) -> watch::Receiver<Option<ErrorRecord>> {
        self.slot.subscribe()
    }

    /// Whether recorded errors are also surfaced as notifications.
    pub fn notifies(&self) -> bool {
        self.notifier.is_some()
    }
}

impl Default for ErrorChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn fallback_classification<E: StdError>(error: &E) -> Classification {
    let text = error.to_string();
    Classification {
        kind: ErrorKind::Unknown,
        message: if text.is_empty() {
            Messages::UNEXPECTED.to_string()
        } else {
            text
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestError;
    use crate::notify::{NotificationVariant, RecordingSurface};
    use serde_json::json;

    #[derive(Debug, Clone, thiserror::Error)]
    #[error("{0}")]
    struct Brittle(String);

    impl UserMessage for Brittle {
        fn classification(&self) -> Classification {
            panic!("classifier bug")
        }
    }

    #[test]
    fn test_set_then_clear_is_empty() {
        let channel = ErrorChannel::new();
        channel.set(&RequestError::status(500, json!({})));
        assert!(channel.has_error());

        channel.clear();
        assert!(channel.current().is_none());
    }

    #[test]
    fn test_set_replaces_previous_record() {
        let channel = ErrorChannel::new();
        channel.set(&RequestError::status(404, json!({})));
        channel.set(&RequestError::network("offline"));

        let record = channel.current().unwrap();
        assert_eq!(record.kind, ErrorKind::Network);
        assert_eq!(
            record.original_as::<RequestError>(),
            Some(&RequestError::network("offline"))
        );
    }

    #[test]
    fn test_classifier_panic_falls_back_to_text() {
        let channel = ErrorChannel::new();
        let record = channel.set(&Brittle("disk full".into()));
        assert_eq!(record.message, "disk full");
        assert_eq!(record.kind, ErrorKind::Unknown);

        let record = channel.set(&Brittle(String::new()));
        assert_eq!(record.message, Messages::UNEXPECTED);
    }

    #[tokio::test]
    async fn test_wrap_rethrows_identical_error() {
        let channel = ErrorChannel::new();
        let original = RequestError::status(422, json!({"detail": "Bad address"}));

        let result: Result<(), RequestError> =
            channel.wrap(async { Err(original.clone()) }).await;

        assert_eq!(result.unwrap_err(), original);
        assert_eq!(channel.current().unwrap().message, "Bad address");
    }

    #[tokio::test]
    async fn test_wrap_success_leaves_slot_untouched() {
        let channel = ErrorChannel::new();
        let value = channel
            .wrap(async { Ok::<_, RequestError>("booked") })
            .await
            .unwrap();
        assert_eq!(value, "booked");
        assert!(!channel.has_error());
    }

    #[test]
    fn test_notifier_integration_emits_once_per_set() {
        let surface = Arc::new(RecordingSurface::new());
        let channel = ErrorChannel::new().with_notifier(Notifier::new(surface.clone()));

        channel.set(&RequestError::status(403, json!({})));
        assert_eq!(surface.shown_count(NotificationVariant::Error), 1);
        assert_eq!(
            surface.shown()[0].message,
            "You do not have permission to perform this action."
        );
    }

    #[tokio::test]
    async fn test_subscribers_observe_changes() {
        let channel = ErrorChannel::new();
        let mut rx = channel.subscribe();

        channel.set(&RequestError::network("down"));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_some());

        channel.clear();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }
}
