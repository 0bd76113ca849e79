//! Pickup Resilience - async-operation resilience layer for the pickup app.
//!
//! Every network-backed user action runs through an [`AsyncOrchestrator`],
//! which composes:
//! - a [`RetryController`] (bounded exponential backoff, latest-wins supersession)
//! - a [`NetworkMonitor`] (online/offline tracking and reachability checks)
//! - a [`SessionCache`] (per-entry TTL over a session-scoped store)
//! - a [`Notifier`] (deduplicated success/error/warning/info notifications)
//! - an [`ErrorChannel`] (single slot for the last unhandled error)
//!
//! # Example
//!
//! ```rust,ignore
//! use pickup_resilience::*;
//! use std::sync::Arc;
//!
//! let monitor = Arc::new(NetworkMonitor::start(Arc::new(ManualConnectivity::new(true))));
//! let notifier = Notifier::new(Arc::new(RecordingSurface::new()));
//! let errors = ErrorChannel::new().with_notifier(notifier.clone());
//!
//! let pickups = AsyncOrchestrator::<Vec<String>>::builder(monitor)
//!     .config(OrchestratorConfig::new().with_global_errors(true))
//!     .notifier(notifier)
//!     .error_channel(errors)
//!     .build()?;
//!
//! let list = pickups.execute(|| async { Ok(vec!["Tuesday".to_string()]) }).await?;
//! ```

pub mod cache;
pub mod channel;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod network;
pub mod notify;
pub mod orchestrator;
pub mod retry;

pub use cache::{CacheEntry, MemorySessionStore, SessionCache, SessionStore};
pub use channel::{ErrorChannel, ErrorRecord};
pub use classifier::{classify, Classification, ErrorKind, UserMessage};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ResilienceError, Result};
pub use http::{RequestError, ResponseInfo};
pub use network::{
    ConnectivityEvent, ConnectivitySource, HttpProbe, ManualConnectivity, NetworkMonitor,
    ReachabilityProbe, StaticProbe,
};
pub use notify::{
    NotificationHandle, NotificationOptions, NotificationRequest, NotificationSurface,
    NotificationUpdate, NotificationVariant, Notifier, RecordingSurface, SurfaceEvent,
    TrackMessages,
};
pub use orchestrator::{AsyncMessages, AsyncOrchestrator, AsyncSnapshot, OrchestratorConfig};
pub use retry::{ErrorContext, RetryConfig, RetryController, RetryError, RetryState, RetryStats};
