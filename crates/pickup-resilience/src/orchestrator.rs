//! AsyncOrchestrator - one call contract for network-backed user actions.
//!
//! Provides:
//! - Offline short-circuit with fresh-cache fallback
//! - Cache-first reads for keyed operations
//! - Bounded retries through a [`RetryController`]
//! - Loading, success, recovery, offline and error notifications
//! - Global error reporting without double surfacing
//! - A reactive [`AsyncSnapshot`] of the action's state

use crate::cache::SessionCache;
use crate::channel::ErrorChannel;
use crate::classifier::UserMessage;
use crate::clock::{Clock, SystemClock};
use crate::config::{CacheDefaults, Messages};
use crate::error::{ResilienceError, Result};
use crate::http::RequestError;
use crate::network::NetworkMonitor;
use crate::notify::{NotificationHandle, NotificationOptions, NotificationVariant, Notifier};
use crate::retry::{RetryConfig, RetryController, RetryError, RetryStats};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Notification texts for one action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncMessages {
    /// Shown while the action runs.
    pub loading: Option<String>,
    pub success: Option<String>,
    /// Replaces the classified error message.
    pub error: Option<String>,
}

impl AsyncMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loading(mut self, message: impl Into<String>) -> Self {
        self.loading = Some(message.into());
        self
    }

    pub fn success(mut self, message: impl Into<String>) -> Self {
        self.success = Some(message.into());
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}

/// Configuration for an [`AsyncOrchestrator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Cache results under this key.
    pub cache_key: Option<String>,
    pub cache_ttl: Duration,
    pub retry: RetryConfig,
    /// Report exhausted failures to the error channel instead of notifying locally.
    pub update_global_error: bool,
    /// Announce success after at least one retry.
    pub notify_recovery: bool,
    /// Warn when an action fails because the app is offline.
    pub notify_offline: bool,
    pub messages: AsyncMessages,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cache_key: None,
            cache_ttl: CacheDefaults::TTL,
            retry: RetryConfig::default(),
            update_global_error: false,
            notify_recovery: true,
            notify_offline: true,
            messages: AsyncMessages::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.cache_key = Some(key.into());
        self.cache_ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_global_errors(mut self, enabled: bool) -> Self {
        self.update_global_error = enabled;
        self
    }

    pub fn with_recovery_notice(mut self, enabled: bool) -> Self {
        self.notify_recovery = enabled;
        self
    }

    pub fn with_offline_notice(mut self, enabled: bool) -> Self {
        self.notify_offline = enabled;
        self
    }

    pub fn with_messages(mut self, messages: AsyncMessages) -> Self {
        self.messages = messages;
        self
    }
}

/// Reactive state of an orchestrated action.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncSnapshot<T> {
    pub data: Option<T>,
    /// `data` is null, false, zero, an empty string or an empty list.
    pub is_empty: bool,
    pub is_loading: bool,
    pub is_retrying: bool,
    pub retry_count: u32,
    pub error: Option<ResilienceError>,
    pub is_online: bool,
    /// When `data` was produced.
    pub timestamp: Option<DateTime<Utc>>,
    /// `data` came from the cache.
    pub from_cache: bool,
}

impl<T> AsyncSnapshot<T> {
    fn initial(is_online: bool) -> Self {
        Self {
            data: None,
            is_empty: true,
            is_loading: false,
            is_retrying: false,
            retry_count: 0,
            error: None,
            is_online,
            timestamp: None,
            from_cache: false,
        }
    }
}

/// Whether a value counts as "no data" for display purposes.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(_) => false,
    }
}

type OfflineHandler = Arc<dyn Fn() + Send + Sync + 'static>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for [`AsyncOrchestrator`].
pub struct OrchestratorBuilder<T> {
    config: OrchestratorConfig,
    monitor: Arc<NetworkMonitor>,
    cache: Option<SessionCache>,
    notifier: Option<Notifier>,
    error_channel: Option<ErrorChannel>,
    on_offline: Option<OfflineHandler>,
    clock: Arc<dyn Clock>,
    _data: PhantomData<fn() -> T>,
}

impl<T> OrchestratorBuilder<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache(mut self, cache: SessionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn error_channel(mut self, channel: ErrorChannel) -> Self {
        self.error_channel = Some(channel);
        self
    }

    /// Called whenever an action fails because the app is offline.
    pub fn on_offline(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_offline = Some(Arc::new(handler));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the orchestrator.
    ///
    /// Fails if global error reporting is enabled without an error channel.
    pub fn build(self) -> Result<AsyncOrchestrator<T>> {
        if self.config.update_global_error && self.error_channel.is_none() {
            return Err(ResilienceError::MissingErrorChannel {
                context: "update_global_error is enabled but no ErrorChannel was provided"
                    .to_string(),
            });
        }

        if self.config.update_global_error && self.notifier.is_none() {
            if let Some(channel) = &self.error_channel {
                if !channel.notifies() {
                    warn!(
                        "update_global_error is enabled but neither the error channel \
                         nor the orchestrator has a notifier; failures will not be shown"
                    );
                }
            }
        }

        let cache = match (&self.config.cache_key, self.cache) {
            (Some(key), None) => {
                debug!("No session cache supplied for {}; using an in-memory one", key);
                Some(SessionCache::in_memory().with_clock(Arc::clone(&self.clock)))
            }
            (_, cache) => cache,
        };

        let (snapshot, _) = watch::channel(AsyncSnapshot::initial(self.monitor.is_online()));
        let snapshot = Arc::new(snapshot);

        let publisher = Arc::clone(&snapshot);
        let controller = RetryController::new(self.config.retry.clone()).with_on_error(
            move |_: &RequestError, ctx| {
                publisher.send_modify(|s| {
                    s.is_retrying = ctx.will_retry;
                    // Count the retry about to run.
                    s.retry_count = if ctx.will_retry {
                        ctx.attempt + 1
                    } else {
                        ctx.attempt
                    };
                });
            },
        );

        Ok(AsyncOrchestrator {
            config: self.config,
            controller,
            monitor: self.monitor,
            cache,
            notifier: self.notifier,
            error_channel: self.error_channel,
            on_offline: self.on_offline,
            clock: self.clock,
            snapshot,
            loading: Mutex::new(None),
        })
    }
}

/// Runs user actions with caching, retries, offline handling and notifications.
pub struct AsyncOrchestrator<T> {
    config: OrchestratorConfig,
    controller: RetryController<T, RequestError>,
    monitor: Arc<NetworkMonitor>,
    cache: Option<SessionCache>,
    notifier: Option<Notifier>,
    error_channel: Option<ErrorChannel>,
    on_offline: Option<OfflineHandler>,
    clock: Arc<dyn Clock>,
    snapshot: Arc<watch::Sender<AsyncSnapshot<T>>>,
    /// Loading notice of the most recent call.
    loading: Mutex<Option<NotificationHandle>>,
}

impl<T> AsyncOrchestrator<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn builder(monitor: Arc<NetworkMonitor>) -> OrchestratorBuilder<T> {
        OrchestratorBuilder {
            config: OrchestratorConfig::default(),
            monitor,
            cache: None,
            notifier: None,
            error_channel: None,
            on_offline: None,
            clock: Arc::new(SystemClock),
            _data: PhantomData,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run `operation` with the configured messages.
    pub async fn execute<F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, RequestError>> + Send + 'static,
    {
        let messages = self.config.messages.clone();
        self.run(&messages, self.controller.execute_with_stats(operation))
            .await
    }

    /// Run `operation` with per-call messages.
    pub async fn handle_async<F, Fut>(&self, operation: F, messages: AsyncMessages) -> Result<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, RequestError>> + Send + 'static,
    {
        self.run(&messages, self.controller.execute_with_stats(operation))
            .await
    }

    /// Re-run the last operation.
    pub async fn retry(&self) -> Result<T> {
        if !self.controller.has_operation() {
            return Err(ResilienceError::NothingToRetry);
        }
        let messages = self.config.messages.clone();
        self.run(&messages, self.controller.retry_with_stats()).await
    }

    /// Current state of the action.
    pub fn snapshot(&self) -> AsyncSnapshot<T> {
        let mut snapshot = self.snapshot.borrow().clone();
        snapshot.is_online = self.monitor.is_online();
        snapshot
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<AsyncSnapshot<T>> {
        self.snapshot.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    /// Drop the cached result, if the action is keyed.
    pub fn invalidate_cache(&self) {
        if let (Some(key), Some(cache)) = (&self.config.cache_key, &self.cache) {
            cache.invalidate(key);
        }
    }

    fn publish(&self, update: impl FnOnce(&mut AsyncSnapshot<T>)) {
        let is_online = self.monitor.is_online();
        self.snapshot.send_modify(|s| {
            update(s);
            s.is_online = is_online;
        });
    }

    fn cached(&self) -> Option<(T, DateTime<Utc>)> {
        let key = self.config.cache_key.as_deref()?;
        let entry = self.cache.as_ref()?.get_entry(key)?;
        let written_at = entry.written_at;
        match serde_json::from_value(entry.data) {
            Ok(data) => Some((data, written_at)),
            Err(e) => {
                warn!("Ignoring cached {} with unexpected shape: {}", key, e);
                None
            }
        }
    }

    fn serve_cached(&self, data: T, written_at: DateTime<Utc>) -> T {
        let is_empty = serde_json::to_value(&data)
            .map(|v| is_empty_value(&v))
            .unwrap_or(false);
        let published = data.clone();
        self.publish(|s| {
            s.data = Some(published);
            s.is_empty = is_empty;
            s.timestamp = Some(written_at);
            s.from_cache = true;
            s.error = None;
            s.is_loading = false;
        });
        data
    }

    /// Dismiss a call's loading notice unless a newer call is showing it.
    fn settle_loading(&self, handle: NotificationHandle, superseded: bool) {
        {
            let mut current = lock(&self.loading);
            if *current == Some(handle) {
                if superseded {
                    debug!("Keeping loading notice {:?} for the newer call", handle);
                    return;
                }
                *current = None;
            }
        }
        if let Some(notifier) = &self.notifier {
            notifier.dismiss(handle);
        }
    }

    fn handle_offline(&self) {
        if let Some(handler) = &self.on_offline {
            handler();
        }
        if self.config.notify_offline {
            if let Some(notifier) = &self.notifier {
                notifier.warning(Messages::OFFLINE);
            }
        }
    }

    async fn run<C>(&self, messages: &AsyncMessages, cycle: C) -> Result<T>
    where
        C: Future<Output = (std::result::Result<T, RetryError<RequestError>>, RetryStats)>,
    {
        let issued_at = match &self.cache {
            Some(cache) => cache.now(),
            None => self.clock.now(),
        };

        if !self.monitor.is_online() {
            if let Some((data, written_at)) = self.cached() {
                info!("Offline; serving cached {:?}", self.config.cache_key);
                return Ok(self.serve_cached(data, written_at));
            }

            info!(
                "Offline with no cached data for {:?}; skipping request",
                self.config.cache_key
            );
            let error = ResilienceError::Offline {
                cache_key: self.config.cache_key.clone(),
            };
            let published = error.clone();
            self.publish(|s| {
                s.error = Some(published);
                s.is_loading = false;
            });
            self.handle_offline();
            return Err(error);
        }

        if let Some((data, written_at)) = self.cached() {
            return Ok(self.serve_cached(data, written_at));
        }

        let loading = match (&messages.loading, &self.notifier) {
            (Some(message), Some(notifier)) => Some(notifier.emit(
                NotificationVariant::Info,
                message.clone(),
                Some(NotificationOptions::persistent()),
            )),
            _ => None,
        };
        *lock(&self.loading) = loading;

        self.publish(|s| {
            s.is_loading = true;
            s.is_retrying = false;
            s.retry_count = 0;
            s.error = None;
        });

        let (result, stats) = cycle.await;

        if let Some(handle) = loading {
            let superseded = matches!(result, Err(RetryError::Superseded { .. }));
            self.settle_loading(handle, superseded);
        }

        match result {
            Ok(data) => {
                let is_empty = serde_json::to_value(&data)
                    .map(|v| is_empty_value(&v))
                    .unwrap_or(false);
                let timestamp = self.clock.now();
                let published = data.clone();
                self.publish(|s| {
                    s.data = Some(published);
                    s.is_empty = is_empty;
                    s.timestamp = Some(timestamp);
                    s.from_cache = false;
                    s.error = None;
                    s.is_loading = false;
                    s.is_retrying = false;
                    s.retry_count = stats.retries();
                });

                if let (Some(key), Some(cache)) = (&self.config.cache_key, &self.cache) {
                    cache.set_issued(key, &data, self.config.cache_ttl, issued_at);
                }

                if let Some(notifier) = &self.notifier {
                    if stats.retries() > 0 && self.config.notify_recovery {
                        info!("Recovered after {} retries", stats.retries());
                        notifier.success(Messages::RECOVERED);
                    } else if let Some(message) = &messages.success {
                        notifier.success(message.clone());
                    }
                }

                Ok(data)
            }
            Err(RetryError::Superseded { generation }) => {
                debug!("Call from generation {} superseded", generation);
                Err(ResilienceError::Superseded { generation })
            }
            Err(RetryError::NothingToRetry) => {
                self.publish(|s| {
                    s.is_loading = false;
                    s.is_retrying = false;
                });
                Err(ResilienceError::NothingToRetry)
            }
            Err(RetryError::Exhausted(err)) => {
                let published = ResilienceError::Request(err.clone());
                self.publish(|s| {
                    s.error = Some(published);
                    s.is_loading = false;
                    s.is_retrying = false;
                    s.retry_count = stats.retries();
                });

                if !self.monitor.is_online() {
                    self.handle_offline();
                } else if self.config.update_global_error {
                    if let Some(channel) = &self.error_channel {
                        let record = channel.set(&err);
                        if !channel.notifies() {
                            if let Some(notifier) = &self.notifier {
                                notifier.error(record.message);
                            }
                        }
                    }
                } else if let Some(notifier) = &self.notifier {
                    let message = messages
                        .error
                        .clone()
                        .unwrap_or_else(|| err.classification().message);
                    notifier.error(message);
                }

                Err(ResilienceError::Request(err))
            }
        }
    }
}
