//! Network status monitoring.
//!
//! Provides:
//! - Online/offline tracking driven by a platform connectivity source
//! - Edge-triggered callbacks on connectivity transitions
//! - On-demand reachability checks against a probe endpoint

use crate::config::NetworkDefaults;
use crate::error::{ResilienceError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connectivity change reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

/// Platform-level connectivity signal (the browser's `online`/`offline` events).
pub trait ConnectivitySource: Send + Sync {
    /// The platform's current belief about connectivity.
    fn is_online(&self) -> bool;

    /// Subscribe to connectivity transitions.
    fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent>;
}

/// A connectivity source driven by the embedder.
pub struct ManualConnectivity {
    online: AtomicBool,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            online: AtomicBool::new(online),
            events,
        }
    }

    /// Report a connectivity change to subscribers.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        let event = if online {
            ConnectivityEvent::Online
        } else {
            ConnectivityEvent::Offline
        };
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl ConnectivitySource for ManualConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }
}

/// Lightweight check that the backend is reachable.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Probe that sends a HEAD request to a fixed URL.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(url, NetworkDefaults::PROBE_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(NetworkDefaults::USER_AGENT)
            .build()
            .map_err(|e| ResilienceError::Probe {
                message: format!("Failed to create probe client: {}", e),
            })?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(resp) => {
                let status = resp.status();
                // Redirects and 403s still prove the server answered.
                status.is_success() || status.is_redirection() || status.as_u16() == 403
            }
            Err(e) => {
                debug!("Probe request to {} failed: {}", self.url, e);
                false
            }
        }
    }
}

/// Probe with a fixed, settable answer.
pub struct StaticProbe {
    reachable: AtomicBool,
}

impl StaticProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilityProbe for StaticProbe {
    async fn probe(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Callback fired on a connectivity transition.
pub type TransitionCallback = Arc<dyn Fn() + Send + Sync + 'static>;

struct MonitorShared {
    online: watch::Sender<bool>,
    on_offline: Option<TransitionCallback>,
    on_online: Option<TransitionCallback>,
}

impl MonitorShared {
    /// Record the connectivity state; returns whether it changed.
    fn apply(&self, online: bool) -> bool {
        let previous = self.online.send_replace(online);
        if previous == online {
            return false;
        }

        if online {
            info!("Network connectivity restored");
            if let Some(callback) = &self.on_online {
                callback();
            }
        } else {
            warn!("Network connectivity lost");
            if let Some(callback) = &self.on_offline {
                callback();
            }
        }
        true
    }
}

/// Builder for [`NetworkMonitor`].
#[derive(Default)]
pub struct NetworkMonitorBuilder {
    on_offline: Option<TransitionCallback>,
    on_online: Option<TransitionCallback>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
}

impl NetworkMonitorBuilder {
    /// Fired once per online → offline transition.
    pub fn on_offline(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_offline = Some(Arc::new(callback));
        self
    }

    /// Fired once per offline → online transition.
    pub fn on_online(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_online = Some(Arc::new(callback));
        self
    }

    /// Probe used by [`NetworkMonitor::check_connection`].
    pub fn probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Start listening to `source`. Must be called inside a Tokio runtime.
    pub fn start(self, source: Arc<dyn ConnectivitySource>) -> NetworkMonitor {
        // Subscribe before reading so no transition slips between the two.
        let mut events = source.subscribe();
        let (online, _) = watch::channel(source.is_online());

        let shared = Arc::new(MonitorShared {
            online,
            on_offline: self.on_offline,
            on_online: self.on_online,
        });

        let listener_shared = Arc::clone(&shared);
        let listener_source = Arc::clone(&source);
        let listener = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        listener_shared.apply(event == ConnectivityEvent::Online);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Missed {} connectivity events; resyncing", skipped);
                        listener_shared.apply(listener_source.is_online());
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Connectivity listener stopped");
        });

        NetworkMonitor {
            shared,
            source,
            probe: self.probe,
            listener: Some(listener),
        }
    }
}

/// Tracks whether the application is online.
///
/// The listener task stops when the monitor is dropped.
pub struct NetworkMonitor {
    shared: Arc<MonitorShared>,
    source: Arc<dyn ConnectivitySource>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    listener: Option<JoinHandle<()>>,
}

impl NetworkMonitor {
    pub fn builder() -> NetworkMonitorBuilder {
        NetworkMonitorBuilder::default()
    }

    /// Start a monitor with no callbacks and no probe.
    pub fn start(source: Arc<dyn ConnectivitySource>) -> Self {
        Self::builder().start(source)
    }

    pub fn is_online(&self) -> bool {
        *self.shared.online.borrow()
    }

    /// Observe the online flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shared.online.subscribe()
    }

    /// Re-check connectivity now and update the state.
    ///
    /// Uses the configured probe, or the platform signal if there is none.
    pub async fn check_connection(&self) -> bool {
        let online = match &self.probe {
            Some(probe) => probe.probe().await,
            None => self.source.is_online(),
        };
        debug!("Connectivity check: {}", if online { "online" } else { "offline" });
        self.shared.apply(online);
        online
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.take() {
            handle.abort();
        }
    }
}
