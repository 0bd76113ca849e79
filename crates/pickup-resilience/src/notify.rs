//! Presentation-agnostic notification dispatch.
//!
//! [`Notifier`] formats and deduplicates notifications and hands them to a
//! [`NotificationSurface`], which owns the actual rendering. The surface decides
//! what a handle means; the notifier only keeps enough bookkeeping to merge
//! updates and suppress duplicates.

use crate::classifier::UserMessage;
use crate::config::NotificationDefaults;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Kind of notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationVariant {
    Success,
    Error,
    Warning,
    Info,
}

impl NotificationVariant {
    /// Presentation defaults for this variant.
    pub fn default_options(self) -> NotificationOptions {
        let auto_close = match self {
            NotificationVariant::Success => NotificationDefaults::SUCCESS_DURATION,
            NotificationVariant::Info => NotificationDefaults::INFO_DURATION,
            NotificationVariant::Warning => NotificationDefaults::WARNING_DURATION,
            NotificationVariant::Error => NotificationDefaults::ERROR_DURATION,
        };
        NotificationOptions {
            auto_close: Some(auto_close),
            dismissible: true,
        }
    }
}

impl std::fmt::Display for NotificationVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationVariant::Success => write!(f, "success"),
            NotificationVariant::Error => write!(f, "error"),
            NotificationVariant::Warning => write!(f, "warning"),
            NotificationVariant::Info => write!(f, "info"),
        }
    }
}

/// Presentation options passed through to the surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    /// How long the notification stays visible; `None` keeps it until dismissed.
    pub auto_close: Option<Duration>,
    /// Whether the user can close it.
    pub dismissible: bool,
}

impl NotificationOptions {
    /// Options for a notification that stays until dismissed or updated.
    pub fn persistent() -> Self {
        Self {
            auto_close: None,
            dismissible: false,
        }
    }

    pub fn with_auto_close(mut self, duration: Duration) -> Self {
        self.auto_close = Some(duration);
        self
    }
}

/// A single notification as handed to the surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub variant: NotificationVariant,
    pub message: String,
    pub options: NotificationOptions,
}

/// Opaque reference to a notification shown by a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotificationHandle(pub u64);

/// Partial change applied by [`Notifier::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationUpdate {
    pub variant: Option<NotificationVariant>,
    pub message: Option<String>,
    pub options: Option<NotificationOptions>,
}

/// Messages bound to an operation by [`Notifier::track`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMessages {
    pub pending: String,
    pub success: String,
    /// Error text; `None` uses the failure's own user message.
    pub error: Option<String>,
}

/// Rendering surface for notifications.
pub trait NotificationSurface: Send + Sync {
    /// Show a notification and return its handle.
    fn show(&self, request: &NotificationRequest) -> NotificationHandle;

    /// Replace the content of a shown notification.
    fn update(&self, handle: NotificationHandle, request: &NotificationRequest);

    fn dismiss(&self, handle: NotificationHandle);

    /// Dismiss everything visible, and optionally anything queued for display.
    fn dismiss_all(&self, clear_queued: bool);

    /// Whether the notification is still visible (or queued).
    fn is_active(&self, handle: NotificationHandle) -> bool;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Notification dispatcher.
///
/// Cheap to clone; clones share the surface and the dedup bookkeeping.
#[derive(Clone)]
pub struct Notifier {
    surface: Arc<dyn NotificationSurface>,
    shown: Arc<Mutex<HashMap<NotificationHandle, NotificationRequest>>>,
}

impl Notifier {
    pub fn new(surface: Arc<dyn NotificationSurface>) -> Self {
        Self {
            surface,
            shown: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Emit a notification.
    ///
    /// If a notification with the same variant and message is still active,
    /// its handle is returned and nothing new is shown.
    pub fn emit(
        &self,
        variant: NotificationVariant,
        message: impl Into<String>,
        options: Option<NotificationOptions>,
    ) -> NotificationHandle {
        let request = NotificationRequest {
            variant,
            message: message.into(),
            options: options.unwrap_or_else(|| variant.default_options()),
        };

        let mut shown = lock(&self.shown);
        shown.retain(|handle, _| self.surface.is_active(*handle));

        if let Some((handle, _)) = shown
            .iter()
            .find(|(_, r)| r.variant == request.variant && r.message == request.message)
        {
            debug!("Suppressing duplicate {} notification: {}", variant, request.message);
            return *handle;
        }

        let handle = self.surface.show(&request);
        debug!("Showing {} notification {:?}: {}", variant, handle, request.message);
        shown.insert(handle, request);
        handle
    }

    pub fn success(&self, message: impl Into<String>) -> NotificationHandle {
        self.emit(NotificationVariant::Success, message, None)
    }

    pub fn error(&self, message: impl Into<String>) -> NotificationHandle {
        self.emit(NotificationVariant::Error, message, None)
    }

    pub fn warning(&self, message: impl Into<String>) -> NotificationHandle {
        self.emit(NotificationVariant::Warning, message, None)
    }

    pub fn info(&self, message: impl Into<String>) -> NotificationHandle {
        self.emit(NotificationVariant::Info, message, None)
    }

    /// Whether the surface still shows the notification.
    pub fn is_active(&self, handle: NotificationHandle) -> bool {
        self.surface.is_active(handle)
    }

    /// Apply a partial update. No-op unless the handle is still active.
    ///
    /// Returns whether the update was applied.
    pub fn update(&self, handle: NotificationHandle, update: NotificationUpdate) -> bool {
        if !self.surface.is_active(handle) {
            debug!("Ignoring update for inactive notification {:?}", handle);
            lock(&self.shown).remove(&handle);
            return false;
        }

        let mut shown = lock(&self.shown);
        let Some(current) = shown.get_mut(&handle) else {
            return false;
        };

        if let Some(variant) = update.variant {
            current.variant = variant;
            if update.options.is_none() {
                current.options = variant.default_options();
            }
        }
        if let Some(message) = update.message {
            current.message = message;
        }
        if let Some(options) = update.options {
            current.options = options;
        }

        self.surface.update(handle, current);
        true
    }

    pub fn dismiss(&self, handle: NotificationHandle) {
        lock(&self.shown).remove(&handle);
        self.surface.dismiss(handle);
    }

    pub fn dismiss_all(&self, clear_queued: bool) {
        lock(&self.shown).clear();
        self.surface.dismiss_all(clear_queued);
    }

    /// Bind one notification to the lifecycle of `operation`.
    ///
    /// Shows `pending` until the operation settles, then turns the same
    /// notification into a success or an error. The operation's result is
    /// returned unchanged.
    pub async fn track<T, E, Fut>(
        &self,
        operation: Fut,
        messages: TrackMessages,
    ) -> std::result::Result<T, E>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
        E: UserMessage,
    {
        let handle = self.emit(
            NotificationVariant::Info,
            messages.pending,
            Some(NotificationOptions::persistent()),
        );

        let result = operation.await;

        let (variant, message) = match &result {
            Ok(_) => (NotificationVariant::Success, messages.success),
            Err(err) => (
                NotificationVariant::Error,
                messages
                    .error
                    .unwrap_or_else(|| err.classification().message),
            ),
        };

        let applied = self.update(
            handle,
            NotificationUpdate {
                variant: Some(variant),
                message: Some(message.clone()),
                options: None,
            },
        );
        if !applied {
            // The pending notification was closed early; show the outcome fresh.
            self.emit(variant, message, None);
        }

        result
    }
}

/// Event recorded by [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    Shown(NotificationHandle, NotificationRequest),
    Updated(NotificationHandle, NotificationRequest),
    Dismissed(NotificationHandle),
    DismissedAll { clear_queued: bool },
}

#[derive(Default)]
struct RecordingState {
    next_handle: u64,
    active: HashMap<NotificationHandle, NotificationRequest>,
    events: Vec<SurfaceEvent>,
}

/// In-memory surface that records everything it is asked to render.
///
/// Useful for headless embedders and tests. Notifications stay active until
/// dismissed or expired with [`RecordingSurface::expire`].
#[derive(Default)]
pub struct RecordingSurface {
    state: Mutex<RecordingState>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event so far, in order.
    pub fn events(&self) -> Vec<SurfaceEvent> {
        lock(&self.state).events.clone()
    }

    /// Requests passed to `show`, in order.
    pub fn shown(&self) -> Vec<NotificationRequest> {
        lock(&self.state)
            .events
            .iter()
            .filter_map(|e| match e {
                SurfaceEvent::Shown(_, request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of notifications of `variant` shown so far.
    pub fn shown_count(&self, variant: NotificationVariant) -> usize {
        self.shown().iter().filter(|r| r.variant == variant).count()
    }

    /// Current content of an active notification.
    pub fn current(&self, handle: NotificationHandle) -> Option<NotificationRequest> {
        lock(&self.state).active.get(&handle).cloned()
    }

    /// Simulate a notification closing on its own.
    pub fn expire(&self, handle: NotificationHandle) {
        lock(&self.state).active.remove(&handle);
    }
}

impl NotificationSurface for RecordingSurface {
    fn show(&self, request: &NotificationRequest) -> NotificationHandle {
        let mut state = lock(&self.state);
        state.next_handle += 1;
        let handle = NotificationHandle(state.next_handle);
        state.active.insert(handle, request.clone());
        state.events.push(SurfaceEvent::Shown(handle, request.clone()));
        handle
    }

    fn update(&self, handle: NotificationHandle, request: &NotificationRequest) {
        let mut state = lock(&self.state);
        if let Some(current) = state.active.get_mut(&handle) {
            *current = request.clone();
            state.events.push(SurfaceEvent::Updated(handle, request.clone()));
        }
    }

    fn dismiss(&self, handle: NotificationHandle) {
        let mut state = lock(&self.state);
        state.active.remove(&handle);
        state.events.push(SurfaceEvent::Dismissed(handle));
    }

    fn dismiss_all(&self, clear_queued: bool) {
        let mut state = lock(&self.state);
        state.active.clear();
        state.events.push(SurfaceEvent::DismissedAll { clear_queued });
    }

    fn is_active(&self, handle: NotificationHandle) -> bool {
        lock(&self.state).active.contains_key(&handle)
    }
}
