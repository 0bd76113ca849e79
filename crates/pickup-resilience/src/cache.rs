//! Session-scoped response cache with per-entry expiry.
//!
//! Entries are JSON documents stored in a [`SessionStore`]. Each carries the
//! time it was written (for freshness) and the start time of the call that
//! produced it (for ordering), so a slow call never overwrites data from a
//! call that started after it.

use crate::clock::{Clock, SystemClock};
use crate::config::CacheDefaults;
use chrono::{DateTime, TimeDelta, Utc};
use mini_moka::sync::Cache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Session-lifetime key/value storage for JSON strings.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
    /// Drop everything; called when the session ends.
    fn clear(&self);
}

/// In-memory session store bounded in size and lifetime.
pub struct MemorySessionStore {
    entries: Cache<String, String>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::with_limits(
            CacheDefaults::SESSION_LIFETIME,
            CacheDefaults::SESSION_MAX_ENTRIES,
        )
    }

    pub fn with_limits(lifetime: Duration, max_entries: u64) -> Self {
        Self {
            entries: Cache::builder()
                .time_to_live(lifetime)
                .max_capacity(max_entries)
                .build(),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(&key.to_string())
    }

    fn set(&self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.invalidate(&key.to_string());
    }

    fn clear(&self) {
        self.entries.invalidate_all();
    }
}

/// A cached response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub data: Value,
    /// When the entry was written.
    pub written_at: DateTime<Utc>,
    /// When the call that produced `data` started.
    pub issued_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    /// Fresh iff `now - written_at < ttl`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(self.written_at) < ttl
    }

    /// Time elapsed since the entry was written.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.written_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// TTL-bounded JSON cache over a session store.
///
/// Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct SessionCache {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    prefix: String,
}

impl SessionCache {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            prefix: CacheDefaults::KEY_PREFIX.to_string(),
        }
    }

    /// A cache over a fresh [`MemorySessionStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySessionStore::new()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Current time according to the cache's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Read an entry regardless of freshness. Unreadable entries are dropped.
    fn read(&self, key: &str) -> Option<CacheEntry> {
        let storage_key = self.storage_key(key);
        let raw = self.store.get(&storage_key)?;
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Dropping unreadable cache entry {}: {}", key, e);
                self.store.remove(&storage_key);
                None
            }
        }
    }

    /// The entry for `key`, if present and fresh. Stale entries are evicted.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.read(key)?;
        let now = self.clock.now();
        if entry.is_fresh(now) {
            debug!("Cache hit for {} (age {:?})", key, entry.age(now));
            Some(entry)
        } else {
            debug!("Cache entry for {} expired", key);
            self.store.remove(&self.storage_key(key));
            None
        }
    }

    /// Fresh cached data for `key`, decoded as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.get_entry(key)?;
        match serde_json::from_value(entry.data) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!("Cached data for {} has an unexpected shape: {}", key, e);
                None
            }
        }
    }

    /// Store `data` as produced by a call started now.
    pub fn set<T: Serialize>(&self, key: &str, data: &T, ttl: Duration) -> bool {
        let issued_at = self.clock.now();
        self.set_issued(key, data, ttl, issued_at)
    }

    /// Store `data` produced by a call that started at `issued_at`.
    ///
    /// Skipped (returning `false`) when the stored entry came from a call that
    /// started later.
    pub fn set_issued<T: Serialize>(
        &self,
        key: &str,
        data: &T,
        ttl: Duration,
        issued_at: DateTime<Utc>,
    ) -> bool {
        if let Some(existing) = self.read(key) {
            if existing.issued_at > issued_at {
                debug!(
                    "Keeping newer cache entry for {} (issued {} > {})",
                    key, existing.issued_at, issued_at
                );
                return false;
            }
        }

        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(e) => {
                warn!("Not caching {}: {}", key, e);
                return false;
            }
        };

        let entry = CacheEntry {
            key: key.to_string(),
            data,
            written_at: self.clock.now(),
            issued_at,
            ttl,
        };

        match serde_json::to_string(&entry) {
            Ok(raw) => {
                self.store.set(&self.storage_key(key), raw);
                debug!("Cached {} for {:?}", key, ttl);
                true
            }
            Err(e) => {
                warn!("Not caching {}: {}", key, e);
                false
            }
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.store.remove(&self.storage_key(key));
    }

    /// Drop everything in the underlying store.
    pub fn clear(&self) {
        self.store.clear();
    }
}
