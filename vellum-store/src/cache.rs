//! In-memory document cache.
//!
//! One entry per logical key, shared by every consumer bound to that key
//! within the process. Accessors are synchronous and non-suspending; the map
//! lives behind a std `RwLock` and lock scopes never cross an await.
//!
//! Beside the visible value, each entry tracks the most recent value known to
//! have reached the durable store, so a failed coalesced write can roll the
//! entry back instead of silently diverging from the backing artifact.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

/// Lifecycle state of a cached document.
///
/// Absence of an entry is the uninitialized state. `Removed` is terminal
/// until a later mutation recreates the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// A read is in flight; no value is available yet.
    Loading,
    /// The value reflects the last accepted write or the last durable read.
    Ready,
    /// The key was explicitly removed.
    Removed,
}

/// One cached document.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Option<Value>,
    pub state: EntryState,
    /// Most recent value known to have reached the durable store.
    pub last_confirmed: Option<Value>,
    /// When this entry last changed.
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(value: Option<Value>, state: EntryState, last_confirmed: Option<Value>) -> Self {
        Self {
            value,
            state,
            last_confirmed,
            stored_at: Utc::now(),
        }
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from a ready entry.
    pub hits: u64,
    /// Lookups that found no usable entry.
    pub misses: u64,
    /// Entries currently held.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Per-store key→entry map with change notification.
#[derive(Debug, Default)]
pub struct DocumentCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    watchers: Mutex<HashMap<String, watch::Sender<Option<Value>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DocumentCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry, recording a hit or miss.
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.peek(key);
        match &entry {
            Some(e) if e.state == EntryState::Ready => {
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        entry
    }

    /// Look up an entry without touching the statistics.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().unwrap().get(key).cloned()
    }

    /// Current state of a key's entry, if one exists.
    pub fn state(&self, key: &str) -> Option<EntryState> {
        self.entries.read().unwrap().get(key).map(|e| e.state)
    }

    /// Mark a key as loading. Called before the first durable read.
    pub fn mark_loading(&self, key: &str) {
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), CacheEntry::new(None, EntryState::Loading, None));
    }

    /// Store a ready value for a key.
    ///
    /// `confirmed` records whether the value is known durable (a completed
    /// read) or optimistic (a write not yet committed). An optimistic store
    /// preserves the previous confirmed value for rollback.
    pub fn store_ready(&self, key: &str, value: Value, confirmed: bool) {
        {
            let mut entries = self.entries.write().unwrap();
            let last_confirmed = if confirmed {
                Some(value.clone())
            } else {
                entries
                    .get(key)
                    .and_then(|e| e.last_confirmed.clone())
            };
            entries.insert(
                key.to_string(),
                CacheEntry::new(Some(value.clone()), EntryState::Ready, last_confirmed),
            );
        }
        debug!(key, confirmed, "cache entry ready");
        self.notify(key, Some(value));
    }

    /// Record that `value` has reached the durable store.
    pub fn confirm(&self, key: &str, value: &Value) {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            entry.last_confirmed = Some(value.clone());
        }
    }

    /// Roll a key back to its last confirmed value after a failed write.
    ///
    /// With no confirmed baseline the entry is dropped entirely, returning
    /// the key to the uninitialized state. Returns the restored value.
    pub fn rollback(&self, key: &str) -> Option<Value> {
        let restored = {
            let mut entries = self.entries.write().unwrap();
            match entries.get(key).and_then(|e| e.last_confirmed.clone()) {
                Some(confirmed) => {
                    entries.insert(
                        key.to_string(),
                        CacheEntry::new(
                            Some(confirmed.clone()),
                            EntryState::Ready,
                            Some(confirmed.clone()),
                        ),
                    );
                    Some(confirmed)
                }
                None => {
                    entries.remove(key);
                    None
                }
            }
        };
        debug!(key, restored = restored.is_some(), "cache entry rolled back");
        self.notify(key, restored.clone());
        restored
    }

    /// Mark a key as removed.
    pub fn mark_removed(&self, key: &str) {
        self.entries.write().unwrap().insert(
            key.to_string(),
            CacheEntry::new(None, EntryState::Removed, None),
        );
        debug!(key, "cache entry removed");
        self.notify(key, None);
    }

    /// Drop a key's entry if it is still loading.
    ///
    /// Called when a read fails so the cache returns to its prior state
    /// rather than being marked ready on failure.
    pub fn clear_loading(&self, key: &str) {
        let mut entries = self.entries.write().unwrap();
        if entries.get(key).map(|e| e.state) == Some(EntryState::Loading) {
            entries.remove(key);
        }
    }

    /// Drop every entry and notify all subscribers.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
        let watchers = self.watchers.lock().unwrap();
        for sender in watchers.values() {
            sender.send_replace(None);
        }
    }

    /// Observe every visible change to a key.
    ///
    /// The receiver starts at the key's current value and sees optimistic
    /// updates, rollbacks, and removals as they happen.
    pub fn subscribe(&self, key: &str) -> watch::Receiver<Option<Value>> {
        let current = self.peek(key).and_then(|e| e.value);
        let mut watchers = self.watchers.lock().unwrap();
        watchers
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(current).0)
            .subscribe()
    }

    /// Current usage statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.read().unwrap().len() as u64,
        }
    }

    fn notify(&self, key: &str, value: Option<Value>) {
        if let Some(sender) = self.watchers.lock().unwrap().get(key) {
            sender.send_replace(value);
        }
    }
}
