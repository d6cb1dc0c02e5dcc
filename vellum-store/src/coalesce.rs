//! Write coalescing: per-key cancellable delayed commits.
//!
//! Rapid successive mutations to the same key collapse into a single durable
//! write carrying only the most recent value. A pending write is fully
//! superseded, never merged, by a later mutation. Dispatch goes through the
//! injected [`WriteDispatcher`] seam so the coalescer tests against a
//! recording fake.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;
use vellum_core::VellumResult;

/// Commits a coalesced value to durable storage.
///
/// Implemented by the store's internals (serializer + retry + channel); the
/// coalescer itself knows nothing about how a write reaches the host.
#[async_trait]
pub trait WriteDispatcher: Send + Sync + 'static {
    async fn dispatch(&self, key: &str, value: Value) -> VellumResult<()>;
}

#[derive(Debug)]
struct PendingWrite {
    value: Value,
    generation: u64,
    handle: JoinHandle<()>,
}

/// Per-key debounced write scheduler.
///
/// At most one pending write per key. Arming a new timer first cancels any
/// existing one; the timer task claims its payload back out of the map only
/// if it is still the current generation for its key, so a superseded task
/// that already woke up commits nothing.
pub struct WriteCoalescer<D: WriteDispatcher> {
    dispatcher: Arc<D>,
    pending: Arc<Mutex<HashMap<String, PendingWrite>>>,
    generation: AtomicU64,
}

impl<D: WriteDispatcher> WriteCoalescer<D> {
    /// Create a new coalescer over the given dispatcher.
    pub fn new(dispatcher: Arc<D>) -> Self {
        Self {
            dispatcher,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Schedule `value` to be committed for `key` after `window`.
    ///
    /// Cancels and replaces any write already pending for the key. The timer
    /// is armed synchronously; only the eventual commit suspends.
    pub fn schedule(&self, key: &str, value: Value, window: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let dispatcher = Arc::clone(&self.dispatcher);
        let pending = Arc::clone(&self.pending);
        let task_key = key.to_string();

        // Holding the map lock across spawn keeps the new entry visible
        // before the timer task can possibly claim it.
        let mut map = self.pending.lock().unwrap();
        if let Some(previous) = map.remove(key) {
            previous.handle.abort();
            debug!(key, "pending write superseded");
        }
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let claimed = {
                let mut map = pending.lock().unwrap();
                let current = map.get(&task_key).map(|entry| entry.generation);
                if current == Some(generation) {
                    map.remove(&task_key)
                } else {
                    None
                }
            };
            if let Some(entry) = claimed {
                debug!(key = %task_key, "coalescing window elapsed, committing");
                if let Err(err) = dispatcher.dispatch(&task_key, entry.value).await {
                    // The scheduling caller is long gone; the dispatcher has
                    // already handled rollback and logging.
                    debug!(key = %task_key, kind = ?err.kind(), "coalesced commit failed");
                }
            }
        });
        map.insert(
            key.to_string(),
            PendingWrite {
                value,
                generation,
                handle,
            },
        );
    }

    /// Commit any pending write for `key` immediately, bypassing its window.
    ///
    /// Used for data that must not be lost to a late flush. No-op if nothing
    /// is pending for the key.
    pub async fn flush_now(&self, key: &str) -> VellumResult<()> {
        let claimed = self.pending.lock().unwrap().remove(key);
        match claimed {
            Some(entry) => {
                entry.handle.abort();
                debug!(key, "flushing pending write");
                self.dispatcher.dispatch(key, entry.value).await
            }
            None => Ok(()),
        }
    }

    /// Commit every pending write immediately.
    ///
    /// All keys are attempted even if one fails; the last error surfaces.
    pub async fn flush_all(&self) -> VellumResult<()> {
        let claimed: Vec<(String, PendingWrite)> =
            self.pending.lock().unwrap().drain().collect();
        let mut last_error = None;
        for (key, entry) in claimed {
            entry.handle.abort();
            if let Err(err) = self.dispatcher.dispatch(&key, entry.value).await {
                last_error = Some(err);
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drop any pending write for `key` without committing it.
    pub fn cancel(&self, key: &str) {
        if let Some(entry) = self.pending.lock().unwrap().remove(key) {
            entry.handle.abort();
            debug!(key, "pending write cancelled");
        }
    }

    /// Drop every pending write without committing.
    pub fn cancel_all(&self) {
        let mut map = self.pending.lock().unwrap();
        for (_, entry) in map.drain() {
            entry.handle.abort();
        }
    }

    /// Whether a write is currently pending for `key`.
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.lock().unwrap().contains_key(key)
    }

    /// Keys with currently pending writes.
    pub fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.pending.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}
