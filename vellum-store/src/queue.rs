//! Per-key operation serializer.
//!
//! Guarantees at most one in-flight mutating channel call per logical key at
//! any instant. Operations on the same key settle in enqueue order; distinct
//! keys never wait on each other. A prior operation's outcome is used only
//! for sequencing and never propagated to the next caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Per-key FIFO serializer for async operations.
///
/// Each key maps to a fair async mutex; enqueueing acquires the key's mutex,
/// runs the operation, and releases. Fair acquisition gives a total order per
/// key. The map lock guards only bookkeeping and is never held across an
/// await. Once an operation settles and no newer operation holds the key's
/// entry, the entry is evicted so idle keys cost nothing.
#[derive(Debug, Default)]
pub struct KeyedQueue {
    tails: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedQueue {
    /// Create a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `op` after every previously enqueued operation for `key` has
    /// settled, returning its result to the caller.
    pub async fn enqueue<T, Fut>(&self, key: &str, op: Fut) -> T
    where
        Fut: std::future::Future<Output = T>,
    {
        let tail = {
            let mut tails = self.tails.lock().unwrap();
            Arc::clone(tails.entry(key.to_string()).or_default())
        };

        let result = {
            let _guard = tail.lock().await;
            op.await
        };

        // Evict the key's entry unless a newer operation already holds it.
        // Cloning only happens under the map lock, so the count is stable here.
        let mut tails = self.tails.lock().unwrap();
        if let Some(current) = tails.get(key) {
            if Arc::ptr_eq(current, &tail) && Arc::strong_count(&tail) == 2 {
                tails.remove(key);
            }
        }

        result
    }

    /// Number of keys with live queue entries.
    pub fn queued_keys(&self) -> usize {
        self.tails.lock().unwrap().len()
    }
}
