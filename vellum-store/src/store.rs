//! Persisted-value binder: the engine's public entry point.
//!
//! Consumers bind to a key to read it, mutate it through `set`/`update`, and
//! observe it through `subscribe`. Reads are served from the cache when warm;
//! mutations update the cache immediately and reach the durable store through
//! the coalescer, the per-key serializer, and the retry policy. Durability
//! lags visibility by at most the coalescing window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};
use vellum_core::{StoreConfig, StoreError, VellumResult};

use crate::cache::{CacheStats, DocumentCache, EntryState};
use crate::channel::{StorageChannel, WriteOptions};
use crate::coalesce::{WriteCoalescer, WriteDispatcher};
use crate::queue::KeyedQueue;
use crate::retry::with_retry;

/// A document store bound to one namespace on the host.
///
/// Construct one per namespace at startup with an injected channel; there is
/// no ambient global state. All shared bookkeeping lives behind this value,
/// so consumers share it via `Arc`.
pub struct DocumentStore<C: StorageChannel + 'static> {
    inner: Arc<StoreInner<C>>,
    coalescer: WriteCoalescer<StoreInner<C>>,
}

struct StoreInner<C> {
    channel: C,
    config: StoreConfig,
    cache: DocumentCache,
    queue: KeyedQueue,
    root_ready: AtomicBool,
}

impl<C: StorageChannel + 'static> StoreInner<C> {
    /// Create the namespace root lazily, before the first durable write.
    /// Read-only consumers never create directories.
    async fn ensure_root(&self) -> VellumResult<()> {
        if self.root_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let root = &self.config.root;
        with_retry("mkdir", &self.config.retry, || async {
            self.channel
                .mkdir(root, true)
                .await
                .map_err(|f| StoreError::from_channel(f, root))
        })
        .await?;
        self.root_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Write `value` durably for `key`: serializer-ordered, retry-wrapped,
    /// full-file overwrite.
    async fn commit(&self, key: &str, value: &Value) -> VellumResult<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.ensure_root().await?;

        let path = self.config.artifact_path(key);
        let opts = if self.config.backup_on_write {
            WriteOptions::with_backup()
        } else {
            WriteOptions::default()
        };
        self.queue
            .enqueue(
                key,
                with_retry("write", &self.config.retry, || async {
                    self.channel
                        .write(&path, &bytes, opts)
                        .await
                        .map_err(|f| StoreError::from_channel(f, &path))
                }),
            )
            .await
    }
}

#[async_trait]
impl<C: StorageChannel + 'static> WriteDispatcher for StoreInner<C> {
    async fn dispatch(&self, key: &str, value: Value) -> VellumResult<()> {
        match self.commit(key, &value).await {
            Ok(()) => {
                debug!(key, "write committed");
                self.cache.confirm(key, &value);
                Ok(())
            }
            Err(err) => {
                // Only roll back while the failed value is still the visible
                // one; a superseding mutation owns visibility otherwise.
                let visible = self.cache.peek(key).and_then(|e| e.value);
                if visible.as_ref() == Some(&value) {
                    warn!(key, kind = ?err.kind(), "write failed after retries, rolling cache back");
                    self.cache.rollback(key);
                } else {
                    warn!(key, kind = ?err.kind(), "write failed after retries, newer value already visible");
                }
                Err(err)
            }
        }
    }
}

impl<C: StorageChannel + 'static> DocumentStore<C> {
    /// Create a store over the given channel and configuration.
    pub fn new(channel: C, config: StoreConfig) -> Self {
        let inner = Arc::new(StoreInner {
            channel,
            config,
            cache: DocumentCache::new(),
            queue: KeyedQueue::new(),
            root_ready: AtomicBool::new(false),
        });
        let coalescer = WriteCoalescer::new(Arc::clone(&inner));
        Self { inner, coalescer }
    }

    /// Get the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Get a reference to the underlying channel.
    pub fn channel(&self) -> &C {
        &self.inner.channel
    }

    /// Bind to a key, reading it through the cache.
    ///
    /// A warm cache serves the value without touching the channel. Otherwise
    /// the key transitions to loading and a serializer-ordered, retry-wrapped
    /// read runs; a missing artifact resolves to `default` without being
    /// treated as an error. A removed key binds back to the default without a
    /// channel read until a later mutation recreates it.
    pub async fn bind<T>(&self, key: &str, default: T) -> VellumResult<T>
    where
        T: Serialize + DeserializeOwned,
    {
        validate_key(key)?;
        match self.inner.cache.lookup(key) {
            Some(entry) if entry.state == EntryState::Ready => {
                debug!(key, "bind served from cache");
                match entry.value {
                    Some(value) => deserialize(key, value),
                    None => Ok(default),
                }
            }
            Some(entry) if entry.state == EntryState::Removed => Ok(default),
            None => {
                self.inner.cache.mark_loading(key);
                self.load(key, default).await
            }
            // A read for this key is already in flight; queue behind it.
            Some(_) => self.load(key, default).await,
        }
    }

    async fn load<T>(&self, key: &str, default: T) -> VellumResult<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let inner = &self.inner;
        let path = inner.config.artifact_path(key);
        let loaded: VellumResult<Option<Value>> = inner
            .queue
            .enqueue(key, async {
                // A queued concurrent bind may have completed the read first.
                if let Some(entry) = inner.cache.peek(key) {
                    if entry.state == EntryState::Ready {
                        return Ok(entry.value);
                    }
                }
                let read = with_retry("read", &inner.config.retry, || async {
                    inner
                        .channel
                        .read(&path)
                        .await
                        .map_err(|f| StoreError::from_channel(f, &path))
                })
                .await;
                match read {
                    Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                        Ok(value) => {
                            inner.cache.store_ready(key, value.clone(), true);
                            Ok(Some(value))
                        }
                        Err(e) => {
                            inner.cache.clear_loading(key);
                            Err(StoreError::Serialization {
                                key: key.to_string(),
                                reason: e.to_string(),
                            })
                        }
                    },
                    Err(err) if err.is_not_found() => Ok(None),
                    Err(err) => {
                        // Leave the cache in its prior state, never ready.
                        inner.cache.clear_loading(key);
                        Err(err)
                    }
                }
            })
            .await;

        match loaded? {
            Some(value) => deserialize(key, value),
            None => {
                // Absence resolves to the default; nothing durable exists
                // yet, so there is no confirmed baseline.
                debug!(key, "no durable artifact, binding default");
                let value = serde_json::to_value(&default).map_err(|e| {
                    StoreError::Serialization {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                self.inner.cache.store_ready(key, value, false);
                Ok(default)
            }
        }
    }

    /// Replace a key's value.
    ///
    /// The cache updates immediately; the durable write is coalesced behind
    /// the configured window. Must be called within a tokio runtime.
    pub fn set<T>(&self, key: &str, value: &T) -> VellumResult<()>
    where
        T: Serialize + ?Sized,
    {
        validate_key(key)?;
        let value = serde_json::to_value(value).map_err(|e| StoreError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.inner.cache.store_ready(key, value.clone(), false);
        self.coalescer
            .schedule(key, value, self.inner.config.coalesce.window);
        Ok(())
    }

    /// Mutate a key's value as a function of the cached previous value.
    ///
    /// Callers that need to fold over durable state should `bind` first so
    /// the cache is warm. Returns the new value.
    pub fn update<T, F>(&self, key: &str, f: F) -> VellumResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> T,
    {
        validate_key(key)?;
        let previous = match self.inner.cache.peek(key) {
            Some(entry) if entry.state == EntryState::Ready => match entry.value {
                Some(value) => Some(deserialize(key, value)?),
                None => None,
            },
            _ => None,
        };
        let next = f(previous);
        self.set(key, &next)?;
        Ok(next)
    }

    /// Remove a key: cancel any pending write, delete the durable artifact,
    /// mark the entry removed.
    ///
    /// An already-absent artifact counts as success.
    pub async fn remove(&self, key: &str) -> VellumResult<()> {
        validate_key(key)?;
        self.coalescer.cancel(key);
        let inner = &self.inner;
        let path = inner.config.artifact_path(key);
        let deleted = inner
            .queue
            .enqueue(
                key,
                with_retry("delete", &inner.config.retry, || async {
                    inner
                        .channel
                        .delete(&path)
                        .await
                        .map_err(|f| StoreError::from_channel(f, &path))
                }),
            )
            .await;
        match deleted {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        inner.cache.mark_removed(key);
        Ok(())
    }

    /// Delete the entire backing namespace, cancel every pending write, and
    /// clear the cache.
    pub async fn clear_all(&self) -> VellumResult<()> {
        self.coalescer.cancel_all();
        let inner = &self.inner;
        let root = &inner.config.root;
        let cleared = with_retry("clear", &inner.config.retry, || async {
            inner
                .channel
                .delete_dir(root)
                .await
                .map_err(|f| StoreError::from_channel(f, root))
        })
        .await;
        match cleared {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        inner.root_ready.store(false, Ordering::Release);
        inner.cache.clear();
        Ok(())
    }

    /// Observe every visible change to a key, optimistic updates included.
    pub fn subscribe(&self, key: &str) -> watch::Receiver<Option<Value>> {
        self.inner.cache.subscribe(key)
    }

    /// Commit any pending coalesced write for `key` now.
    pub async fn flush(&self, key: &str) -> VellumResult<()> {
        self.coalescer.flush_now(key).await
    }

    /// Commit every pending coalesced write now. Call before teardown.
    pub async fn flush_all(&self) -> VellumResult<()> {
        self.coalescer.flush_all().await
    }

    /// Keys with writes currently waiting out their coalescing window.
    pub fn pending_writes(&self) -> Vec<String> {
        self.coalescer.pending_keys()
    }

    /// Cache usage statistics.
    pub fn stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }
}

fn deserialize<T: DeserializeOwned>(key: &str, value: Value) -> VellumResult<T> {
    serde_json::from_value(value).map_err(|e| StoreError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Reject keys that could escape the store's namespace.
fn validate_key(key: &str) -> VellumResult<()> {
    let reason = if key.is_empty() {
        Some("key is empty")
    } else if key.contains('/') || key.contains('\\') {
        Some("key contains a path separator")
    } else if key.contains("..") {
        Some("key contains a parent traversal")
    } else if key.contains('\0') {
        Some("key contains a NUL byte")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(StoreError::InvalidPath {
            path: key.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
