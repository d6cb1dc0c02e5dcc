//! Vellum Store - Store-and-Sync Engine
//!
//! The durable persistence layer between in-memory document state and a
//! host-mediated storage channel. Reads go through an in-process cache;
//! mutations update the cache immediately and reach the durable store through
//! a debounced, per-key-ordered, retry-wrapped write path.
//!
//! # Architecture
//!
//! - [`StorageChannel`]: the injected boundary to the host's storage
//!   primitives; [`MemoryChannel`] is the in-memory test double.
//! - [`retry::with_retry`]: bounded linear backoff around any channel call.
//! - [`KeyedQueue`]: at most one in-flight operation per key, FIFO.
//! - [`WriteCoalescer`]: rapid mutations to a key collapse into one durable
//!   write carrying the last value.
//! - [`DocumentCache`]: last-known values with per-key state, confirmed
//!   baselines for rollback, and watch-based change notification.
//! - [`DocumentStore`]: the public binder composing all of the above.
//!
//! # Usage
//!
//! ```ignore
//! use vellum_core::StoreConfig;
//! use vellum_store::{DocumentStore, MemoryChannel};
//!
//! let store = DocumentStore::new(MemoryChannel::new(), StoreConfig::new("library"));
//!
//! let settings: Settings = store.bind("settings", Settings::default()).await?;
//! store.set("settings", &updated)?;          // visible immediately
//! store.flush_all().await?;                  // durable now
//! ```

pub mod cache;
pub mod channel;
pub mod coalesce;
pub mod queue;
pub mod retry;
pub mod store;

pub use cache::{CacheEntry, CacheStats, DocumentCache, EntryState};
pub use channel::{
    ChannelMethod, ChannelResult, MemoryChannel, StorageChannel, WriteOptions,
};
pub use coalesce::{WriteCoalescer, WriteDispatcher};
pub use queue::KeyedQueue;
pub use retry::with_retry;
pub use store::DocumentStore;
