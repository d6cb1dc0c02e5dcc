//! Vellum Core - Error Taxonomy and Configuration
//!
//! Shared vocabulary for the Vellum persistence engine. This crate contains
//! only plain types - no I/O and no runtime dependency. The engine itself
//! lives in vellum-store.

pub mod config;
pub mod error;

pub use config::{CoalesceConfig, RetryConfig, StoreConfig};
pub use error::{code, ChannelFailure, ErrorKind, StoreError, VellumResult};

/// Opaque identifier of one logical persisted document.
///
/// Keys are independent; no key implies ownership of another. Validation
/// (non-empty, no path separators) happens at the store boundary.
pub type StorageKey = String;
