//! Error types for Vellum store operations.
//!
//! The host channel surfaces failures as [`ChannelFailure`] values carrying a
//! machine-readable code. This module translates those into the closed
//! [`StoreError`] taxonomy so presentation code has a finite set of cases to
//! branch on and never sees a raw channel failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable failure codes the host channel is expected to supply.
pub mod code {
    pub const NOT_FOUND: &str = "not-found";
    pub const PERMISSION_DENIED: &str = "permission-denied";
    pub const INVALID_PATH: &str = "invalid-path";
    pub const NETWORK_ERROR: &str = "network-error";
    pub const TIMEOUT: &str = "timeout";
}

/// Closed enumeration of store failure kinds.
///
/// `NotFound`, `PermissionDenied`, and `InvalidPath` are permanent: retrying
/// them cannot change the outcome. The remaining kinds are transient and
/// eligible for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    InvalidPath,
    NetworkError,
    Timeout,
    Unknown,
}

impl ErrorKind {
    /// Whether this kind can change with time and is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError | ErrorKind::Timeout | ErrorKind::Unknown
        )
    }
}

/// A raw failure as surfaced by a channel call, before translation.
///
/// The `code` field is the machine-readable discriminator (see [`code`]);
/// `message` is free-form host diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFailure {
    pub code: String,
    pub message: String,
}

impl ChannelFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ChannelFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel failure ({}): {}", self.code, self.message)
    }
}

/// Typed error raised by the store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("No artifact at {path}")]
    NotFound { path: String },

    #[error("Permission denied for {path}")]
    PermissionDenied { path: String },

    #[error("Invalid storage path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Network failure reaching host storage: {message}")]
    Network { message: String },

    #[error("Host storage call timed out: {message}")]
    Timeout { message: String },

    #[error("Serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Unrecognized channel failure ({code}): {message}")]
    Unknown { code: String, message: String },
}

impl StoreError {
    /// Translate a raw channel failure into a typed error.
    ///
    /// The mapping is a fixed table on the channel's machine-readable code;
    /// anything unrecognized maps to [`StoreError::Unknown`]. Pure function,
    /// no side effects.
    pub fn from_channel(failure: ChannelFailure, path: &str) -> Self {
        match failure.code.as_str() {
            code::NOT_FOUND => StoreError::NotFound {
                path: path.to_string(),
            },
            code::PERMISSION_DENIED => StoreError::PermissionDenied {
                path: path.to_string(),
            },
            code::INVALID_PATH => StoreError::InvalidPath {
                path: path.to_string(),
                reason: failure.message,
            },
            code::NETWORK_ERROR => StoreError::Network {
                message: failure.message,
            },
            code::TIMEOUT => StoreError::Timeout {
                message: failure.message,
            },
            _ => StoreError::Unknown {
                code: failure.code,
                message: failure.message,
            },
        }
    }

    /// Project this error onto the closed kind enumeration.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            StoreError::InvalidPath { .. } => ErrorKind::InvalidPath,
            StoreError::Network { .. } => ErrorKind::NetworkError,
            StoreError::Timeout { .. } => ErrorKind::Timeout,
            // Re-sending identical bytes cannot succeed, and serde failures
            // never reach the retry path anyway.
            StoreError::Serialization { .. } => ErrorKind::Unknown,
            StoreError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Whether the not-found case applies, which the binder treats as a
    /// default-value resolution rather than an error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Result type alias for Vellum operations.
pub type VellumResult<T> = Result<T, StoreError>;

// =============================================================================
// TESTS
// =============================================================================
