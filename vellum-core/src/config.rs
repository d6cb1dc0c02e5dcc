//! Configuration types for the persistence engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ErrorKind;

/// Retry policy for channel calls.
///
/// Backoff is linear (`base_delay * attempt_number`) rather than exponential;
/// with an attempt ceiling this low the extra machinery buys nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; grows linearly per attempt.
    pub base_delay: Duration,
    /// Kinds that fail fast without consuming attempts.
    pub non_retryable: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            non_retryable: vec![
                ErrorKind::NotFound,
                ErrorKind::PermissionDenied,
                ErrorKind::InvalidPath,
            ],
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total attempt ceiling.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base delay between attempts.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Replace the non-retryable kind set.
    pub fn with_non_retryable(mut self, kinds: Vec<ErrorKind>) -> Self {
        self.non_retryable = kinds;
        self
    }

    /// Whether a failure of this kind should be retried.
    pub fn should_retry(&self, kind: ErrorKind) -> bool {
        !self.non_retryable.contains(&kind)
    }
}

/// Write-coalescing policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoalesceConfig {
    /// Debounce window: how long a scheduled write waits for a superseding
    /// mutation before it is committed.
    pub window: Duration,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(500),
        }
    }
}

impl CoalesceConfig {
    /// Create a new coalesce config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debounce window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Configuration for a document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory of this store's namespace on the host.
    pub root: String,
    /// File extension for serialized artifacts.
    pub extension: String,
    /// Ask the channel to write a sibling backup file before overwriting.
    pub backup_on_write: bool,
    /// Retry policy applied to every channel call.
    pub retry: RetryConfig,
    /// Coalescing policy applied to mutations.
    pub coalesce: CoalesceConfig,
}

impl StoreConfig {
    /// Create a store config rooted at the given namespace directory.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: "json".to_string(),
            backup_on_write: false,
            retry: RetryConfig::default(),
            coalesce: CoalesceConfig::default(),
        }
    }

    /// Set the artifact file extension.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Enable or disable backup-before-overwrite.
    pub fn with_backup_on_write(mut self, enabled: bool) -> Self {
        self.backup_on_write = enabled;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the coalescing policy.
    pub fn with_coalesce(mut self, coalesce: CoalesceConfig) -> Self {
        self.coalesce = coalesce;
        self
    }

    /// Durable artifact path for a logical key: `<root>/<key>.<ext>`.
    pub fn artifact_path(&self, key: &str) -> String {
        format!("{}/{}.{}", self.root, key, self.extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_millis(200));
        assert!(!config.should_retry(ErrorKind::NotFound));
        assert!(!config.should_retry(ErrorKind::PermissionDenied));
        assert!(!config.should_retry(ErrorKind::InvalidPath));
        assert!(config.should_retry(ErrorKind::NetworkError));
        assert!(config.should_retry(ErrorKind::Timeout));
        assert!(config.should_retry(ErrorKind::Unknown));
    }

    #[test]
    fn test_retry_builder() {
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_base_delay(Duration::from_millis(50))
            .with_non_retryable(vec![ErrorKind::Timeout]);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay, Duration::from_millis(50));
        assert!(!config.should_retry(ErrorKind::Timeout));
        assert!(config.should_retry(ErrorKind::NotFound));
    }

    #[test]
    fn test_coalesce_default_window() {
        assert_eq!(CoalesceConfig::default().window, Duration::from_millis(500));
        let custom = CoalesceConfig::new().with_window(Duration::from_millis(50));
        assert_eq!(custom.window, Duration::from_millis(50));
    }

    #[test]
    fn test_store_config_artifact_path() {
        let config = StoreConfig::new("library");
        assert_eq!(config.artifact_path("settings"), "library/settings.json");

        let toml = StoreConfig::new("library").with_extension("toml");
        assert_eq!(toml.artifact_path("settings"), "library/settings.toml");
    }

    #[test]
    fn test_store_config_builder() {
        let config = StoreConfig::new("projects")
            .with_backup_on_write(true)
            .with_retry(RetryConfig::new().with_max_attempts(1))
            .with_coalesce(CoalesceConfig::new().with_window(Duration::from_millis(100)));
        assert!(config.backup_on_write);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.coalesce.window, Duration::from_millis(100));
    }
}
