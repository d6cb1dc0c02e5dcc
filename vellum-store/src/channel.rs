//! Host storage channel trait and in-memory test double.
//!
//! The channel is the asynchronous message-passing boundary through which the
//! engine reaches storage primitives it does not implement itself. It is
//! modeled as an injected trait so the entire engine can be exercised against
//! [`MemoryChannel`] in tests without touching real storage.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use vellum_core::{code, ChannelFailure};

/// Result type at the channel boundary, before error translation.
pub type ChannelResult<T> = Result<T, ChannelFailure>;

/// Options for a durable write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Write a sibling backup file before overwriting the artifact.
    pub backup: bool,
}

impl WriteOptions {
    pub fn with_backup() -> Self {
        Self { backup: true }
    }
}

/// Asynchronous storage primitives supplied by the host.
///
/// Every artifact is a full-file overwrite; there are no partial or append
/// writes. Implementations surface failures as [`ChannelFailure`] values
/// carrying a machine-readable code (see [`vellum_core::code`]).
#[async_trait]
pub trait StorageChannel: Send + Sync {
    /// Read the full contents of the artifact at `path`.
    async fn read(&self, path: &str) -> ChannelResult<Vec<u8>>;

    /// Overwrite the artifact at `path` with `content`.
    async fn write(&self, path: &str, content: &[u8], opts: WriteOptions) -> ChannelResult<()>;

    /// Whether an artifact exists at `path`.
    async fn exists(&self, path: &str) -> ChannelResult<bool>;

    /// Create the directory at `path`.
    async fn mkdir(&self, path: &str, recursive: bool) -> ChannelResult<()>;

    /// Delete the artifact at `path`.
    async fn delete(&self, path: &str) -> ChannelResult<()>;

    /// Delete the directory at `path` and everything under it.
    async fn delete_dir(&self, path: &str) -> ChannelResult<()>;
}

/// Channel methods, used for call counting and fault scripting on the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelMethod {
    Read,
    Write,
    Exists,
    Mkdir,
    Delete,
    DeleteDir,
}

/// In-memory mock channel for testing.
///
/// Backed by a plain map of path to bytes. Counts calls per method and
/// supports scripted failure injection: each queued fault is consumed by the
/// next call to its method, letting tests drive retry and rollback paths
/// deterministically.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    files: Mutex<HashMap<String, Vec<u8>>>,
    dirs: Mutex<HashSet<String>>,
    calls: Mutex<HashMap<ChannelMethod, u64>>,
    faults: Mutex<HashMap<ChannelMethod, VecDeque<ChannelFailure>>>,
    latency: Mutex<HashMap<ChannelMethod, Duration>>,
}

impl MemoryChannel {
    /// Create a new empty mock channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an artifact directly, bypassing call counting.
    pub fn seed(&self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.lock().unwrap().insert(path.into(), content.into());
    }

    /// Current contents of the artifact at `path`, if any.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    /// All artifact paths currently stored.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// How many times `method` has been called.
    pub fn call_count(&self, method: ChannelMethod) -> u64 {
        self.calls.lock().unwrap().get(&method).copied().unwrap_or(0)
    }

    /// Queue a failure to be returned by the next call to `method`.
    pub fn fail_next(&self, method: ChannelMethod, failure: ChannelFailure) {
        self.faults
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push_back(failure);
    }

    /// Queue the same failure for the next `n` calls to `method`.
    pub fn fail_times(&self, method: ChannelMethod, failure: ChannelFailure, n: usize) {
        let mut faults = self.faults.lock().unwrap();
        let queue = faults.entry(method).or_default();
        for _ in 0..n {
            queue.push_back(failure.clone());
        }
    }

    /// Add artificial latency to every call of `method`, for tests that
    /// observe whether operations overlap.
    pub fn set_latency(&self, method: ChannelMethod, latency: Duration) {
        self.latency.lock().unwrap().insert(method, latency);
    }

    async fn begin(&self, method: ChannelMethod) -> ChannelResult<()> {
        let latency = self.latency.lock().unwrap().get(&method).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        *self.calls.lock().unwrap().entry(method).or_insert(0) += 1;
        if let Some(failure) = self
            .faults
            .lock()
            .unwrap()
            .get_mut(&method)
            .and_then(VecDeque::pop_front)
        {
            return Err(failure);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageChannel for MemoryChannel {
    async fn read(&self, path: &str) -> ChannelResult<Vec<u8>> {
        self.begin(ChannelMethod::Read).await?;
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| ChannelFailure::new(code::NOT_FOUND, format!("no artifact at {path}")))
    }

    async fn write(&self, path: &str, content: &[u8], opts: WriteOptions) -> ChannelResult<()> {
        self.begin(ChannelMethod::Write).await?;
        let mut files = self.files.lock().unwrap();
        if opts.backup {
            if let Some(previous) = files.get(path).cloned() {
                files.insert(format!("{path}.bak"), previous);
            }
        }
        files.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn exists(&self, path: &str) -> ChannelResult<bool> {
        self.begin(ChannelMethod::Exists).await?;
        Ok(self.files.lock().unwrap().contains_key(path))
    }

    async fn mkdir(&self, path: &str, _recursive: bool) -> ChannelResult<()> {
        self.begin(ChannelMethod::Mkdir).await?;
        self.dirs.lock().unwrap().insert(path.to_string());
        Ok(())
    }

    async fn delete(&self, path: &str) -> ChannelResult<()> {
        self.begin(ChannelMethod::Delete).await?;
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| ChannelFailure::new(code::NOT_FOUND, format!("no artifact at {path}")))
    }

    async fn delete_dir(&self, path: &str) -> ChannelResult<()> {
        self.begin(ChannelMethod::DeleteDir).await?;
        let prefix = format!("{path}/");
        self.files
            .lock()
            .unwrap()
            .retain(|p, _| !p.starts_with(&prefix));
        self.dirs.lock().unwrap().remove(path);
        Ok(())
    }
}
