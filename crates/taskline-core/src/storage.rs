//! On-device persistence of the last known task list.
//!
//! The full, unfiltered list is kept under a single key. It is read only when
//! the task server is unreachable, and rewritten after every confirmed
//! mutation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::{StorageError, Task};

/// Key holding the serialized task list.
pub const TASKS_KEY: &str = "@tasks";

/// Durable string key-value storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Read the value under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Key-value store backed by one JSON file per key in a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(key);

        // Write to temp file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(value.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &path).await?;

        debug!(key, path = %path.display(), bytes = value.len(), "stored value");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process key-value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.get(key).map(|v| v.value().clone()))
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.remove(key);
        Ok(())
    }
}

/// Saves and restores the full task list through a [`KeyValueStore`].
#[derive(Clone)]
pub struct LocalTaskStore {
    kv: Arc<dyn KeyValueStore>,
}

impl LocalTaskStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Persist the full task list. Timestamps are written as ISO-8601.
    pub async fn save(&self, tasks: &[Task]) -> Result<(), StorageError> {
        let json = serde_json::to_string(tasks)?;
        self.kv.set(TASKS_KEY, json).await?;
        debug!(count = tasks.len(), "saved tasks locally");
        Ok(())
    }

    /// Load the saved task list.
    ///
    /// Returns `None` when nothing was saved or the saved data is unreadable;
    /// both are treated as a cold start.
    pub async fn load(&self) -> Option<Vec<Task>> {
        let stored = match self.kv.get(TASKS_KEY).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "failed to read saved tasks");
                return None;
            }
        };

        match serde_json::from_str::<Vec<Task>>(&stored) {
            Ok(tasks) => Some(tasks),
            Err(e) => {
                warn!(error = %e, "discarding unreadable saved tasks");
                None
            }
        }
    }

    /// Remove the saved task list.
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.kv.remove(TASKS_KEY).await
    }
}
