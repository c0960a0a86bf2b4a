//! Key → JSON document storage.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::error::StorageError;

pub trait DocumentStore: Send + Sync + 'static {
    /// `Ok(None)` when the document does not exist.
    fn read(&self, key: &str) -> impl Future<Output = Result<Option<String>, StorageError>> + Send;
    fn write(&self, key: &str, contents: String) -> impl Future<Output = Result<(), StorageError>> + Send;
    /// Returns whether a document was removed.
    fn remove(&self, key: &str) -> impl Future<Output = Result<bool, StorageError>> + Send;
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(io_error(
                key,
                std::io::Error::new(ErrorKind::InvalidInput, "invalid document key"),
            ));
        }
        Ok(self.dir.join(key))
    }
}

fn io_error(path: impl AsRef<Path>, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.as_ref().display().to_string(),
        source,
    }
}

impl DocumentStore for FileStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn write(&self, key: &str, contents: String) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        // tmp + rename: readers never see a partial file
        let tmp = self.dir.join(format!(".{}.tmp", key));
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))?;
        debug!("wrote {}", path.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

/// In-memory store for tests. Clones share the same documents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    docs: Arc<Mutex<HashMap<String, String>>>,
    fail_writes: Arc<AtomicBool>,
    write_delays: Arc<Mutex<VecDeque<Duration>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Stall the next writes, one delay per write, in order.
    pub fn delay_writes(&self, delays: impl IntoIterator<Item = Duration>) {
        self.write_delays
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(delays);
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.docs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DocumentStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn write(&self, key: &str, contents: String) -> Result<(), StorageError> {
        let delay = self
            .write_delays
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io_error(
                key,
                std::io::Error::new(ErrorKind::Other, "writes disabled"),
            ));
        }
        self.lock().insert(key.to_string(), contents);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.lock().remove(key).is_some())
    }
}
