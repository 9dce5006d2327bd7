//! Durable storage for redirect artifacts.
//!
//! Readers must only ever observe complete files. [`FsStorage`] writes to a
//! uniquely named temp file next to the target and renames it into place, so
//! a reader sees either the old artifact or the new one, and two racing
//! writers never share a temp file (last rename wins).

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::RedirectError;

/// Abstraction over artifact persistence so tests can run in memory.
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Read a whole artifact; `Ok(None)` when it does not exist.
    async fn read(&self, path: &Path) -> Result<Option<Bytes>, RedirectError>;

    /// Replace an artifact atomically.
    async fn write_atomic(&self, path: &Path, data: Bytes) -> Result<(), RedirectError>;
}

/// Portable filesystem storage using tokio::fs
#[derive(Debug, Default, Clone)]
pub struct FsStorage;

impl FsStorage {
    pub fn new() -> Self {
        Self
    }

    fn temp_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let temp_name = format!(".{}.{}.tmp", name, Uuid::new_v4().simple());
        match path.parent() {
            Some(parent) => parent.join(temp_name),
            None => PathBuf::from(temp_name),
        }
    }
}

#[async_trait]
impl ArtifactStorage for FsStorage {
    async fn read(&self, path: &Path) -> Result<Option<Bytes>, RedirectError> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic(&self, path: &Path, data: Bytes) -> Result<(), RedirectError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let temp_path = Self::temp_path(path);
        let written = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            tokio::fs::rename(&temp_path, path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// In-memory storage with failure injection.
///
/// Exists for unit and integration tests (`tests/scenarios`); the server and
/// the CLI only ever construct [`FsStorage`]. Not meant for production use:
/// nothing is durable and the failure switches are global to the instance.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    files: Arc<RwLock<HashMap<PathBuf, Bytes>>>,
    fail_reads: Arc<RwLock<bool>>,
    fail_writes: Arc<RwLock<bool>>,
    writes: Arc<AtomicU64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read fail with a simulated I/O error
    pub fn set_fail_reads(&self, enabled: bool) {
        *self.fail_reads.write() = enabled;
    }

    /// Make every write fail with a simulated I/O error
    pub fn set_fail_writes(&self, enabled: bool) {
        *self.fail_writes.write() = enabled;
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }

    /// Place raw bytes directly, bypassing failure injection.
    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Bytes>) {
        self.files.write().insert(path.into(), data.into());
    }
}

#[async_trait]
impl ArtifactStorage for MemoryStorage {
    async fn read(&self, path: &Path) -> Result<Option<Bytes>, RedirectError> {
        if *self.fail_reads.read() {
            return Err(std::io::Error::new(ErrorKind::PermissionDenied, "Simulated read failure").into());
        }
        Ok(self.files.read().get(path).cloned())
    }

    async fn write_atomic(&self, path: &Path, data: Bytes) -> Result<(), RedirectError> {
        if *self.fail_writes.read() {
            return Err(std::io::Error::new(ErrorKind::Other, "Simulated write failure").into());
        }
        self.files.write().insert(path.to_path_buf(), data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
