//! Key-value registers
//!
//! A register stores one string value per key and replaces a key's value
//! atomically. That single guarantee is all the log engine relies on.

use crate::schema::validate_identifier;
use crate::{PersistenceError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Atomic single-key string storage
#[async_trait]
pub trait Register: Send + Sync {
    /// Current value of `key`, if any
    async fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value of `key` in one step
    async fn write(&self, key: &str, value: &str) -> Result<()>;

    /// All keys currently held, sorted
    async fn keys(&self) -> Result<Vec<String>>;
}

/// In-process register, optionally capped per value like a browser's
/// local storage quota
#[derive(Debug, Default)]
pub struct MemoryRegister {
    entries: RwLock<HashMap<String, String>>,
    max_value_bytes: Option<usize>,
}

impl MemoryRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes whose value is larger than `limit` bytes
    pub fn with_capacity_limit(limit: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_value_bytes: Some(limit),
        }
    }
}

#[async_trait]
impl Register for MemoryRegister {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        if let Some(limit) = self.max_value_bytes {
            if value.len() > limit {
                return Err(PersistenceError::CapacityExceeded {
                    key: key.to_string(),
                    size: value.len(),
                    limit,
                }
                .into());
            }
        }
        self.entries.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Register backed by a directory, one `<key>.json` file per key.
///
/// Writes go to a temporary sibling file which is then renamed over the
/// target, so readers see either the old value or the new one.
#[derive(Debug, Clone)]
pub struct FileRegister {
    dir: PathBuf,
}

impl FileRegister {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_identifier("register key", key)?;
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl Register for FileRegister {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let dir = self.dir.clone();
        let bytes = value.as_bytes().to_vec();
        let size = bytes.len();

        // Each writer gets its own temp file, so concurrent writers race
        // only on the final rename.
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&dir)?;
            let mut tmp = tempfile::Builder::new()
                .prefix(".stowage-")
                .suffix(".tmp")
                .tempfile_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)??;

        tracing::debug!("Wrote {} bytes to {}", size, path.display());
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(key) = name.strip_suffix(".json") {
                if !key.starts_with('.') {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
