//! Load/save caches for provider responses and merged items.
//!
//! Entries are JSON values addressed by a request identifier (a work id, or a
//! provider id plus request). Implementations store them under
//! [`cache_key`], a SHA-256 hex digest of the identifier.
//!
//! Both implementations allow concurrent readers and writers. Concurrent writes to
//! one key leave exactly one of the written values.

use crate::{MergeError, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tempfile::NamedTempFile;
use tracing::debug;

/// Stable hash of a request identifier.
pub fn cache_key(identifier: &str) -> String {
    format!("{:x}", Sha256::digest(identifier.as_bytes()))
}

/// An opaque key/value store keyed by request identifier.
pub trait Cache: Send + Sync {
    /// Returns the stored value, or `None` on a miss.
    fn load(&self, identifier: &str) -> Result<Option<Value>>;

    /// Stores `value`, replacing any previous entry.
    fn save(&self, identifier: &str, value: &Value) -> Result<()>;
}

fn poisoned<T>(_: T) -> MergeError {
    MergeError::Cache("cache lock poisoned".to_string())
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for MemoryCache {
    fn load(&self, identifier: &str) -> Result<Option<Value>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(&cache_key(identifier)).cloned())
    }

    fn save(&self, identifier: &str, value: &Value) -> Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(cache_key(identifier), value.clone());
        Ok(())
    }
}

/// Cache storing one JSON file per entry in a directory.
///
/// Writes go to a uniquely named temporary file in the same directory that is
/// renamed into place, so readers never see a partially written entry, even with
/// several processes sharing the directory.
#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Opens a cache in `dir`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Cache for FileCache {
    fn load(&self, identifier: &str) -> Result<Option<Value>> {
        let path = self.path(&cache_key(identifier));
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, identifier: &str, value: &Value) -> Result<()> {
        let path = self.path(&cache_key(identifier));
        let mut file = NamedTempFile::new_in(&self.dir)?;
        file.write_all(&serde_json::to_vec(value)?)?;
        file.persist(&path).map_err(|e| e.error)?;
        debug!(identifier, path = %path.display(), "cache entry written");
        Ok(())
    }
}
