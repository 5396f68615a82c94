//! In-memory storage backend (tests, demos, `memory:` descriptors).

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{read_to_vec, reader_from_bytes, ByteReader, FileStorage};
use crate::error::{MigrationError, Result};
use crate::hash::content_hash;

/// Thread-safe via `RwLock`. Not persistent; data is lost on drop.
#[derive(Default)]
pub struct MemoryFileStorage {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file directly, bypassing the async interface.
    pub fn insert(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.write_lock().insert(path.into(), data.into());
    }

    /// Copy of a stored file's bytes.
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.read_lock().get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.files.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.files.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl FileStorage for MemoryFileStorage {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn save(&self, path: &str, content: ByteReader) -> Result<u64> {
        if path.is_empty() {
            return Err(MigrationError::Storage("empty path".to_string()));
        }
        let data = read_to_vec(content).await?;
        let len = data.len() as u64;
        self.write_lock().insert(path.to_string(), data);
        Ok(len)
    }

    async fn read(&self, path: &str) -> Result<Option<ByteReader>> {
        Ok(self.get(path).map(reader_from_bytes))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.write_lock().remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.read_lock().contains_key(path))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .read_lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn size(&self, path: &str) -> Result<Option<u64>> {
        Ok(self.read_lock().get(path).map(|d| d.len() as u64))
    }

    async fn content_hash(&self, path: &str) -> Result<Option<String>> {
        Ok(self.read_lock().get(path).map(|d| content_hash(d)))
    }
}
