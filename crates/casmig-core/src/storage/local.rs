//! Local filesystem storage backend.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{ByteReader, FileStorage};
use crate::error::{MigrationError, Result};
use crate::hash::content_hash;

/// Suffix of in-flight writes; renamed into place once fully written.
const PARTIAL_SUFFIX: &str = ".casmig-partial";

/// Removes an in-flight write when dropped before [`committed`](Self::committed),
/// including when the save future itself is dropped by a timeout or
/// cancellation.
struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        PartialFile {
            path,
            committed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn committed(mut self) {
        self.committed = true;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed unfinished write"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "could not remove unfinished write"),
        }
    }
}

/// Files stored as plain files below a base directory, one file per path.
pub struct LocalFileStorage {
    base_path: PathBuf,
}

impl LocalFileStorage {
    /// Open (and create if needed) a store rooted at `base_path`.
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(LocalFileStorage { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a logical path below the base directory, refusing anything
    /// that would escape it.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || path.is_empty() {
            return Err(MigrationError::Storage(format!("invalid path: {path:?}")));
        }
        Ok(self.base_path.join(relative))
    }

    async fn is_file(path: &Path) -> Result<bool> {
        match fs::metadata(path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn save(&self, path: &str, mut content: ByteReader) -> Result<u64> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut partial = target.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        let partial = PartialFile::new(PathBuf::from(partial));

        let mut file = fs::File::create(partial.path()).await?;
        let written = tokio::io::copy(&mut content, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(partial.path(), &target).await?;
        partial.committed();

        tracing::debug!(
            path,
            absolute = %target.display(),
            bytes = written,
            "file saved to local storage"
        );
        Ok(written)
    }

    async fn read(&self, path: &str) -> Result<Option<ByteReader>> {
        let target = self.resolve(path)?;
        match fs::File::open(&target).await {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => {
                tracing::debug!(path, "file deleted from local storage");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path, "attempted to delete missing file from local storage");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Self::is_file(&self.resolve(path)?).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Start the walk at the deepest directory named by the prefix.
        let start_dir = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let root = if start_dir.is_empty() {
            self.base_path.clone()
        } else {
            self.resolve(start_dir)?
        };

        let mut files = Vec::new();
        let mut pending = vec![(root, start_dir.to_string())];

        while let Some((dir, relative)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let child = if relative.is_empty() {
                    name.clone()
                } else {
                    format!("{relative}/{name}")
                };
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push((entry.path(), child));
                } else if file_type.is_file()
                    && !name.ends_with(PARTIAL_SUFFIX)
                    && child.starts_with(prefix)
                {
                    files.push(child);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    async fn size(&self, path: &str) -> Result<Option<u64>> {
        let target = self.resolve(path)?;
        match fs::metadata(&target).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn content_hash(&self, path: &str) -> Result<Option<String>> {
        let target = self.resolve(path)?;
        match fs::read(&target).await {
            Ok(data) => Ok(Some(content_hash(&data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{read_to_vec, reader_from_bytes};

    async fn store() -> (tempfile::TempDir, LocalFileStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path()).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_save_read_roundtrip() {
        let (_dir, storage) = store().await;
        let written = storage
            .save("ab/cd/file.bin", reader_from_bytes(b"payload".to_vec()))
            .await
            .unwrap();
        assert_eq!(written, 7);

        let reader = storage.read("ab/cd/file.bin").await.unwrap().unwrap();
        assert_eq!(read_to_vec(reader).await.unwrap(), b"payload");
        assert_eq!(storage.size("ab/cd/file.bin").await.unwrap(), Some(7));
        assert!(storage.read("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_with_prefix_is_sorted() {
        let (_dir, storage) = store().await;
        for path in ["b/2", "a/1", "a/sub/3", "c"] {
            storage
                .save(path, reader_from_bytes(vec![0u8; 3]))
                .await
                .unwrap();
        }
        assert_eq!(
            storage.list("").await.unwrap(),
            vec!["a/1", "a/sub/3", "b/2", "c"]
        );
        assert_eq!(storage.list("a/").await.unwrap(), vec!["a/1", "a/sub/3"]);
        assert_eq!(storage.list("a/s").await.unwrap(), vec!["a/sub/3"]);
        assert!(storage.list("zzz/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, storage) = store().await;
        storage
            .save("x", reader_from_bytes(b"1".to_vec()))
            .await
            .unwrap();
        storage.delete("x").await.unwrap();
        storage.delete("x").await.unwrap();
        assert!(!storage.exists("x").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let (_dir, storage) = store().await;
        assert!(storage.exists("../etc/passwd").await.is_err());
        assert!(storage.exists("/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_content_hash_matches_sha256() {
        let (_dir, storage) = store().await;
        storage
            .save("h", reader_from_bytes(b"hello world".to_vec()))
            .await
            .unwrap();
        assert_eq!(
            storage.content_hash("h").await.unwrap().as_deref(),
            Some("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
        );
    }

    #[tokio::test]
    async fn test_abandoned_save_removes_partial_file() {
        let (dir, storage) = store().await;
        let (mut writer, reader) = tokio::io::duplex(64);
        writer.write_all(b"first half").await.unwrap();

        let save = storage.save("sub/x", Box::new(reader));
        let abandoned = tokio::time::timeout(std::time::Duration::from_millis(20), save).await;
        assert!(abandoned.is_err());
        drop(writer);

        let leftover: Vec<_> = std::fs::read_dir(dir.path().join("sub"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert!(leftover.is_empty(), "left behind: {leftover:?}");
        assert!(!storage.exists("sub/x").await.unwrap());
    }
}
