pub mod descriptor;
pub mod local;
pub mod memory;

#[cfg(feature = "s3")]
pub mod s3;

pub use descriptor::StorageDescriptor;
pub use local::LocalFileStorage;
pub use memory::MemoryFileStorage;

#[cfg(feature = "s3")]
pub use s3::S3FileStorage;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;

/// A readable byte stream handed between backends.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Wrap an owned buffer as a [`ByteReader`].
pub fn reader_from_bytes(data: Vec<u8>) -> ByteReader {
    Box::new(std::io::Cursor::new(data))
}

/// Drain a reader into memory.
pub async fn read_to_vec(mut reader: ByteReader) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Path-keyed file storage: the only surface the migration engine and the
/// verification service depend on.
///
/// Paths are `/`-separated and relative to the backend root. `list` returns
/// every file under the prefix; backends with paginated listings must drain
/// all pages before returning.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Short backend name used in log lines ("local", "s3", "memory").
    fn kind(&self) -> &'static str;

    /// Write `content` to `path`, replacing any existing file. Returns the
    /// number of bytes written.
    async fn save(&self, path: &str, content: ByteReader) -> Result<u64>;

    /// Open `path` for reading, or `None` if it does not exist.
    async fn read(&self, path: &str) -> Result<Option<ByteReader>>;

    /// Delete `path`. Deleting a missing file is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// List all file paths starting with `prefix` (`""` for everything).
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Size in bytes, or `None` if the file does not exist.
    async fn size(&self, path: &str) -> Result<Option<u64>>;

    /// Backend-specific digest of the stored bytes, or `None` if absent.
    async fn content_hash(&self, path: &str) -> Result<Option<String>>;
}
