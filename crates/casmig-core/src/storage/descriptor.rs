//! Inline storage descriptors such as `local:/srv/cas` or
//! `objectstore:my-bucket:eu-central-1`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use super::{FileStorage, LocalFileStorage, MemoryFileStorage};
use crate::error::{MigrationError, Result};

/// Region used when an object store descriptor omits one.
pub const DEFAULT_REGION: &str = "eu-central-1";

/// Backend type plus connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageDescriptor {
    Local { path: PathBuf },
    ObjectStore { bucket: String, region: String },
    /// A fresh, empty process-local store.
    Memory,
}

impl StorageDescriptor {
    /// Instantiate the backend this descriptor names.
    pub async fn open(&self) -> Result<Arc<dyn FileStorage>> {
        match self {
            StorageDescriptor::Local { path } => {
                Ok(Arc::new(LocalFileStorage::new(path.clone()).await?))
            }
            StorageDescriptor::Memory => Ok(Arc::new(MemoryFileStorage::new())),
            #[cfg(feature = "s3")]
            StorageDescriptor::ObjectStore { bucket, region } => Ok(Arc::new(
                super::S3FileStorage::new(bucket.clone(), region.clone()).await?,
            )),
            #[cfg(not(feature = "s3"))]
            StorageDescriptor::ObjectStore { .. } => Err(MigrationError::InvalidDescriptor(
                "object storage support not compiled in (enable the `s3` feature)".to_string(),
            )),
        }
    }
}

impl FromStr for StorageDescriptor {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, rest) = s.split_once(':').unwrap_or((s, ""));
        match kind {
            // Everything after the first colon is the path, so Windows drive
            // letters survive.
            "local" => {
                if rest.is_empty() {
                    return Err(MigrationError::InvalidDescriptor(
                        "local storage format: local:<path>".to_string(),
                    ));
                }
                Ok(StorageDescriptor::Local {
                    path: PathBuf::from(rest),
                })
            }
            "objectstore" | "s3" => {
                let parts: Vec<&str> = rest.split(':').collect();
                match parts.as_slice() {
                    [bucket] if !bucket.is_empty() => Ok(StorageDescriptor::ObjectStore {
                        bucket: bucket.to_string(),
                        region: DEFAULT_REGION.to_string(),
                    }),
                    [bucket, region] if !bucket.is_empty() && !region.is_empty() => {
                        Ok(StorageDescriptor::ObjectStore {
                            bucket: bucket.to_string(),
                            region: region.to_string(),
                        })
                    }
                    _ => Err(MigrationError::InvalidDescriptor(format!(
                        "object storage format: {kind}:<bucket>:<region>"
                    ))),
                }
            }
            "memory" => Ok(StorageDescriptor::Memory),
            other => Err(MigrationError::InvalidDescriptor(format!(
                "unsupported storage type: {other:?} (supported: local, objectstore, s3, memory)"
            ))),
        }
    }
}

impl fmt::Display for StorageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageDescriptor::Local { path } => write!(f, "local:{}", path.display()),
            StorageDescriptor::ObjectStore { bucket, region } => {
                write!(f, "objectstore:{bucket}:{region}")
            }
            StorageDescriptor::Memory => write!(f, "memory:"),
        }
    }
}
