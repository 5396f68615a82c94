use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

use super::{read_to_vec, ByteReader, FileStorage};
use crate::error::{MigrationError, Result};

/// S3-backed file storage.
///
/// Logical paths map one-to-one onto object keys below an optional prefix:
/// ```text
/// <prefix>ab/cd/ef/abcdef...   – raw file bytes
/// ```
///
/// Enable with the `s3` Cargo feature flag.
pub struct S3FileStorage {
    client: S3Client,
    bucket: String,
    prefix: String,
}

impl S3FileStorage {
    /// Create a new S3FileStorage.
    ///
    /// `bucket` – the S3 bucket name.
    /// `region` – the bucket's region, e.g. `"eu-central-1"`.
    ///
    /// Credentials are resolved via the standard SDK chain (env vars,
    /// `~/.aws/credentials`, instance profile, etc.).
    pub async fn new(bucket: impl Into<String>, region: impl Into<String>) -> Result<Self> {
        let config = aws_config::from_env()
            .region(aws_config::Region::new(region.into()))
            .load()
            .await;
        let storage = S3FileStorage {
            client: S3Client::new(&config),
            bucket: bucket.into(),
            prefix: String::new(),
        };
        storage.check_bucket().await?;
        Ok(storage)
    }

    /// Build from an existing client, e.g. one pointed at MinIO or LocalStack.
    pub fn with_client(client: S3Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        S3FileStorage {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    fn key(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path)
    }

    /// Verify bucket access with a cheap `head_bucket` call.
    async fn check_bucket(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                MigrationError::Storage(format!(
                    "S3 bucket '{}' not accessible: {}",
                    self.bucket,
                    e.into_service_error()
                ))
            })?;
        Ok(())
    }

    /// HEAD a key, returning `(size, etag)` or `None` if missing.
    async fn head(&self, path: &str) -> Result<Option<(u64, Option<String>)>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
        {
            Ok(resp) => {
                let size = resp.content_length().unwrap_or(0).max(0) as u64;
                let etag = resp.e_tag().map(|t| t.trim_matches('"').to_string());
                Ok(Some((size, etag)))
            }
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    Ok(None)
                } else {
                    Err(MigrationError::Storage(service_err.to_string()))
                }
            }
        }
    }
}

#[async_trait]
impl FileStorage for S3FileStorage {
    fn kind(&self) -> &'static str {
        "s3"
    }

    /// S3 needs the content length up front, so the body is buffered.
    async fn save(&self, path: &str, content: ByteReader) -> Result<u64> {
        let data = read_to_vec(content).await?;
        let len = data.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .body(ByteStream::from(data))
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| MigrationError::Storage(e.into_service_error().to_string()))?;
        tracing::debug!(bucket = %self.bucket, path, bytes = len, "file saved to s3");
        Ok(len)
    }

    async fn read(&self, path: &str) -> Result<Option<ByteReader>> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
        {
            Ok(resp) => Ok(Some(Box::new(Box::pin(resp.body.into_async_read())))),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(MigrationError::Storage(service_err.to_string()))
                }
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
            .map_err(|e| MigrationError::Storage(e.into_service_error().to_string()))?;
        tracing::debug!(bucket = %self.bucket, path, "file deleted from s3");
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.head(path).await?.is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = self.key(prefix);
        let mut paths = Vec::new();

        let mut continuation: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix);
            if let Some(ref token) = continuation {
                req = req.continuation_token(token);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| MigrationError::Storage(e.into_service_error().to_string()))?;

            for obj in resp.contents() {
                if let Some(key) = obj.key() {
                    let path = key.strip_prefix(&self.prefix).unwrap_or(key);
                    paths.push(path.to_string());
                }
            }

            if resp.is_truncated().unwrap_or(false) {
                continuation = resp.next_continuation_token().map(|s| s.to_string());
                if continuation.is_none() {
                    break;
                }
            } else {
                break;
            }
        }
        Ok(paths)
    }

    async fn size(&self, path: &str) -> Result<Option<u64>> {
        Ok(self.head(path).await?.map(|(size, _)| size))
    }

    /// The object's ETag (an MD5 for single-part uploads).
    async fn content_hash(&self, path: &str) -> Result<Option<String>> {
        Ok(self.head(path).await?.and_then(|(_, etag)| etag))
    }
}
