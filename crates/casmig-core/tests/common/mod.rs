//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use casmig_core::storage::{read_to_vec, reader_from_bytes, ByteReader, FileStorage, MemoryFileStorage};
use tokio::io::{AsyncRead, ReadBuf};
use casmig_core::{MigrationConfig, MigrationError, Result};

/// Memory storage that can be told to fail or stall on specific operations,
/// and counts the calls it receives.
#[derive(Default)]
pub struct FaultyStorage {
    pub inner: MemoryFileStorage,
    failing_reads: HashSet<String>,
    failing_deletes: HashSet<String>,
    panicking_reads: HashSet<String>,
    stalled_reads: HashSet<String>,
    fail_list: bool,
    truncate_saves: bool,
    save_delay: Option<Duration>,
    read_attempts: Mutex<HashMap<String, usize>>,
    pub saves: AtomicUsize,
    pub deletes: AtomicUsize,
    saves_in_flight: AtomicUsize,
    peak_saves_in_flight: AtomicUsize,
}

impl FaultyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.inner.insert(path, data);
        self
    }

    pub fn failing_read(mut self, path: &str) -> Self {
        self.failing_reads.insert(path.to_string());
        self
    }

    pub fn failing_delete(mut self, path: &str) -> Self {
        self.failing_deletes.insert(path.to_string());
        self
    }

    /// `read(path)` panics, as a buggy backend would.
    pub fn panicking_read(mut self, path: &str) -> Self {
        self.panicking_reads.insert(path.to_string());
        self
    }

    /// `read(path)` hands out a reader that never yields any bytes.
    pub fn stalled_read(mut self, path: &str) -> Self {
        self.stalled_reads.insert(path.to_string());
        self
    }

    /// Every save stores only the first half of its content.
    pub fn truncating_saves(mut self) -> Self {
        self.truncate_saves = true;
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn slow_saves(mut self, delay: Duration) -> Self {
        self.save_delay = Some(delay);
        self
    }

    pub fn read_attempts(&self, path: &str) -> usize {
        self.read_attempts
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Highest number of `save` calls seen running at the same time.
    pub fn peak_concurrent_saves(&self) -> usize {
        self.peak_saves_in_flight.load(Ordering::SeqCst)
    }
}

/// Reader that stays pending forever.
struct StalledReader;

impl AsyncRead for StalledReader {
    fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Poll::Pending
    }
}

#[async_trait]
impl FileStorage for FaultyStorage {
    fn kind(&self) -> &'static str {
        "faulty"
    }

    async fn save(&self, path: &str, content: ByteReader) -> Result<u64> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let running = self.saves_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_saves_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.save_delay {
            tokio::time::sleep(delay).await;
        }
        let saved = if self.truncate_saves {
            let mut data = read_to_vec(content).await?;
            data.truncate(data.len() / 2);
            self.inner.save(path, reader_from_bytes(data)).await
        } else {
            self.inner.save(path, content).await
        };

        self.saves_in_flight.fetch_sub(1, Ordering::SeqCst);
        saved
    }

    async fn read(&self, path: &str) -> Result<Option<ByteReader>> {
        *self
            .read_attempts
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default() += 1;
        if self.panicking_reads.contains(path) {
            panic!("backend bug on {path}");
        }
        if self.failing_reads.contains(path) {
            return Err(MigrationError::Storage(format!("injected read failure: {path}")));
        }
        if self.stalled_reads.contains(path) {
            return Ok(Some(Box::new(StalledReader)));
        }
        self.inner.read(path).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.failing_deletes.contains(path) {
            return Err(MigrationError::Storage(format!("injected delete failure: {path}")));
        }
        self.inner.delete(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        if self.fail_list {
            return Err(MigrationError::Storage("injected list failure".to_string()));
        }
        self.inner.list(prefix).await
    }

    async fn size(&self, path: &str) -> Result<Option<u64>> {
        self.inner.size(path).await
    }

    async fn content_hash(&self, path: &str) -> Result<Option<String>> {
        self.inner.content_hash(path).await
    }
}

/// Defaults with a near-zero retry backoff so failure tests stay fast.
pub fn fast_config() -> MigrationConfig {
    MigrationConfig {
        retry_backoff_ms: 1,
        ..Default::default()
    }
}
