//! Per-file transfer with retry, timeout and size verification.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::progress::{ProgressPublisher, Totals};
use crate::config::MigrationConfig;
use crate::error::{MigrationError, Result};
use crate::storage::FileStorage;
use crate::types::{MigrationFailure, RunId};

/// Counters shared by every transfer task of a run.
#[derive(Default)]
pub(crate) struct RunCounters {
    pub processed_files: AtomicUsize,
    pub processed_bytes: AtomicU64,
    pub successful_files: AtomicUsize,
    pub transferred_bytes: AtomicU64,
    failures: Mutex<Vec<MigrationFailure>>,
}

impl RunCounters {
    fn push_failure(&self, failure: MigrationFailure) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }

    pub fn take_failures(&self) -> Vec<MigrationFailure> {
        std::mem::take(&mut *self.failures.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Everything a transfer task needs, shared behind an `Arc`.
pub(crate) struct RunContext {
    pub id: RunId,
    pub source: Arc<dyn FileStorage>,
    pub target: Arc<dyn FileStorage>,
    pub config: MigrationConfig,
    pub cancel: CancellationToken,
    pub publisher: Arc<ProgressPublisher>,
    pub counters: RunCounters,
}

enum Outcome {
    Copied,
    Skipped,
}

impl RunContext {
    /// Migrate one file, record the outcome and publish a snapshot.
    ///
    /// A file abandoned during backoff because the run was cancelled is not
    /// counted as processed.
    pub async fn migrate_file(&self, path: &str, source_size: u64, totals: Totals) {
        let mut retry_count = 0u32;
        let outcome = loop {
            match self.attempt(path, retry_count == 0).await {
                Ok(outcome) => break Ok(outcome),
                Err(e) if retry_count >= self.config.max_retries => break Err(e),
                Err(e) => {
                    retry_count += 1;
                    tracing::warn!(
                        run = %self.id,
                        path,
                        retry = retry_count,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "transfer attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            tracing::debug!(run = %self.id, path, "retry abandoned after cancellation");
                            return;
                        }
                        _ = tokio::time::sleep(self.config.backoff(retry_count)) => {}
                    }
                }
            }
        };

        match outcome {
            Ok(outcome) => {
                self.counters.successful_files.fetch_add(1, Ordering::SeqCst);
                self.counters
                    .transferred_bytes
                    .fetch_add(source_size, Ordering::SeqCst);
                if self.config.delete_source_after_migration {
                    self.delete_source(path, source_size, &outcome).await;
                }
            }
            Err(e) => {
                tracing::error!(
                    run = %self.id,
                    path,
                    retries = retry_count,
                    error = %e,
                    "file migration failed"
                );
                self.counters.push_failure(MigrationFailure {
                    file_path: path.to_string(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                    retry_count,
                });
            }
        }
        self.file_processed(path, source_size, totals);
    }

    /// Record a file whose transfer task died without reaching an outcome.
    pub fn task_panicked(&self, path: &str, source_size: u64, totals: Totals, panic: &str) {
        tracing::error!(run = %self.id, path, panic, "transfer task panicked");
        self.counters.push_failure(MigrationFailure {
            file_path: path.to_string(),
            error: format!("transfer task panicked: {panic}"),
            timestamp: Utc::now(),
            retry_count: 0,
        });
        self.file_processed(path, source_size, totals);
    }

    fn file_processed(&self, path: &str, source_size: u64, totals: Totals) {
        let processed = self.counters.processed_files.fetch_add(1, Ordering::SeqCst) + 1;
        let bytes = self
            .counters
            .processed_bytes
            .fetch_add(source_size, Ordering::SeqCst)
            + source_size;
        if !self.cancel.is_cancelled() {
            self.publisher.file_done(path, processed, bytes, totals);
        }
    }

    /// Only a first attempt may skip: on a retry the target copy may be the
    /// one a failed attempt just wrote.
    async fn attempt(&self, path: &str, first: bool) -> Result<Outcome> {
        if first && self.config.skip_existing_files && self.target.exists(path).await? {
            tracing::debug!(run = %self.id, path, "already in target, skipping");
            return Ok(Outcome::Skipped);
        }

        let reader = self
            .source
            .read(path)
            .await?
            .ok_or_else(|| MigrationError::NotFound {
                path: path.to_string(),
            })?;

        let timeout = self.config.timeout_per_file();
        tokio::time::timeout(timeout, self.target.save(path, reader))
            .await
            .map_err(|_| MigrationError::Timeout {
                path: path.to_string(),
                after_ms: self.config.timeout_per_file_ms,
            })??;

        if self.config.verify_after_migration {
            let source_size = self.source.size(path).await?;
            let target_size = self.target.size(path).await?;
            if source_size.is_none() || source_size != target_size {
                return Err(MigrationError::SizeMismatch {
                    path: path.to_string(),
                    source_size,
                    target_size,
                });
            }
        }
        Ok(Outcome::Copied)
    }

    /// Remove the source copy once the target holds a same-sized file.
    /// Failures here never fail the file.
    async fn delete_source(&self, path: &str, source_size: u64, outcome: &Outcome) {
        match self.target.size(path).await {
            Ok(Some(size)) if size == source_size => {}
            Ok(target_size) => {
                tracing::warn!(
                    run = %self.id,
                    path,
                    source_size,
                    ?target_size,
                    skipped = matches!(outcome, Outcome::Skipped),
                    "target copy differs, keeping source"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(run = %self.id, path, error = %e, "cannot check target, keeping source");
                return;
            }
        }
        if let Err(e) = self.source.delete(path).await {
            tracing::warn!(run = %self.id, path, error = %e, "failed to delete source after migration");
        }
    }
}
