use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::types::{MigrationProgress, MigrationResult, MigrationStatus};

/// File and byte totals fixed at enumeration time.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Totals {
    pub files: usize,
    pub bytes: u64,
}

/// Publishes snapshots for one run into a watch channel.
///
/// Watch semantics give every subscriber the latest snapshot on subscribe
/// and never block the publisher. Snapshots are only accepted when they do
/// not move `processed_files` backwards, and nothing is accepted after a
/// terminal snapshot.
pub(crate) struct ProgressPublisher {
    tx: watch::Sender<MigrationProgress>,
    start_time: DateTime<Utc>,
    started: Instant,
}

impl ProgressPublisher {
    pub fn new(tx: watch::Sender<MigrationProgress>, start_time: DateTime<Utc>) -> Self {
        ProgressPublisher {
            tx,
            start_time,
            started: Instant::now(),
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Totals published by [`started`](Self::started), if enumeration finished.
    pub fn totals(&self) -> Option<Totals> {
        let current = self.tx.borrow();
        (current.status != MigrationStatus::NotStarted).then_some(Totals {
            files: current.total_files,
            bytes: current.total_size_bytes,
        })
    }

    pub fn started(&self, totals: Totals) {
        let snapshot = MigrationProgress {
            status: MigrationStatus::InProgress,
            processed_files: 0,
            total_files: totals.files,
            processed_size_bytes: 0,
            total_size_bytes: totals.bytes,
            current_file: None,
            percentage: 0.0,
            estimated_time_remaining_ms: None,
            transfer_rate: 0.0,
            start_time: self.start_time,
            message: format!("Starting migration of {} files", totals.files),
        };
        self.replace(snapshot);
    }

    /// Snapshot after a file finished (successfully or not).
    pub fn file_done(&self, path: &str, processed_files: usize, processed_bytes: u64, totals: Totals) {
        let rate = transfer_rate(processed_bytes, self.elapsed_ms());
        let snapshot = MigrationProgress {
            status: MigrationStatus::InProgress,
            processed_files,
            total_files: totals.files,
            processed_size_bytes: processed_bytes,
            total_size_bytes: totals.bytes,
            current_file: Some(path.to_string()),
            percentage: percentage(processed_files, totals.files),
            estimated_time_remaining_ms: estimate_remaining_ms(
                totals.bytes.saturating_sub(processed_bytes),
                rate,
            ),
            transfer_rate: rate,
            start_time: self.start_time,
            message: format!("Migrating: {path} ({processed_files}/{})", totals.files),
        };
        self.replace(snapshot);
    }

    /// Terminal snapshot derived from the recorded result.
    pub fn finish(&self, result: &MigrationResult) {
        self.tx.send_modify(|current| {
            let processed = (result.successful_files + result.failed_files).max(current.processed_files);
            let total_files = result.total_files.max(current.total_files);
            let completed = result.status == MigrationStatus::Completed;
            *current = MigrationProgress {
                status: result.status,
                processed_files: processed,
                total_files,
                processed_size_bytes: current.processed_size_bytes,
                total_size_bytes: result.total_size_bytes.max(current.total_size_bytes),
                current_file: None,
                percentage: if completed {
                    100.0
                } else {
                    percentage(processed, total_files)
                },
                estimated_time_remaining_ms: if completed { Some(0) } else { None },
                transfer_rate: transfer_rate(current.processed_size_bytes, result.duration_ms),
                start_time: self.start_time,
                message: result.message.clone(),
            };
        });
    }

    fn replace(&self, snapshot: MigrationProgress) {
        self.tx.send_if_modified(|current| {
            if current.status.is_terminal() || snapshot.processed_files < current.processed_files {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

fn percentage(processed: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        processed as f64 / total as f64 * 100.0
    }
}

fn transfer_rate(bytes: u64, elapsed_ms: u64) -> f64 {
    if elapsed_ms == 0 {
        0.0
    } else {
        bytes as f64 / (elapsed_ms as f64 / 1000.0)
    }
}

fn estimate_remaining_ms(remaining_bytes: u64, rate: f64) -> Option<u64> {
    (rate > 0.0).then(|| (remaining_bytes as f64 / rate * 1000.0) as u64)
}
