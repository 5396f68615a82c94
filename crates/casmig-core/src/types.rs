use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of one migration run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn generate() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        RunId(s)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

/// Lifecycle of a run. The verification states belong to the verification
/// service and never appear on a transfer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    VerificationInProgress,
    VerificationCompleted,
    VerificationFailed,
}

impl MigrationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MigrationStatus::Completed
                | MigrationStatus::Failed
                | MigrationStatus::Cancelled
                | MigrationStatus::VerificationCompleted
                | MigrationStatus::VerificationFailed
        )
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationStatus::NotStarted => "NOT_STARTED",
            MigrationStatus::InProgress => "IN_PROGRESS",
            MigrationStatus::Completed => "COMPLETED",
            MigrationStatus::Failed => "FAILED",
            MigrationStatus::Cancelled => "CANCELLED",
            MigrationStatus::VerificationInProgress => "VERIFICATION_IN_PROGRESS",
            MigrationStatus::VerificationCompleted => "VERIFICATION_COMPLETED",
            MigrationStatus::VerificationFailed => "VERIFICATION_FAILED",
        };
        f.write_str(s)
    }
}

/// One file that could not be migrated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationFailure {
    pub file_path: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    /// Retries spent before giving up (attempts minus one).
    pub retry_count: u32,
}

/// Point-in-time view of a run. A new snapshot replaces the previous one on
/// every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProgress {
    pub status: MigrationStatus,
    pub processed_files: usize,
    pub total_files: usize,
    pub processed_size_bytes: u64,
    pub total_size_bytes: u64,
    pub current_file: Option<String>,
    /// File-count based, not byte weighted.
    pub percentage: f64,
    /// Milliseconds, from the byte transfer rate; `None` while the rate is 0.
    #[serde(rename = "estimatedTimeRemaining")]
    pub estimated_time_remaining_ms: Option<u64>,
    /// Bytes per second since the run started.
    pub transfer_rate: f64,
    pub start_time: DateTime<Utc>,
    pub message: String,
}

impl MigrationProgress {
    /// Snapshot of a run that has been registered but not started.
    pub fn not_started(start_time: DateTime<Utc>) -> Self {
        MigrationProgress {
            status: MigrationStatus::NotStarted,
            processed_files: 0,
            total_files: 0,
            processed_size_bytes: 0,
            total_size_bytes: 0,
            current_file: None,
            percentage: 0.0,
            estimated_time_remaining_ms: None,
            transfer_rate: 0.0,
            start_time,
            message: "Migration queued".to_string(),
        }
    }
}

/// Terminal outcome of a run; immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub status: MigrationStatus,
    pub total_files: usize,
    pub successful_files: usize,
    pub failed_files: usize,
    pub failed_file_details: Vec<MigrationFailure>,
    pub total_size_bytes: u64,
    pub transferred_size_bytes: u64,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub message: String,
}

impl MigrationResult {
    /// Result for a run that died before or outside per-file processing.
    pub fn orchestration_failure(start_time: DateTime<Utc>, error: &str) -> Self {
        let now = Utc::now();
        MigrationResult {
            status: MigrationStatus::Failed,
            total_files: 0,
            successful_files: 0,
            failed_files: 0,
            failed_file_details: vec![MigrationFailure {
                file_path: "N/A".to_string(),
                error: error.to_string(),
                timestamp: now,
                retry_count: 0,
            }],
            total_size_bytes: 0,
            transferred_size_bytes: 0,
            duration_ms: (now - start_time).num_milliseconds().max(0) as u64,
            start_time,
            end_time: Some(now),
            message: format!("Migration failed: {error}"),
        }
    }
}
