use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};

/// Tunables for one migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrationConfig {
    /// Files per chunk; chunks run one after another.
    pub batch_size: usize,
    /// Extra attempts after the first failed one.
    pub max_retries: u32,
    /// Compare source and target size after each copy.
    pub verify_after_migration: bool,
    /// Remove the source copy once the target holds a verified copy.
    pub delete_source_after_migration: bool,
    /// Concurrent transfers within a chunk.
    pub parallel_transfers: usize,
    pub timeout_per_file_ms: u64,
    /// Treat a file already present in the target as migrated.
    pub skip_existing_files: bool,
    /// Base of the linear backoff: attempt `n` waits `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            verify_after_migration: true,
            delete_source_after_migration: false,
            parallel_transfers: 5,
            timeout_per_file_ms: 300_000,
            skip_existing_files: true,
            retry_backoff_ms: 1_000,
        }
    }
}

impl MigrationConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(MigrationError::InvalidConfig(
                "batchSize must be at least 1".to_string(),
            ));
        }
        if self.parallel_transfers == 0 {
            return Err(MigrationError::InvalidConfig(
                "parallelTransfers must be at least 1".to_string(),
            ));
        }
        if self.timeout_per_file_ms == 0 {
            return Err(MigrationError::InvalidConfig(
                "timeoutPerFileMs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout_per_file(&self) -> Duration {
        Duration::from_millis(self.timeout_per_file_ms)
    }

    /// Delay before retry number `retry_count` (1-based).
    pub fn backoff(&self, retry_count: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(retry_count as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MigrationConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_retries, 3);
        assert!(config.verify_after_migration);
        assert!(!config.delete_source_after_migration);
        assert_eq!(config.parallel_transfers, 5);
        assert_eq!(config.timeout_per_file(), Duration::from_secs(300));
        assert!(config.skip_existing_files);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_linear_backoff() {
        let config = MigrationConfig::default();
        assert_eq!(config.backoff(1), Duration::from_millis(1000));
        assert_eq!(config.backoff(3), Duration::from_millis(3000));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MigrationConfig =
            serde_json::from_str(r#"{"parallelTransfers": 1, "skipExistingFiles": false}"#).unwrap();
        assert_eq!(config.parallel_transfers, 1);
        assert!(!config.skip_existing_files);
        assert_eq!(config.batch_size, 100);
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let config = MigrationConfig {
            parallel_transfers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
