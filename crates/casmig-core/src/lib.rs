pub mod config;
pub mod error;
pub mod hash;
pub mod migration;
pub mod references;
pub mod storage;
pub mod types;
pub mod verify;

// Re-export primary types for convenience
pub use config::MigrationConfig;
pub use error::{MigrationError, Result};
pub use migration::{MigrationRegistry, MigrationService};
pub use references::{ReferenceSource, SqliteReferences, StaticReferences};
pub use storage::{FileStorage, LocalFileStorage, MemoryFileStorage, StorageDescriptor};
pub use types::{MigrationFailure, MigrationProgress, MigrationResult, MigrationStatus, RunId};
pub use verify::{CleanupResult, OperationStatus, VerificationResult, VerificationService};

#[cfg(feature = "s3")]
pub use storage::S3FileStorage;

#[cfg(feature = "postgres")]
pub use references::PostgresReferences;
