use std::net::SocketAddr;
use std::path::PathBuf;

use casmig_core::MigrationConfig;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "Migrate, verify and clean content-addressed file stores", long_about = None)]
pub struct Cli {
    /// Directory for run records read by `status`
    #[arg(long, global = true, env = "CASMIG_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Copy every file of SOURCE into TARGET
    ///
    /// Descriptors: local:<path>, objectstore:<bucket>:<region> (or s3:...), memory:
    Migrate {
        source: String,
        target: String,

        #[command(flatten)]
        options: MigrateOptions,
    },

    /// Show progress or result of a run
    Status { migration_id: String },

    /// Check that every referenced file exists in the target
    Verify {
        #[command(flatten)]
        store: StoreArgs,

        /// List missing files per category
        #[arg(long)]
        details: bool,
    },

    /// Preview files in the target that nothing references
    Orphans {
        #[command(flatten)]
        store: StoreArgs,

        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Delete orphaned files (dry run unless --execute --yes)
    Cleanup {
        #[command(flatten)]
        store: StoreArgs,

        /// Actually delete files
        #[arg(long)]
        execute: bool,

        /// Confirm deletion; required with --execute
        #[arg(long)]
        yes: bool,

        /// List every deleted or reclaimable file
        #[arg(long)]
        details: bool,
    },

    /// Show which records use which stored files
    Relationships {
        #[command(flatten)]
        store: StoreArgs,

        /// Look up a single content hash
        #[arg(long)]
        hash: Option<String>,

        #[arg(long, default_value_t = 1000)]
        limit: usize,

        #[arg(long, conflicts_with = "only_used")]
        only_orphaned: bool,

        #[arg(long)]
        only_used: bool,
    },

    /// List raw paths in the target
    Ls {
        #[command(flatten)]
        store: StoreArgs,

        #[arg(long, default_value = "")]
        prefix: String,

        #[arg(long, default_value_t = 1000)]
        limit: usize,

        /// Include file sizes
        #[arg(long)]
        size: bool,
    },

    /// Serve the management HTTP API
    Serve {
        #[arg(long, env = "CASMIG_LISTEN", default_value = "127.0.0.1:8080")]
        listen: SocketAddr,

        #[command(flatten)]
        store: StoreArgs,
    },
}

/// Tunables of `migrate`; unset flags keep the engine defaults.
#[derive(Args, Debug, Clone)]
pub struct MigrateOptions {
    /// Files per chunk
    #[arg(long, default_value_t = 100)]
    pub batch_size: usize,

    /// Retries per file after the first attempt
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Concurrent transfers within a chunk
    #[arg(long, default_value_t = 5)]
    pub parallel: usize,

    #[arg(long, default_value_t = 300_000)]
    pub timeout_ms: u64,

    /// Linear backoff base between retries
    #[arg(long, default_value_t = 1_000)]
    pub retry_backoff_ms: u64,

    /// Skip the post-copy size comparison
    #[arg(long)]
    pub no_verify: bool,

    /// Remove source files once copied
    #[arg(long)]
    pub delete_source: bool,

    /// Copy files even when the target already has them
    #[arg(long)]
    pub no_skip_existing: bool,
}

impl MigrateOptions {
    pub fn to_config(&self) -> MigrationConfig {
        MigrationConfig {
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            verify_after_migration: !self.no_verify,
            delete_source_after_migration: self.delete_source,
            parallel_transfers: self.parallel,
            timeout_per_file_ms: self.timeout_ms,
            skip_existing_files: !self.no_skip_existing,
            retry_backoff_ms: self.retry_backoff_ms,
        }
    }
}

/// Target store and reference database used by verification commands.
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Target storage descriptor
    #[arg(long, env = "CASMIG_TARGET")]
    pub target: Option<String>,

    /// Reference database: SQLite path, or postgres:// URL with the `postgres` feature
    #[arg(long, env = "CASMIG_REFERENCES")]
    pub references: Option<String>,

    /// Store migrated from; its files are reported as `casFiles`
    #[arg(long)]
    pub legacy_source: Option<String>,
}
