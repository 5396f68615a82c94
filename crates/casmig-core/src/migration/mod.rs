//! Bulk migration of every file in a source storage into a target storage.
//!
//! A run is started in the background and returns its [`RunId`] at once.
//! Files are processed in chunks of `batch_size`; chunks run one after
//! another and up to `parallel_transfers` files of a chunk are in flight at
//! the same time. Progress is published as snapshots through the
//! [`MigrationRegistry`].

mod progress;
pub mod registry;
mod transfer;

pub use registry::MigrationRegistry;

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::MigrationConfig;
use crate::error::{MigrationError, Result};
use crate::storage::FileStorage;
use crate::types::{MigrationProgress, MigrationResult, MigrationStatus, RunId};
use progress::{ProgressPublisher, Totals};
use transfer::{RunContext, RunCounters};

/// Entry point for starting and managing migration runs.
#[derive(Clone, Default)]
pub struct MigrationService {
    registry: Arc<MigrationRegistry>,
}

impl MigrationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: Arc<MigrationRegistry>) -> Self {
        MigrationService { registry }
    }

    pub fn registry(&self) -> &Arc<MigrationRegistry> {
        &self.registry
    }

    /// Validate `config`, register a run and start it in the background.
    ///
    /// Must be called from within a Tokio runtime.
    #[tracing::instrument(skip_all, fields(source = source.kind(), target = target.kind()))]
    pub fn start_migration(
        &self,
        source: Arc<dyn FileStorage>,
        target: Arc<dyn FileStorage>,
        config: MigrationConfig,
    ) -> Result<RunId> {
        config.validate()?;

        let id = RunId::generate();
        let start_time = Utc::now();
        let (tx, rx) = watch::channel(MigrationProgress::not_started(start_time));
        let cancel = CancellationToken::new();
        self.registry.register(id.clone(), rx, cancel.clone());

        let ctx = Arc::new(RunContext {
            id: id.clone(),
            source,
            target,
            config,
            cancel,
            publisher: Arc::new(ProgressPublisher::new(tx, start_time)),
            counters: RunCounters::default(),
        });
        tracing::info!(run = %id, "migration started");
        tokio::spawn(supervise(self.registry.clone(), ctx));
        Ok(id)
    }

    pub fn get_migration_progress(&self, id: &RunId) -> Option<MigrationProgress> {
        self.registry.progress(id)
    }

    pub fn get_migration_result(&self, id: &RunId) -> Option<MigrationResult> {
        self.registry.result(id)
    }

    pub fn cancel_migration(&self, id: &RunId) -> bool {
        let cancelled = self.registry.cancel(id);
        if cancelled {
            tracing::info!(run = %id, "migration cancellation requested");
        }
        cancelled
    }

    pub fn get_migration_progress_stream(&self, id: &RunId) -> Option<WatchStream<MigrationProgress>> {
        self.registry.subscribe(id)
    }

    pub fn get_all_migrations(&self) -> Vec<(RunId, MigrationResult)> {
        self.registry.results()
    }

    pub fn cleanup_old_migrations(&self, older_than_days: u32) -> usize {
        self.registry.cleanup_old_migrations(older_than_days)
    }

    /// Wait until the run has finished and return its result.
    pub async fn wait_for_result(&self, id: &RunId) -> Result<MigrationResult> {
        let mut stream = self
            .registry
            .subscribe(id)
            .ok_or_else(|| MigrationError::RunNotFound { id: id.to_string() })?;
        while stream.next().await.is_some() {}
        self.registry
            .result(id)
            .ok_or_else(|| MigrationError::RunNotFound { id: id.to_string() })
    }
}

/// Run the migration in its own task so that a panic still ends in a
/// recorded FAILED result and a terminal snapshot.
async fn supervise(registry: Arc<MigrationRegistry>, ctx: Arc<RunContext>) {
    let id = ctx.id.clone();
    let publisher = ctx.publisher.clone();

    let result = match tokio::spawn(run(ctx.clone())).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::error!(run = %id, error = %e, "migration aborted");
            failure_result(&ctx, &e.to_string())
        }
        Err(e) => {
            tracing::error!(run = %id, error = %e, "migration task died");
            failure_result(&ctx, &format!("migration task failed: {e}"))
        }
    };

    tracing::info!(
        run = %id,
        status = %result.status,
        successful = result.successful_files,
        failed = result.failed_files,
        duration_ms = result.duration_ms,
        "migration finished"
    );
    registry.record_result(&id, result.clone());
    publisher.finish(&result);
}

async fn run(ctx: Arc<RunContext>) -> Result<MigrationResult> {
    let files = ctx.source.list("").await?;
    let mut sizes = Vec::with_capacity(files.len());
    for path in &files {
        sizes.push(ctx.source.size(path).await?.unwrap_or(0));
    }
    let totals = Totals {
        files: files.len(),
        bytes: sizes.iter().sum(),
    };
    tracing::info!(run = %ctx.id, files = totals.files, bytes = totals.bytes, "source enumerated");
    ctx.publisher.started(totals);

    let semaphore = Arc::new(Semaphore::new(ctx.config.parallel_transfers));
    let entries: Vec<(String, u64)> = files.into_iter().zip(sizes).collect();

    for (index, chunk) in entries.chunks(ctx.config.batch_size).enumerate() {
        if ctx.cancel.is_cancelled() {
            break;
        }
        tracing::debug!(run = %ctx.id, chunk = index, files = chunk.len(), "processing chunk");

        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::with_capacity(chunk.len());
        for (path, size) in chunk.iter().cloned() {
            let task_ctx = ctx.clone();
            let semaphore = semaphore.clone();
            let task_path = path.clone();
            let handle = tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if task_ctx.cancel.is_cancelled() {
                    return;
                }
                task_ctx.migrate_file(&task_path, size, totals).await;
            });
            in_flight.insert(handle.id(), (path, size));
        }
        while let Some(joined) = tasks.join_next().await {
            let Err(e) = joined else { continue };
            // One file's panic must not take the rest of the run with it.
            match in_flight.get(&e.id()) {
                Some((path, size)) if e.is_panic() => {
                    ctx.task_panicked(path, *size, totals, &panic_message(e.into_panic()));
                }
                _ => tracing::warn!(run = %ctx.id, error = %e, "transfer task did not finish"),
            }
        }
    }

    Ok(assemble_result(&ctx, totals))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "unknown panic payload".to_string(),
        },
    }
}

/// FAILED result for a run that could not finish. Once the source was
/// enumerated its totals and the per-file outcomes so far are kept.
fn failure_result(ctx: &RunContext, error: &str) -> MigrationResult {
    let mut result = MigrationResult::orchestration_failure(ctx.publisher.start_time(), error);
    let Some(totals) = ctx.publisher.totals() else {
        return result;
    };
    let mut failures = ctx.counters.take_failures();
    result.total_files = totals.files;
    result.total_size_bytes = totals.bytes;
    result.successful_files = ctx.counters.successful_files.load(Ordering::SeqCst);
    result.transferred_size_bytes = ctx.counters.transferred_bytes.load(Ordering::SeqCst);
    result.failed_files = failures.len();
    failures.append(&mut result.failed_file_details);
    result.failed_file_details = failures;
    result
}

fn assemble_result(ctx: &RunContext, totals: Totals) -> MigrationResult {
    let end_time = Utc::now();
    let start_time = ctx.publisher.start_time();
    let failed_file_details = ctx.counters.take_failures();
    let successful_files = ctx.counters.successful_files.load(Ordering::SeqCst);
    let failed_files = failed_file_details.len();
    let processed = ctx.counters.processed_files.load(Ordering::SeqCst);

    let (status, message) = if ctx.cancel.is_cancelled() {
        (
            MigrationStatus::Cancelled,
            format!("Migration cancelled after {processed} of {} files", totals.files),
        )
    } else if failed_files == 0 {
        (
            MigrationStatus::Completed,
            "Migration completed successfully".to_string(),
        )
    } else {
        (
            MigrationStatus::Failed,
            format!("Migration completed with {failed_files} failures"),
        )
    };

    MigrationResult {
        status,
        total_files: totals.files,
        successful_files,
        failed_files,
        failed_file_details,
        total_size_bytes: totals.bytes,
        transferred_size_bytes: ctx.counters.transferred_bytes.load(Ordering::SeqCst),
        duration_ms: (end_time - start_time).num_milliseconds().max(0) as u64,
        start_time,
        end_time: Some(end_time),
        message,
    }
}
