//! Implementations of the subcommands.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use casmig_core::verify::RelationshipFilter;
use casmig_core::{
    FileStorage, MigrationService, MigrationStatus, OperationStatus, ReferenceSource, RunId,
    SqliteReferences, StaticReferences, StorageDescriptor, VerificationResult, VerificationService,
};
use tokio_stream::StreamExt;

use crate::cli::{MigrateOptions, StoreArgs};
use crate::format;
use crate::state::{RunRecord, StateDir};

/// Minimum gap between two rewrites of a run record while progress streams.
const RECORD_SAVE_INTERVAL: Duration = Duration::from_secs(1);

pub async fn open_store(descriptor: &str) -> anyhow::Result<Arc<dyn FileStorage>> {
    let descriptor: StorageDescriptor = descriptor.parse()?;
    let store = descriptor
        .open()
        .await
        .with_context(|| format!("opening {descriptor}"))?;
    Ok(store)
}

/// SQLite path, or a postgres URL when built with the `postgres` feature.
pub async fn open_references(location: &str) -> anyhow::Result<Arc<dyn ReferenceSource>> {
    if location.starts_with("postgres://") || location.starts_with("postgresql://") {
        #[cfg(feature = "postgres")]
        {
            let refs = casmig_core::PostgresReferences::connect(location).await?;
            return Ok(Arc::new(refs));
        }
        #[cfg(not(feature = "postgres"))]
        bail!("postgres reference databases need the `postgres` feature");
    }
    let refs = SqliteReferences::open(location)
        .await
        .with_context(|| format!("opening reference database {location}"))?;
    Ok(Arc::new(refs))
}

/// Build a verification service, or `None` when no target or reference
/// database is configured.
pub async fn verification_service(store: &StoreArgs) -> anyhow::Result<Option<VerificationService>> {
    let (Some(target), Some(references)) = (&store.target, &store.references) else {
        return Ok(None);
    };
    let mut service = VerificationService::new(
        open_store(target).await?,
        open_references(references).await?,
    );
    if let Some(legacy) = &store.legacy_source {
        service = service.with_legacy_source(open_store(legacy).await?);
    }
    #[cfg(feature = "images")]
    {
        service = service.with_image_derivations();
    }
    Ok(Some(service))
}

async fn require_verification(store: &StoreArgs) -> anyhow::Result<VerificationService> {
    verification_service(store).await?.context(
        "a target (--target / CASMIG_TARGET) and a reference database \
         (--references / CASMIG_REFERENCES) are required",
    )
}

async fn persist(state: &StateDir, record: &RunRecord) {
    if let Err(e) = state.save(record).await {
        tracing::warn!(run_id = %record.run_id, "could not save run record: {e:#}");
    }
}

pub async fn migrate(
    state: &StateDir,
    source: &str,
    target: &str,
    options: &MigrateOptions,
) -> anyhow::Result<()> {
    let source: StorageDescriptor = source.parse()?;
    let target: StorageDescriptor = target.parse()?;
    let config = options.to_config();

    println!("Starting migration...");
    println!("Source: {source}");
    println!("Target: {target}");

    let service = MigrationService::new();
    let id = service.start_migration(source.open().await?, target.open().await?, config.clone())?;
    println!("Migration started with ID: {id}");

    let mut record = RunRecord::new(id.clone(), source.to_string(), target.to_string(), config);
    persist(state, &record).await;

    let mut stream = service
        .get_migration_progress_stream(&id)
        .context("run disappeared from the registry")?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut last_saved = Instant::now();

    loop {
        tokio::select! {
            snapshot = stream.next() => {
                let Some(snapshot) = snapshot else { break };
                println!("{}", format::progress_lines(&snapshot));
                let terminal = snapshot.status.is_terminal();
                if terminal {
                    println!("Migration {}: {}", snapshot.status, snapshot.message);
                }
                record.progress = Some(snapshot);
                if terminal || last_saved.elapsed() >= RECORD_SAVE_INTERVAL {
                    persist(state, &record).await;
                    last_saved = Instant::now();
                }
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                eprintln!("Interrupted, cancelling migration {id}");
                service.cancel_migration(&id);
            }
        }
    }

    let result = service.wait_for_result(&id).await?;
    record.result = Some(result.clone());
    persist(state, &record).await;

    println!();
    println!("{}", format::result_report(&result));
    if result.status != MigrationStatus::Completed {
        bail!("migration {id} ended with status {}", result.status);
    }
    Ok(())
}

pub async fn status(service: &MigrationService, state: &StateDir, id: &str) -> anyhow::Result<()> {
    let id = RunId::from(id);
    if let Some(progress) = service.get_migration_progress(&id) {
        println!("{}", format::status_report(&progress));
        return Ok(());
    }
    match state.load(&id).await? {
        Some(RunRecord {
            result: Some(result),
            ..
        }) => println!("{}", format::completed_report(&result)),
        Some(RunRecord {
            progress: Some(progress),
            ..
        }) => println!("{}", format::status_report(&progress)),
        _ => bail!("Migration not found: {id}"),
    }
    Ok(())
}

fn print_verification(result: &VerificationResult) {
    let summary = &result.summary;
    println!("Status: {:?}", result.status);
    println!("Referenced files: {}", summary.total_files_in_db);
    println!("Verified: {}", summary.files_verified);
    println!("Missing: {}", summary.files_missing);
    println!("Only in storage: {}", summary.files_only_in_storage);
    let categories = [
        ("images", &result.details.image_files),
        ("documents", &result.details.dms_files),
        ("legacy store", &result.details.cas_files),
    ];
    for (name, category) in categories {
        if category.total_in_db == 0 {
            continue;
        }
        println!(
            "  {name}: {}/{} present, {} missing",
            category.verified, category.total_in_db, category.missing_count
        );
        for missing in &category.missing {
            println!("    missing: {missing}");
        }
    }
    for error in &result.errors {
        println!("Error: {error}");
    }
}

pub async fn verify(store: &StoreArgs, details: bool) -> anyhow::Result<()> {
    let service = require_verification(store).await?;
    let result = service.verify_migration(details).await;
    print_verification(&result);
    if result.status == OperationStatus::Error {
        bail!("verification failed");
    }
    Ok(())
}

pub async fn orphans(store: &StoreArgs, limit: usize) -> anyhow::Result<()> {
    let service = require_verification(store).await?;
    let preview = service.get_orphaned_files_preview(limit).await?;
    for orphan in &preview {
        println!(
            "{}\t{}\t{}",
            orphan.file_path,
            format::format_bytes(orphan.size_bytes),
            orphan.hash
        );
    }
    println!("{} orphaned files shown (limit {limit})", preview.len());
    Ok(())
}

pub async fn cleanup(
    store: &StoreArgs,
    execute: bool,
    confirmed: bool,
    details: bool,
) -> anyhow::Result<()> {
    if execute && !confirmed {
        bail!("refusing to delete files without --yes");
    }
    let service = require_verification(store).await?;
    let result = service.cleanup_orphaned_files(!execute, details).await;
    let summary = &result.summary;

    if summary.dry_run {
        println!(
            "Dry run: {} orphaned files, {} reclaimable",
            summary.total_orphaned_files,
            format::format_bytes(summary.reclaimable_bytes)
        );
    } else {
        println!(
            "Deleted {}/{} orphaned files, {} freed",
            summary.files_deleted,
            summary.total_orphaned_files,
            format::format_bytes(summary.space_freed_bytes)
        );
    }
    for path in &result.deleted_files {
        println!("  {path}");
    }
    for failure in &result.failed_deletions {
        println!("  failed: {}: {}", failure.file_path, failure.error);
    }
    for error in &result.errors {
        println!("Error: {error}");
    }

    match result.status {
        OperationStatus::Success => Ok(()),
        OperationStatus::Partial => bail!(
            "{} files could not be deleted",
            summary.files_failed_to_delete
        ),
        OperationStatus::Error => bail!("cleanup failed"),
    }
}

pub async fn relationships(
    store: &StoreArgs,
    hash: Option<&str>,
    limit: usize,
    filter: RelationshipFilter,
) -> anyhow::Result<()> {
    let service = require_verification(store).await?;
    if let Some(hash) = hash {
        match service.get_file_relationship_by_hash(hash).await? {
            Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
            None => bail!("no stored or referenced file with hash {hash}"),
        }
        return Ok(());
    }
    let report = service.get_file_relationship_report(limit, filter).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Listing goes through the same service call as `GET /api/storage/files`;
/// references are not needed for it.
pub async fn ls(store: &StoreArgs, prefix: &str, limit: usize, size: bool) -> anyhow::Result<()> {
    let target = store
        .target
        .as_deref()
        .context("a target (--target / CASMIG_TARGET) is required")?;
    let service = VerificationService::new(
        open_store(target).await?,
        Arc::new(StaticReferences::new()),
    );
    let listing = service.list_storage_files(prefix, limit, size).await?;
    println!("{}", format::storage_listing(&listing));
    Ok(())
}
