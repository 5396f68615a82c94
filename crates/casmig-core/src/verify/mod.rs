//! Post-migration verification and orphan cleanup against a target store.
//!
//! Every call loads the reference records once, lists the target once and,
//! when derivations are configured, regenerates derived files once.

pub mod derive;
mod model;

pub use derive::{Derivation, DerivedIndex, DerivedOrigin};
#[cfg(feature = "images")]
pub use derive::FitToWidth;
pub use model::*;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::hash::{hash_from_location, hash_from_storage_path, storage_path};
use crate::references::{
    DatabaseReference, ReferenceSnapshot, ReferenceSource, CARD_TABLE, DOCUMENT_TABLE, IMAGE_TABLE,
};
use crate::storage::FileStorage;

/// Cross-checks reference records against a target store.
pub struct VerificationService {
    target: Arc<dyn FileStorage>,
    references: Arc<dyn ReferenceSource>,
    legacy_source: Option<Arc<dyn FileStorage>>,
    derivations: Vec<Arc<dyn Derivation>>,
}

impl VerificationService {
    pub fn new(target: Arc<dyn FileStorage>, references: Arc<dyn ReferenceSource>) -> Self {
        VerificationService {
            target,
            references,
            legacy_source: None,
            derivations: Vec::new(),
        }
    }

    /// Also check that every file of the store migrated from exists in the
    /// target (reported as `casFiles`).
    pub fn with_legacy_source(mut self, source: Arc<dyn FileStorage>) -> Self {
        self.legacy_source = Some(source);
        self
    }

    pub fn with_derivation(mut self, derivation: Arc<dyn Derivation>) -> Self {
        self.derivations.push(derivation);
        self
    }

    /// Thumbnail (200px) and resized (800px) JPEG derivations.
    #[cfg(feature = "images")]
    pub fn with_image_derivations(self) -> Self {
        self.with_derivation(Arc::new(FitToWidth::thumbnail()))
            .with_derivation(Arc::new(FitToWidth::resized()))
    }

    pub fn target(&self) -> &Arc<dyn FileStorage> {
        &self.target
    }

    /// Count referenced files present and missing in the target, plus
    /// files in the target referenced by nothing. Never fails: errors end up
    /// in an `error` result.
    #[tracing::instrument(skip(self))]
    pub async fn verify_migration(&self, include_details: bool) -> VerificationResult {
        match self.try_verify(include_details).await {
            Ok(result) => {
                tracing::info!(
                    status = ?result.status,
                    referenced = result.summary.total_files_in_db,
                    missing = result.summary.files_missing,
                    orphaned = result.summary.files_only_in_storage,
                    "verification finished"
                );
                result
            }
            Err(e) => {
                tracing::error!(error = %e, "verification failed");
                VerificationResult::error(format!("Verification failed: {e}"))
            }
        }
    }

    async fn try_verify(&self, include_details: bool) -> Result<VerificationResult> {
        let snapshot = ReferenceSnapshot::load(self.references.as_ref()).await?;

        let mut image_files = FileTypeVerification::default();
        for identifier in snapshot.image_identifiers() {
            let present = match hash_from_location(&identifier) {
                Some(hash) => self.target.exists(&storage_path(hash)?).await?,
                None => false,
            };
            image_files.record(identifier, present, include_details);
        }

        let mut dms_files = FileTypeVerification::default();
        for hash in snapshot.document_hashes() {
            let present = match storage_path(&hash) {
                Ok(path) => self.target.exists(&path).await?,
                Err(_) => false,
            };
            dms_files.record(hash, present, include_details);
        }

        let mut cas_files = FileTypeVerification::default();
        if let Some(legacy) = &self.legacy_source {
            for path in legacy.list("").await? {
                let present = self.target.exists(&path).await?;
                cas_files.record(path, present, include_details);
            }
        }

        let orphans = self.orphan_paths(&snapshot).await?;
        let categories = [&image_files, &dms_files, &cas_files];
        let files_missing: usize = categories.iter().map(|c| c.missing_count).sum();
        let summary = VerificationSummary {
            total_files_in_db: categories.iter().map(|c| c.total_in_db).sum(),
            files_verified: categories.iter().map(|c| c.verified).sum(),
            files_missing,
            files_only_in_storage: orphans.len(),
            verification_success: files_missing == 0,
        };

        Ok(VerificationResult {
            status: if summary.verification_success {
                OperationStatus::Success
            } else {
                OperationStatus::Partial
            },
            summary,
            details: VerificationDetails {
                image_files,
                dms_files,
                cas_files,
            },
            errors: Vec::new(),
        })
    }

    /// Every referenced file missing from the target.
    pub async fn get_detailed_missing_files_list(&self) -> Result<Vec<MissingFileInfo>> {
        let result = self.try_verify(true).await?;
        let details = result.details;
        let sources = [
            ("image", IMAGE_TABLE, details.image_files.missing),
            ("dms", "document_versions.hash", details.dms_files.missing),
            ("cas", "legacy store", details.cas_files.missing),
        ];
        Ok(sources
            .into_iter()
            .flat_map(|(kind, source, missing)| {
                missing.into_iter().map(move |identifier| MissingFileInfo {
                    kind: kind.to_string(),
                    identifier,
                    source: source.to_string(),
                })
            })
            .collect())
    }

    /// Up to `limit` orphaned files. Read-only.
    #[tracing::instrument(skip(self))]
    pub async fn get_orphaned_files_preview(&self, limit: usize) -> Result<Vec<OrphanedFileInfo>> {
        let snapshot = ReferenceSnapshot::load(self.references.as_ref()).await?;
        let orphans = self.orphan_paths(&snapshot).await?;
        let mut preview = Vec::new();
        for path in orphans.into_iter().take(limit) {
            let size_bytes = self.size_or_zero(&path).await;
            preview.push(OrphanedFileInfo {
                hash: hash_from_storage_path(&path).unwrap_or("unknown").to_string(),
                file_path: path,
                size_bytes,
            });
        }
        Ok(preview)
    }

    /// Delete every orphaned file, or with `dry_run` only report what would
    /// be deleted. Individual deletion failures do not stop the batch.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_orphaned_files(&self, dry_run: bool, include_details: bool) -> CleanupResult {
        let orphans = match ReferenceSnapshot::load(self.references.as_ref()).await {
            Ok(snapshot) => self.orphan_paths(&snapshot).await,
            Err(e) => Err(e),
        };
        let orphans = match orphans {
            Ok(orphans) => orphans,
            Err(e) => {
                tracing::error!(error = %e, "cannot compute orphaned files");
                return CleanupResult::error(dry_run, format!("Cleanup operation failed: {e}"));
            }
        };

        let mut listed = Vec::new();
        let mut failed_deletions = Vec::new();
        let mut deleted = 0usize;
        let mut reclaimable_bytes = 0u64;
        let mut space_freed_bytes = 0u64;

        for path in &orphans {
            let size = self.size_or_zero(path).await;
            reclaimable_bytes += size;
            if dry_run {
                if include_details {
                    listed.push(path.clone());
                }
                continue;
            }

            let outcome = match self.target.delete(path).await {
                Err(e) => Err(format!("Deletion failed: {e}")),
                Ok(()) => match self.target.exists(path).await {
                    Ok(false) => Ok(()),
                    Ok(true) => Err("File still exists after deletion attempt".to_string()),
                    Err(e) => Err(format!("Could not confirm deletion: {e}")),
                },
            };
            match outcome {
                Ok(()) => {
                    tracing::info!(path = %path, bytes = size, "deleted orphaned file");
                    deleted += 1;
                    space_freed_bytes += size;
                    if include_details {
                        listed.push(path.clone());
                    }
                }
                Err(error) => {
                    tracing::warn!(path = %path, %error, "orphan deletion failed");
                    failed_deletions.push(CleanupFailure {
                        file_path: path.clone(),
                        error,
                    });
                }
            }
        }

        CleanupResult {
            status: if failed_deletions.is_empty() {
                OperationStatus::Success
            } else {
                OperationStatus::Partial
            },
            summary: CleanupSummary {
                total_orphaned_files: orphans.len(),
                files_deleted: deleted,
                files_failed_to_delete: failed_deletions.len(),
                space_freed_bytes,
                reclaimable_bytes,
                dry_run,
            },
            deleted_files: listed,
            failed_deletions,
            errors: Vec::new(),
        }
    }

    /// Relationships of the first `limit` files in the target.
    pub async fn get_file_relationships(&self, limit: usize) -> Result<Vec<FileRelationshipInfo>> {
        Ok(self
            .get_file_relationship_report(limit, RelationshipFilter::All)
            .await?
            .relationships)
    }

    /// Relationships of up to `limit` target files matching `filter`, with
    /// a summary over the returned files.
    #[tracing::instrument(skip(self))]
    pub async fn get_file_relationship_report(
        &self,
        limit: usize,
        filter: RelationshipFilter,
    ) -> Result<RelationshipReport> {
        let snapshot = ReferenceSnapshot::load(self.references.as_ref()).await?;
        let by_hash = references_by_hash(&snapshot);
        let index = DerivedIndex::build(
            self.target.as_ref(),
            &snapshot.original_image_hashes(),
            &self.derivations,
        )
        .await?;

        let mut files = self.target.list("").await?;
        files.sort();

        let mut relationships = Vec::new();
        for path in files {
            if relationships.len() >= limit {
                break;
            }
            let hash = hash_from_storage_path(&path).unwrap_or("unknown").to_string();
            let used_by = by_hash.get(&hash).cloned().unwrap_or_default();
            let info = self.relationship(path, hash, used_by, &index).await?;
            if filter.accepts(&info) {
                relationships.push(info);
            }
        }
        Ok(RelationshipReport::new(relationships))
    }

    /// Relationship of the file stored under `hash`, or `None` when it is
    /// neither stored nor referenced.
    pub async fn get_file_relationship_by_hash(&self, hash: &str) -> Result<Option<FileRelationshipInfo>> {
        let path = storage_path(hash)?;
        let snapshot = ReferenceSnapshot::load(self.references.as_ref()).await?;
        let used_by = references_by_hash(&snapshot).remove(hash).unwrap_or_default();
        if used_by.is_empty() && !self.target.exists(&path).await? {
            return Ok(None);
        }
        let index = DerivedIndex::build(
            self.target.as_ref(),
            &snapshot.original_image_hashes(),
            &self.derivations,
        )
        .await?;
        Ok(Some(self.relationship(path, hash.to_string(), used_by, &index).await?))
    }

    /// Raw listing of the target.
    pub async fn list_storage_files(
        &self,
        prefix: &str,
        limit: usize,
        include_size: bool,
    ) -> Result<StorageListing> {
        let all = self.target.list(prefix).await?;
        let mut files = Vec::new();
        for path in all.iter().take(limit) {
            let size = if include_size {
                Some(self.size_or_zero(path).await)
            } else {
                None
            };
            files.push(StorageFileEntry {
                path: path.clone(),
                size,
            });
        }
        Ok(StorageListing {
            shown: files.len(),
            files,
            total_files: all.len(),
            limit,
        })
    }

    /// Target files that no reference reaches and that are not derived from
    /// a referenced original. Sorted.
    async fn orphan_paths(&self, snapshot: &ReferenceSnapshot) -> Result<Vec<String>> {
        let referenced = snapshot.referenced_paths();
        let mut candidates: Vec<String> = self
            .target
            .list("")
            .await?
            .into_iter()
            .filter(|path| !referenced.contains(path))
            .collect();
        candidates.sort();

        if candidates.is_empty() || self.derivations.is_empty() {
            return Ok(candidates);
        }
        let index = DerivedIndex::build(
            self.target.as_ref(),
            &snapshot.original_image_hashes(),
            &self.derivations,
        )
        .await?;
        candidates.retain(|path| {
            hash_from_storage_path(path).map_or(true, |hash| index.origin_of(hash).is_none())
        });
        Ok(candidates)
    }

    async fn relationship(
        &self,
        path: String,
        hash: String,
        used_by: Vec<DatabaseReference>,
        index: &DerivedIndex,
    ) -> Result<FileRelationshipInfo> {
        let size_bytes = self.size_or_zero(&path).await;
        let mut derived_files = Vec::new();
        let mut is_original_of = None;

        let file_type = if !used_by.is_empty() {
            let file_type = classify_referenced(&used_by);
            if file_type == FileType::Original {
                for (derived_hash, kind) in index.derived_from(&hash) {
                    let derived_path = storage_path(derived_hash)?;
                    if self.target.exists(&derived_path).await? {
                        derived_files.push(DerivedFileInfo {
                            hash: derived_hash.to_string(),
                            size_bytes: self.size_or_zero(&derived_path).await,
                            file_path: derived_path,
                            kind: kind.to_string(),
                        });
                    }
                }
                derived_files.sort_by(|a, b| a.file_path.cmp(&b.file_path));
            }
            file_type
        } else if let Some(origin) = index.origin_of(&hash) {
            is_original_of = Some(origin.original_hash.clone());
            FileType::from_derivation_kind(&origin.kind)
        } else {
            FileType::Orphaned
        };

        Ok(FileRelationshipInfo {
            is_orphaned: used_by.is_empty() && is_original_of.is_none(),
            file_path: path,
            hash,
            size_bytes,
            used_by,
            derived_files,
            is_original_of,
            file_type,
        })
    }

    async fn size_or_zero(&self, path: &str) -> u64 {
        match self.target.size(path).await {
            Ok(size) => size.unwrap_or(0),
            Err(e) => {
                tracing::warn!(path, error = %e, "cannot read file size");
                0
            }
        }
    }
}

fn references_by_hash(snapshot: &ReferenceSnapshot) -> HashMap<String, Vec<DatabaseReference>> {
    let mut by_hash: HashMap<String, Vec<DatabaseReference>> = HashMap::new();
    for file_ref in snapshot.file_references() {
        by_hash.entry(file_ref.hash).or_default().push(file_ref.reference);
    }
    by_hash
}

fn classify_referenced(used_by: &[DatabaseReference]) -> FileType {
    let has = |table: &str, field: Option<&str>| {
        used_by
            .iter()
            .any(|r| r.table == table && field.map_or(true, |f| r.field == f))
    };
    if has(IMAGE_TABLE, Some("location")) || has(CARD_TABLE, None) {
        FileType::Original
    } else if has(IMAGE_TABLE, Some("thumbnail_hash")) {
        FileType::Thumbnail
    } else if has(IMAGE_TABLE, Some("resized_hash")) {
        FileType::Resized
    } else if has(DOCUMENT_TABLE, None) {
        FileType::Document
    } else {
        FileType::Unknown
    }
}
