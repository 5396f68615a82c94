//! Verification, orphan preview and cleanup against a target store.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use casmig_core::hash::{content_hash, storage_path};
use casmig_core::references::{
    CardRecord, DocumentVersionRecord, ImageRecord, ReferenceSource, StaticReferences,
};
use casmig_core::storage::{FileStorage, MemoryFileStorage};
use casmig_core::verify::{FileType, OperationStatus, RelationshipFilter, VerificationService};
use casmig_core::{MigrationError, Result};
use common::FaultyStorage;

/// Stores `content` under its sharded hash path and returns the hash.
fn put(storage: &MemoryFileStorage, content: &[u8]) -> String {
    let hash = content_hash(content);
    storage.insert(storage_path(&hash).unwrap(), content.to_vec());
    hash
}

struct BrokenReferences;

#[async_trait]
impl ReferenceSource for BrokenReferences {
    async fn document_versions(&self) -> Result<Vec<DocumentVersionRecord>> {
        Err(MigrationError::Database("connection refused".to_string()))
    }

    async fn images(&self) -> Result<Vec<ImageRecord>> {
        Ok(Vec::new())
    }

    async fn cards(&self) -> Result<Vec<CardRecord>> {
        Ok(Vec::new())
    }
}

/// Target holding H1, H2, H3 with only H1 referenced.
fn three_hash_fixture() -> (Arc<FaultyStorage>, [String; 3], VerificationService) {
    let target = FaultyStorage::new();
    let h1 = put(&target.inner, b"first");
    let h2 = put(&target.inner, b"second");
    let h3 = put(&target.inner, b"third");
    let target = Arc::new(target);
    let refs = StaticReferences::new().with_document(h1.clone());
    let service = VerificationService::new(target.clone(), Arc::new(refs));
    (target, [h1, h2, h3], service)
}

#[tokio::test]
async fn test_orphan_detection_scenario() {
    let (_target, [_h1, h2, h3], service) = three_hash_fixture();

    let result = service.verify_migration(false).await;
    assert_eq!(result.status, OperationStatus::Success);
    assert_eq!(result.summary.total_files_in_db, 1);
    assert_eq!(result.summary.files_verified, 1);
    assert_eq!(result.summary.files_only_in_storage, 2);
    assert!(result.summary.verification_success);

    let preview = service.get_orphaned_files_preview(100).await.unwrap();
    let paths: BTreeSet<String> = preview.iter().map(|o| o.file_path.clone()).collect();
    let expected: BTreeSet<String> = [storage_path(&h2).unwrap(), storage_path(&h3).unwrap()]
        .into_iter()
        .collect();
    assert_eq!(paths, expected);
    assert!(preview.iter().all(|o| o.hash == h2 || o.hash == h3));
    assert!(preview.iter().all(|o| o.size_bytes > 0));

    assert_eq!(service.get_orphaned_files_preview(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_files_are_reported() {
    let target = Arc::new(MemoryFileStorage::new());
    let present = put(&target, b"present");
    let absent = content_hash(b"absent");
    let refs = StaticReferences::new()
        .with_document(present)
        .with_document(absent.clone());
    let service = VerificationService::new(target, Arc::new(refs));

    let summary_only = service.verify_migration(false).await;
    assert_eq!(summary_only.status, OperationStatus::Partial);
    assert_eq!(summary_only.summary.files_missing, 1);
    assert!(summary_only.details.dms_files.missing.is_empty());

    let detailed = service.verify_migration(true).await;
    assert_eq!(detailed.details.dms_files.missing, vec![absent.clone()]);

    let missing = service.get_detailed_missing_files_list().await.unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].kind, "dms");
    assert_eq!(missing[0].identifier, absent);
}

#[tokio::test]
async fn test_legacy_source_is_cross_checked() {
    let legacy = Arc::new(MemoryFileStorage::new());
    let target = Arc::new(MemoryFileStorage::new());
    put(&legacy, b"moved");
    put(&target, b"moved");
    let lost = put(&legacy, b"lost");

    let service = VerificationService::new(target, Arc::new(StaticReferences::new()))
        .with_legacy_source(legacy);
    let result = service.verify_migration(true).await;

    assert_eq!(result.details.cas_files.total_in_db, 2);
    assert_eq!(result.details.cas_files.verified, 1);
    assert_eq!(result.details.cas_files.missing, vec![storage_path(&lost).unwrap()]);
    assert_eq!(result.status, OperationStatus::Partial);
}

#[tokio::test]
async fn test_reference_failure_is_error_status() {
    let service = VerificationService::new(
        Arc::new(MemoryFileStorage::new()),
        Arc::new(BrokenReferences),
    );
    let result = service.verify_migration(true).await;
    assert_eq!(result.status, OperationStatus::Error);
    assert!(result.errors[0].contains("connection refused"));

    let cleanup = service.cleanup_orphaned_files(false, false).await;
    assert_eq!(cleanup.status, OperationStatus::Error);
    assert_eq!(cleanup.summary.files_deleted, 0);
}

#[tokio::test]
async fn test_dry_run_never_deletes() {
    let (target, [_h1, h2, h3], service) = three_hash_fixture();

    let result = service.cleanup_orphaned_files(true, true).await;
    assert_eq!(result.status, OperationStatus::Success);
    assert!(result.summary.dry_run);
    assert_eq!(result.summary.total_orphaned_files, 2);
    assert_eq!(result.summary.files_deleted, 0);
    assert_eq!(result.summary.space_freed_bytes, 0);
    assert_eq!(result.summary.reclaimable_bytes, ("second".len() + "third".len()) as u64);
    assert_eq!(result.deleted_files.len(), 2);

    assert_eq!(target.delete_count(), 0);
    for hash in [h2, h3] {
        assert!(target.exists(&storage_path(&hash).unwrap()).await.unwrap());
    }
}

#[tokio::test]
async fn test_cleanup_deletes_orphans() {
    let (target, [h1, h2, h3], service) = three_hash_fixture();

    let result = service.cleanup_orphaned_files(false, false).await;
    assert_eq!(result.status, OperationStatus::Success);
    assert_eq!(result.summary.files_deleted, 2);
    assert_eq!(result.summary.space_freed_bytes, ("second".len() + "third".len()) as u64);
    assert!(result.deleted_files.is_empty());

    assert!(target.exists(&storage_path(&h1).unwrap()).await.unwrap());
    assert!(!target.exists(&storage_path(&h2).unwrap()).await.unwrap());
    assert!(!target.exists(&storage_path(&h3).unwrap()).await.unwrap());
}

#[tokio::test]
async fn test_cleanup_tolerates_failed_deletions() {
    let target = FaultyStorage::new();
    let keep = put(&target.inner, b"keep");
    let stuck = put(&target.inner, b"stuck");
    put(&target.inner, b"gone");
    let target = Arc::new(target.failing_delete(&storage_path(&stuck).unwrap()));
    let service = VerificationService::new(
        target.clone(),
        Arc::new(StaticReferences::new().with_document(keep)),
    );

    let result = service.cleanup_orphaned_files(false, true).await;
    assert_eq!(result.status, OperationStatus::Partial);
    assert_eq!(result.summary.total_orphaned_files, 2);
    assert_eq!(result.summary.files_deleted, 1);
    assert_eq!(result.summary.files_failed_to_delete, 1);
    assert_eq!(result.failed_deletions[0].file_path, storage_path(&stuck).unwrap());
    assert!(result.failed_deletions[0].error.starts_with("Deletion failed"));
    assert_eq!(result.deleted_files.len(), 1);
}

#[tokio::test]
async fn test_relationships_and_filters() {
    let target = Arc::new(MemoryFileStorage::new());
    let doc = put(&target, b"document body");
    let image = put(&target, b"not really an image");
    let thumb = put(&target, b"thumbnail bytes");
    let stray = put(&target, b"stray");
    target.insert("notes/readme.txt", b"loose file".to_vec());

    let refs = StaticReferences::new()
        .with_document(doc.clone())
        .with_image(ImageRecord {
            id: "1".into(),
            name: Some("diagram".into()),
            location: image.clone(),
            thumbnail_hash: Some(thumb.clone()),
            ..Default::default()
        })
        .with_card(CardRecord {
            id: "9".into(),
            title: Some("Card".into()),
            image_id: Some("1".into()),
            ..Default::default()
        });
    let service = VerificationService::new(target, Arc::new(refs));

    let report = service
        .get_file_relationship_report(100, RelationshipFilter::All)
        .await
        .unwrap();
    assert_eq!(report.summary.total_files, 5);
    assert_eq!(report.summary.orphaned_files, 2);
    assert_eq!(report.summary.used_files, 3);
    assert_eq!(report.summary.total_references, 4);

    let by_hash = |h: &str| report.relationships.iter().find(|r| r.hash == h).unwrap();
    assert_eq!(by_hash(&doc).file_type, FileType::Document);
    assert_eq!(by_hash(&image).file_type, FileType::Original);
    assert_eq!(by_hash(&image).used_by.len(), 2);
    assert_eq!(by_hash(&thumb).file_type, FileType::Thumbnail);
    assert_eq!(by_hash(&stray).file_type, FileType::Orphaned);
    assert!(by_hash(&stray).is_orphaned);
    assert_eq!(by_hash("unknown").file_path, "notes/readme.txt");

    let orphaned = service
        .get_file_relationship_report(100, RelationshipFilter::OnlyOrphaned)
        .await
        .unwrap();
    assert!(orphaned.relationships.iter().all(|r| r.is_orphaned));
    assert_eq!(orphaned.relationships.len(), 2);

    let used = service
        .get_file_relationship_report(2, RelationshipFilter::OnlyUsed)
        .await
        .unwrap();
    assert_eq!(used.relationships.len(), 2);
    assert!(used.relationships.iter().all(|r| !r.is_orphaned));

    assert_eq!(service.get_file_relationships(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_relationship_by_hash() {
    let (_target, [h1, h2, _h3], service) = three_hash_fixture();

    let used = service.get_file_relationship_by_hash(&h1).await.unwrap().unwrap();
    assert!(!used.is_orphaned);
    assert_eq!(used.used_by[0].table, "document_versions");

    let orphan = service.get_file_relationship_by_hash(&h2).await.unwrap().unwrap();
    assert!(orphan.is_orphaned);
    assert_eq!(orphan.size_bytes, "second".len() as u64);

    let nowhere = content_hash(b"never stored");
    assert!(service.get_file_relationship_by_hash(&nowhere).await.unwrap().is_none());
}

#[tokio::test]
async fn test_storage_listing() {
    let (_target, _hashes, service) = three_hash_fixture();
    let listing = service.list_storage_files("", 2, true).await.unwrap();
    assert_eq!(listing.total_files, 3);
    assert_eq!(listing.shown, 2);
    assert!(listing.files.iter().all(|f| f.size.is_some()));

    let bare = service.list_storage_files("", 10, false).await.unwrap();
    assert!(bare.files.iter().all(|f| f.size.is_none()));
}

#[cfg(feature = "images")]
mod derived {
    use super::*;
    use casmig_core::verify::{Derivation, FitToWidth};
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let buf = ImageBuffer::from_fn(width, height, |x, y| Rgb([(x * 3) as u8, (y * 5) as u8, 200]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(buf)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn test_regenerated_thumbnail_is_not_orphaned() {
        let target = Arc::new(MemoryFileStorage::new());
        let original = png(64, 32);
        let original_hash = put(&target, &original);
        let thumbnail = FitToWidth::new("thumbnail", 16).derive(&original).unwrap();
        let thumb_hash = put(&target, &thumbnail);

        // The image row does not record the thumbnail hash.
        let refs = Arc::new(StaticReferences::new().with_image(ImageRecord {
            id: "1".into(),
            location: format!("uploads/{original_hash}"),
            ..Default::default()
        }));

        let plain = VerificationService::new(target.clone(), refs.clone());
        assert_eq!(plain.verify_migration(false).await.summary.files_only_in_storage, 1);

        let service = VerificationService::new(target.clone(), refs)
            .with_derivation(Arc::new(FitToWidth::new("thumbnail", 16)));
        assert_eq!(service.verify_migration(false).await.summary.files_only_in_storage, 0);
        assert!(service.get_orphaned_files_preview(10).await.unwrap().is_empty());

        let derived = service
            .get_file_relationship_by_hash(&thumb_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(derived.file_type, FileType::Thumbnail);
        assert_eq!(derived.is_original_of.as_deref(), Some(original_hash.as_str()));
        assert!(!derived.is_orphaned);

        let original_info = service
            .get_file_relationship_by_hash(&original_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(original_info.file_type, FileType::Original);
        assert_eq!(original_info.derived_files.len(), 1);
        assert_eq!(original_info.derived_files[0].hash, thumb_hash);
    }
}
