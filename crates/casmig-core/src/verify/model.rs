use serde::{Deserialize, Serialize};

use crate::references::DatabaseReference;

/// Outcome of a verification or cleanup call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Partial,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub status: OperationStatus,
    pub summary: VerificationSummary,
    pub details: VerificationDetails,
    pub errors: Vec<String>,
}

impl VerificationResult {
    pub fn error(message: String) -> Self {
        VerificationResult {
            status: OperationStatus::Error,
            summary: VerificationSummary::default(),
            details: VerificationDetails::default(),
            errors: vec![message],
        }
    }
}

// Field names on the wire predate object storage being one of several
// possible targets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSummary {
    pub total_files_in_db: usize,
    #[serde(rename = "filesVerifiedInS3")]
    pub files_verified: usize,
    #[serde(rename = "filesMissingInS3")]
    pub files_missing: usize,
    #[serde(rename = "filesOnlyInS3")]
    pub files_only_in_storage: usize,
    pub verification_success: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationDetails {
    pub image_files: FileTypeVerification,
    pub dms_files: FileTypeVerification,
    pub cas_files: FileTypeVerification,
}

/// Per-category counts. `missing` is only filled when details were asked for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTypeVerification {
    pub total_in_db: usize,
    #[serde(rename = "verifiedInS3")]
    pub verified: usize,
    pub missing_count: usize,
    #[serde(rename = "missingInS3")]
    pub missing: Vec<String>,
}

impl FileTypeVerification {
    pub(crate) fn record(&mut self, identifier: String, present: bool, include_details: bool) {
        self.total_in_db += 1;
        if present {
            self.verified += 1;
        } else {
            self.missing_count += 1;
            if include_details {
                self.missing.push(identifier);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingFileInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub identifier: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanedFileInfo {
    pub file_path: String,
    pub size_bytes: u64,
    /// `"unknown"` when the path does not end in a content hash.
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub status: OperationStatus,
    pub summary: CleanupSummary,
    /// Deleted paths, or on a dry run the paths that would be deleted.
    /// Empty unless details were asked for.
    pub deleted_files: Vec<String>,
    pub failed_deletions: Vec<CleanupFailure>,
    pub errors: Vec<String>,
}

impl CleanupResult {
    pub fn error(dry_run: bool, message: String) -> Self {
        CleanupResult {
            status: OperationStatus::Error,
            summary: CleanupSummary {
                dry_run,
                ..Default::default()
            },
            deleted_files: Vec::new(),
            failed_deletions: Vec::new(),
            errors: vec![message],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub total_orphaned_files: usize,
    /// Always 0 on a dry run.
    pub files_deleted: usize,
    pub files_failed_to_delete: usize,
    /// Always 0 on a dry run.
    pub space_freed_bytes: u64,
    /// Combined size of all orphaned files.
    pub reclaimable_bytes: u64,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupFailure {
    pub file_path: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Original,
    Thumbnail,
    Resized,
    Document,
    Derived,
    Unknown,
    Orphaned,
}

impl FileType {
    pub fn from_derivation_kind(kind: &str) -> Self {
        match kind {
            "thumbnail" => FileType::Thumbnail,
            "resized" => FileType::Resized,
            _ => FileType::Derived,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedFileInfo {
    pub hash: String,
    pub file_path: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRelationshipInfo {
    pub file_path: String,
    pub hash: String,
    pub size_bytes: u64,
    pub used_by: Vec<DatabaseReference>,
    pub derived_files: Vec<DerivedFileInfo>,
    /// Hash of the original when this file is a regenerated derivative.
    pub is_original_of: Option<String>,
    pub file_type: FileType,
    pub is_orphaned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelationshipFilter {
    #[default]
    All,
    OnlyOrphaned,
    OnlyUsed,
}

impl RelationshipFilter {
    /// `only_orphaned` wins when both flags are set.
    pub fn from_flags(only_orphaned: bool, only_used: bool) -> Self {
        match (only_orphaned, only_used) {
            (true, _) => RelationshipFilter::OnlyOrphaned,
            (false, true) => RelationshipFilter::OnlyUsed,
            _ => RelationshipFilter::All,
        }
    }

    pub fn accepts(self, info: &FileRelationshipInfo) -> bool {
        match self {
            RelationshipFilter::All => true,
            RelationshipFilter::OnlyOrphaned => info.is_orphaned,
            RelationshipFilter::OnlyUsed => !info.is_orphaned,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipReport {
    pub relationships: Vec<FileRelationshipInfo>,
    pub summary: RelationshipSummary,
}

impl RelationshipReport {
    pub fn new(relationships: Vec<FileRelationshipInfo>) -> Self {
        let orphaned_files = relationships.iter().filter(|r| r.is_orphaned).count();
        let summary = RelationshipSummary {
            total_files: relationships.len(),
            orphaned_files,
            used_files: relationships.len() - orphaned_files,
            total_references: relationships.iter().map(|r| r.used_by.len()).sum(),
        };
        RelationshipReport {
            relationships,
            summary,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipSummary {
    pub total_files: usize,
    pub orphaned_files: usize,
    pub used_files: usize,
    pub total_references: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageFileEntry {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageListing {
    pub files: Vec<StorageFileEntry>,
    pub total_files: usize,
    pub shown: usize,
    pub limit: usize,
}
