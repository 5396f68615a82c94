//! Read-only access to the database records that point at stored content.
//!
//! Three kinds of records carry references:
//! ```text
//! document_versions.hash        -> content hash of a document version
//! images.location               -> hash (or path ending in the hash) of an original image
//! images.thumbnail_hash         -> hash of the derived thumbnail
//! images.resized_hash           -> hash of the derived resized variant
//! learning_cards.image_id       -> images.id (indirect reference to the original)
//! ```

pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use sqlite::SqliteReferences;

#[cfg(feature = "postgres")]
pub use postgres::PostgresReferences;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hash::{hash_from_location, storage_path};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentVersionRecord {
    pub id: String,
    pub hash: String,
    pub file_name: Option<String>,
    pub info: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub name: Option<String>,
    pub location: String,
    pub thumbnail_hash: Option<String>,
    pub resized_hash: Option<String>,
    pub info: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    pub id: String,
    pub title: Option<String>,
    pub image_id: Option<String>,
    pub info: BTreeMap<String, String>,
}

/// Query surface over the referencing tables.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    async fn document_versions(&self) -> Result<Vec<DocumentVersionRecord>>;

    async fn images(&self) -> Result<Vec<ImageRecord>>;

    async fn cards(&self) -> Result<Vec<CardRecord>>;
}

/// Fixed, in-memory reference data.
#[derive(Debug, Clone, Default)]
pub struct StaticReferences {
    pub documents: Vec<DocumentVersionRecord>,
    pub images: Vec<ImageRecord>,
    pub cards: Vec<CardRecord>,
}

impl StaticReferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document version referencing `hash`.
    pub fn with_document(mut self, hash: impl Into<String>) -> Self {
        let id = (self.documents.len() + 1).to_string();
        self.documents.push(DocumentVersionRecord {
            id,
            hash: hash.into(),
            ..Default::default()
        });
        self
    }

    pub fn with_image(mut self, image: ImageRecord) -> Self {
        self.images.push(image);
        self
    }

    pub fn with_card(mut self, card: CardRecord) -> Self {
        self.cards.push(card);
        self
    }
}

#[async_trait]
impl ReferenceSource for StaticReferences {
    async fn document_versions(&self) -> Result<Vec<DocumentVersionRecord>> {
        Ok(self.documents.clone())
    }

    async fn images(&self) -> Result<Vec<ImageRecord>> {
        Ok(self.images.clone())
    }

    async fn cards(&self) -> Result<Vec<CardRecord>> {
        Ok(self.cards.clone())
    }
}

/// One database field pointing at a stored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseReference {
    pub table: String,
    pub record_id: String,
    pub field: String,
    pub record_title: Option<String>,
    pub additional_info: BTreeMap<String, String>,
}

/// A reference resolved to its hash and sharded storage path.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReference {
    pub hash: String,
    pub path: String,
    pub reference: DatabaseReference,
}

pub const DOCUMENT_TABLE: &str = "document_versions";
pub const IMAGE_TABLE: &str = "images";
pub const CARD_TABLE: &str = "learning_cards";

/// All reference records, loaded once per verification call.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSnapshot {
    pub documents: Vec<DocumentVersionRecord>,
    pub images: Vec<ImageRecord>,
    pub cards: Vec<CardRecord>,
}

impl ReferenceSnapshot {
    pub async fn load(source: &dyn ReferenceSource) -> Result<Self> {
        Ok(ReferenceSnapshot {
            documents: source.document_versions().await?,
            images: source.images().await?,
            cards: source.cards().await?,
        })
    }

    /// Distinct document hashes.
    pub fn document_hashes(&self) -> BTreeSet<String> {
        self.documents.iter().map(|d| d.hash.clone()).collect()
    }

    /// Distinct image locations plus distinct derived hashes recorded on the
    /// image rows.
    pub fn image_identifiers(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        for image in &self.images {
            ids.insert(image.location.clone());
            ids.extend(image.thumbnail_hash.iter().cloned());
            ids.extend(image.resized_hash.iter().cloned());
        }
        ids
    }

    /// Hashes of original images whose location resolves to a hash.
    pub fn original_image_hashes(&self) -> BTreeSet<String> {
        self.images
            .iter()
            .filter_map(|image| hash_from_location(&image.location).map(str::to_string))
            .collect()
    }

    /// Every storage path reachable from a reference. Hashes too short to
    /// shard are skipped.
    pub fn referenced_paths(&self) -> HashSet<String> {
        self.file_references()
            .into_iter()
            .map(|r| r.path)
            .collect()
    }

    /// Every reference with its describing metadata.
    pub fn file_references(&self) -> Vec<FileReference> {
        let mut refs = Vec::new();
        let images_by_id: HashMap<&str, &ImageRecord> =
            self.images.iter().map(|i| (i.id.as_str(), i)).collect();

        for image in &self.images {
            let original = hash_from_location(&image.location);
            if let Some(hash) = original {
                push_reference(&mut refs, hash, IMAGE_TABLE, &image.id, "location", image.name.clone(), image.info.clone());
            }
            let derived_from = original.unwrap_or("unknown").to_string();
            let derived = [
                ("thumbnail_hash", "thumbnail", &image.thumbnail_hash),
                ("resized_hash", "resized", &image.resized_hash),
            ];
            for (field, label, hash) in derived {
                if let Some(hash) = hash {
                    let mut info = image.info.clone();
                    info.insert("derivedFrom".to_string(), derived_from.clone());
                    let title = image.name.as_ref().map(|n| format!("{n} ({label})"));
                    push_reference(&mut refs, hash, IMAGE_TABLE, &image.id, field, title, info);
                }
            }
        }

        for doc in &self.documents {
            push_reference(&mut refs, &doc.hash, DOCUMENT_TABLE, &doc.id, "hash", doc.file_name.clone(), doc.info.clone());
        }

        for card in &self.cards {
            let Some(image_id) = card.image_id.as_deref() else {
                continue;
            };
            let Some(hash) = images_by_id
                .get(image_id)
                .and_then(|image| hash_from_location(&image.location))
            else {
                continue;
            };
            let mut info = card.info.clone();
            info.insert("imageId".to_string(), image_id.to_string());
            push_reference(&mut refs, hash, CARD_TABLE, &card.id, "image_id (indirect)", card.title.clone(), info);
        }
        refs
    }
}

fn push_reference(
    refs: &mut Vec<FileReference>,
    hash: &str,
    table: &str,
    record_id: &str,
    field: &str,
    record_title: Option<String>,
    additional_info: BTreeMap<String, String>,
) {
    let Ok(path) = storage_path(hash) else {
        tracing::debug!(table, record_id, hash, "reference hash too short to resolve");
        return;
    };
    refs.push(FileReference {
        hash: hash.to_string(),
        path,
        reference: DatabaseReference {
            table: table.to_string(),
            record_id: record_id.to_string(),
            field: field.to_string(),
            record_title,
            additional_info,
        },
    });
}
