use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio_rusqlite::Connection;

use super::{CardRecord, DocumentVersionRecord, ImageRecord, ReferenceSource};
use crate::error::{MigrationError, Result};

/// Reference source reading an application SQLite database.
///
/// Expected tables (extra columns are ignored):
/// ```text
/// document_versions(id, document_id, hash, file_name, mime_type, version)
/// images(id, name, location, thumbnail_hash, resized_hash, extension)
/// learning_cards(id, title, image_id, category)
/// ```
/// The database is only read.
pub struct SqliteReferences {
    conn: Connection,
}

impl SqliteReferences {
    pub async fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .await
            .map_err(|e: rusqlite::Error| MigrationError::Database(e.to_string()))?;
        Ok(SqliteReferences { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        SqliteReferences { conn }
    }
}

fn info(pairs: &[(&str, Option<String>)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (k.to_string(), v.clone())))
        .collect()
}

#[async_trait]
impl ReferenceSource for SqliteReferences {
    async fn document_versions(&self) -> Result<Vec<DocumentVersionRecord>> {
        self.conn
            .call(|conn| -> std::result::Result<Vec<DocumentVersionRecord>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, document_id, hash, file_name, mime_type, version
                     FROM document_versions ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    let document_id: Option<i64> = row.get(1)?;
                    let version: Option<i64> = row.get(5)?;
                    Ok(DocumentVersionRecord {
                        id: row.get::<_, i64>(0)?.to_string(),
                        hash: row.get(2)?,
                        file_name: row.get(3)?,
                        info: info(&[
                            ("documentId", document_id.map(|v| v.to_string())),
                            ("mimeType", row.get::<_, Option<String>>(4)?),
                            ("version", version.map(|v| v.to_string())),
                        ]),
                    })
                })?;
                let mut docs = Vec::new();
                for row in rows {
                    docs.push(row?);
                }
                Ok(docs)
            })
            .await
            .map_err(|e: tokio_rusqlite::Error| MigrationError::Database(e.to_string()))
    }

    async fn images(&self) -> Result<Vec<ImageRecord>> {
        self.conn
            .call(|conn| -> std::result::Result<Vec<ImageRecord>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, name, location, thumbnail_hash, resized_hash, extension
                     FROM images ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(ImageRecord {
                        id: row.get::<_, i64>(0)?.to_string(),
                        name: row.get(1)?,
                        location: row.get(2)?,
                        thumbnail_hash: row.get(3)?,
                        resized_hash: row.get(4)?,
                        info: info(&[("extension", row.get::<_, Option<String>>(5)?)]),
                    })
                })?;
                let mut images = Vec::new();
                for row in rows {
                    images.push(row?);
                }
                Ok(images)
            })
            .await
            .map_err(|e: tokio_rusqlite::Error| MigrationError::Database(e.to_string()))
    }

    async fn cards(&self) -> Result<Vec<CardRecord>> {
        self.conn
            .call(|conn| -> std::result::Result<Vec<CardRecord>, rusqlite::Error> {
                let mut stmt =
                    conn.prepare("SELECT id, title, image_id, category FROM learning_cards ORDER BY id")?;
                let rows = stmt.query_map([], |row| {
                    let image_id: Option<i64> = row.get(2)?;
                    Ok(CardRecord {
                        id: row.get::<_, i64>(0)?.to_string(),
                        title: row.get(1)?,
                        image_id: image_id.map(|v| v.to_string()),
                        info: info(&[("category", row.get::<_, Option<String>>(3)?)]),
                    })
                })?;
                let mut cards = Vec::new();
                for row in rows {
                    cards.push(row?);
                }
                Ok(cards)
            })
            .await
            .map_err(|e: tokio_rusqlite::Error| MigrationError::Database(e.to_string()))
    }
}
