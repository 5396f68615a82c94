use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row};

use super::{CardRecord, DocumentVersionRecord, ImageRecord, ReferenceSource};
use crate::error::{MigrationError, Result};

/// Reference source over the same three tables as
/// [`SqliteReferences`](super::SqliteReferences), in PostgreSQL.
///
/// `tokio_postgres::Client` pipelines queries over one connection, so the
/// client is shared without a mutex.
///
/// Enable with the `postgres` Cargo feature flag.
pub struct PostgresReferences {
    client: Arc<Client>,
}

impl PostgresReferences {
    /// Connect with a connection string such as
    /// `"host=localhost user=postgres dbname=app"`.
    pub async fn connect(connection_str: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(connection_str, NoTls)
            .await
            .map_err(|e| MigrationError::Database(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection error");
            }
        });

        Ok(PostgresReferences {
            client: Arc::new(client),
        })
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.client
            .query(sql, &[])
            .await
            .map_err(|e| MigrationError::Database(e.to_string()))
    }
}

fn info(pairs: &[(&str, Option<String>)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (k.to_string(), v.clone())))
        .collect()
}

#[async_trait]
impl ReferenceSource for PostgresReferences {
    async fn document_versions(&self) -> Result<Vec<DocumentVersionRecord>> {
        let rows = self
            .query(
                "SELECT id::TEXT, document_id::TEXT, hash, file_name, mime_type, version::TEXT
                 FROM document_versions ORDER BY id",
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| DocumentVersionRecord {
                id: r.get(0),
                hash: r.get(2),
                file_name: r.get(3),
                info: info(&[
                    ("documentId", r.get::<_, Option<String>>(1)),
                    ("mimeType", r.get::<_, Option<String>>(4)),
                    ("version", r.get::<_, Option<String>>(5)),
                ]),
            })
            .collect())
    }

    async fn images(&self) -> Result<Vec<ImageRecord>> {
        let rows = self
            .query(
                "SELECT id::TEXT, name, location, thumbnail_hash, resized_hash, extension
                 FROM images ORDER BY id",
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| ImageRecord {
                id: r.get(0),
                name: r.get(1),
                location: r.get(2),
                thumbnail_hash: r.get(3),
                resized_hash: r.get(4),
                info: info(&[("extension", r.get::<_, Option<String>>(5))]),
            })
            .collect())
    }

    async fn cards(&self) -> Result<Vec<CardRecord>> {
        let rows = self
            .query("SELECT id::TEXT, title, image_id::TEXT, category FROM learning_cards ORDER BY id")
            .await?;
        Ok(rows
            .iter()
            .map(|r| CardRecord {
                id: r.get(0),
                title: r.get(1),
                image_id: r.get(2),
                info: info(&[("category", r.get::<_, Option<String>>(3))]),
            })
            .collect())
    }
}
