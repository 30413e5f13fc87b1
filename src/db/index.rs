use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument};

use super::core::{Database, DbLockErrorExt};
use crate::models::{IndexEntry, META_ABSTRACT, META_TITLE};
use crate::TARGET_DB;

pub const META_EMBEDDING_MODEL: &str = "embedding_model";
pub const META_EMBEDDING_DIMENSION: &str = "embedding_dimension";

/// Serializes an embedding as little-endian `f32` bytes.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// Inverse of [`encode_embedding`]. Returns `None` if the blob is not a whole
/// number of `f32` values.
pub fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

impl Database {
    pub async fn get_meta(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT value FROM index_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await
    }

    /// Dimension of the vectors already in the index, if any were stored.
    pub async fn embedding_dimension(&self) -> Result<Option<usize>, sqlx::Error> {
        Ok(self
            .get_meta(META_EMBEDDING_DIMENSION)
            .await?
            .and_then(|value| value.parse().ok()))
    }

    /// Full scan of the identifiers in the index. Only used to seed the
    /// in-memory identifier set when a store is opened.
    #[instrument(target = "db_query", level = "info", skip(self))]
    pub async fn known_document_ids(&self) -> Result<HashSet<String>, sqlx::Error> {
        let ids = sqlx::query_scalar::<_, String>("SELECT document_id FROM index_entries")
            .fetch_all(self.pool())
            .await?;
        debug!(target: TARGET_DB, "Loaded {} known document ids", ids.len());
        Ok(ids.into_iter().collect())
    }

    pub async fn count_entries(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
            .fetch_one(self.pool())
            .await
    }

    /// All entries in insertion order.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn load_entries(&self) -> Result<Vec<IndexEntry>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (String, String, Vec<u8>)>(
            "SELECT document_id, metadata, embedding FROM index_entries ORDER BY seq ASC",
        )
        .fetch_all(self.pool())
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (document_id, metadata, embedding) in rows {
            let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
            let embedding = decode_embedding(&embedding).ok_or_else(|| {
                sqlx::Error::Decode(
                    format!("embedding blob for {} is not a whole number of f32 values", document_id).into(),
                )
            })?;
            entries.push(IndexEntry {
                document_id,
                embedding,
                metadata,
            });
        }
        Ok(entries)
    }

    /// Writes a batch of entries in a single transaction: either every new
    /// entry is committed or none is. Entries whose `document_id` already
    /// exists are left untouched. Returns how many rows were added.
    #[instrument(target = "db_query", level = "info", skip(self, entries), fields(batch = entries.len()))]
    pub async fn insert_entries(
        &self,
        entries: &[IndexEntry],
        embedding_model: &str,
    ) -> Result<u64, sqlx::Error> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut backoff = 100; // initial delay in milliseconds
        let max_retries = 5;

        for attempt in 1..=max_retries {
            match self.try_insert_entries(entries, embedding_model).await {
                Ok(added) => {
                    info!(target: TARGET_DB, "Committed {} new index entries", added);
                    return Ok(added);
                }
                Err(err) if err.is_database_lock_error() && attempt < max_retries => {
                    info!(target: TARGET_DB, "Database is locked, waiting {}ms before retrying attempt {}/{}", backoff, attempt, max_retries);
                    sleep(Duration::from_millis(backoff)).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(err) => {
                    error!(target: TARGET_DB, "Failed to insert index entries: {}", err);
                    return Err(err);
                }
            }
        }

        Err(sqlx::Error::Protocol(
            "Maximum retries exceeded for inserting index entries".into(),
        ))
    }

    async fn try_insert_entries(
        &self,
        entries: &[IndexEntry],
        embedding_model: &str,
    ) -> Result<u64, sqlx::Error> {
        let added_at = Utc::now().to_rfc3339();
        let dimension = entries[0].embedding.len();

        let mut tx = self.pool().begin().await?;

        sqlx::query("INSERT INTO index_meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO NOTHING")
            .bind(META_EMBEDDING_MODEL)
            .bind(embedding_model)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO index_meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO NOTHING")
            .bind(META_EMBEDDING_DIMENSION)
            .bind(dimension.to_string())
            .execute(&mut *tx)
            .await?;

        let mut added = 0;
        for entry in entries {
            let metadata =
                serde_json::to_string(&entry.metadata).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
            let result = sqlx::query(
                r#"
                INSERT INTO index_entries (document_id, title, abstract, metadata, embedding, dimension, added_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(document_id) DO NOTHING
                "#,
            )
            .bind(&entry.document_id)
            .bind(entry.metadata.get(META_TITLE).map(String::as_str).unwrap_or(""))
            .bind(entry.metadata.get(META_ABSTRACT).map(String::as_str).unwrap_or(""))
            .bind(&metadata)
            .bind(encode_embedding(&entry.embedding))
            .bind(entry.embedding.len() as i64)
            .bind(&added_at)
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected();
        }

        // Dropping `tx` without commit rolls everything back.
        tx.commit().await?;
        Ok(added)
    }
}
