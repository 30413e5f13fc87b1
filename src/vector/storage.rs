use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::error::{PipelineError, Result};
use crate::models::{Document, IndexEntry};
use crate::vector::embedding::Embedder;
use crate::TARGET_VECTOR;

/// Texts sent to the embedding model per request.
pub const EMBEDDING_BATCH_SIZE: usize = 16;

/// Deduplicating writer for the persistent document index.
///
/// Known identifiers are loaded once when the store is opened and kept in a
/// `HashSet`, so membership tests never scan the index. The set lives behind
/// a mutex that is held for the whole of [`DocumentStore::store`], which makes
/// concurrent writers take turns. The set is only extended after the batch
/// transaction has committed.
pub struct DocumentStore {
    db: Database,
    embedder: Arc<dyn Embedder>,
    known_ids: Mutex<HashSet<String>>,
}

impl DocumentStore {
    pub async fn open(db: Database, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let known_ids = db.known_document_ids().await?;

        if let Some(model) = db.get_meta(crate::db::META_EMBEDDING_MODEL).await? {
            if model != embedder.model_name() {
                warn!(target: TARGET_VECTOR,
                    "Index was built with embedding model {} but {} is configured",
                    model, embedder.model_name()
                );
            }
        }

        info!(target: TARGET_VECTOR, "Opened document index with {} entries", known_ids.len());
        Ok(Self {
            db,
            embedder,
            known_ids: Mutex::new(known_ids),
        })
    }

    /// Adds the documents whose id is not yet indexed and returns how many
    /// were added. Either every new entry is durably committed or none is.
    pub async fn store(&self, documents: &[Document]) -> Result<usize> {
        let mut known_ids = self.known_ids.lock().await;

        let mut batch_ids = HashSet::new();
        let mut new_documents = Vec::new();
        for document in documents {
            if document.id.trim().is_empty() {
                warn!(target: TARGET_VECTOR, "Skipping document without an id: {:?}", document.title);
                continue;
            }
            if known_ids.contains(&document.id) || !batch_ids.insert(document.id.as_str()) {
                continue;
            }
            new_documents.push(document);
        }

        if new_documents.is_empty() {
            debug!(target: TARGET_VECTOR, "No new documents among {} supplied", documents.len());
            return Ok(0);
        }

        // Every chunk is embedded before anything is written, so a failure in
        // any of them still leaves the index untouched.
        let texts: Vec<String> = new_documents.iter().map(|d| d.embedding_text()).collect();
        let mut embeddings = Vec::with_capacity(texts.len());
        for (index, chunk) in texts.chunks(EMBEDDING_BATCH_SIZE).enumerate() {
            debug!(target: TARGET_VECTOR,
                "Embedding chunk {} ({} texts) of {} new documents", index + 1, chunk.len(), texts.len());
            embeddings.extend(self.embedder.embed_batch(chunk).await?);
        }
        if embeddings.len() != new_documents.len() {
            return Err(PipelineError::unavailable(
                "embedding model",
                format!(
                    "returned {} embeddings for {} documents",
                    embeddings.len(),
                    new_documents.len()
                ),
            ));
        }

        let dimension = embeddings[0].len();
        if embeddings.iter().any(|e| e.len() != dimension) {
            return Err(PipelineError::Configuration(
                "embedding model returned vectors of differing dimension".to_string(),
            ));
        }
        if let Some(indexed) = self.db.embedding_dimension().await? {
            if indexed != dimension {
                return Err(PipelineError::Configuration(format!(
                    "index holds {}-dimensional embeddings but the model produced {}",
                    indexed, dimension
                )));
            }
        }

        let entries: Vec<IndexEntry> = new_documents
            .iter()
            .zip(embeddings)
            .map(|(document, embedding)| IndexEntry::new(document, embedding))
            .collect();

        let added = self
            .db
            .insert_entries(&entries, self.embedder.model_name())
            .await
            .map_err(|e| {
                error!(target: TARGET_VECTOR, "Index write failed, no entries added: {}", e);
                PipelineError::PersistenceFailure(e.to_string())
            })?;

        known_ids.extend(entries.into_iter().map(|entry| entry.document_id));
        info!(target: TARGET_VECTOR, "Added {} of {} fetched documents to the index", added, documents.len());
        Ok(added as usize)
    }

    pub async fn contains(&self, document_id: &str) -> bool {
        self.known_ids.lock().await.contains(document_id)
    }

    pub async fn len(&self) -> usize {
        self.known_ids.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}
