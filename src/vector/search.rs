use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::{PipelineError, Result};
use crate::models::{IndexEntry, RetrievalResult, Similarity};
use crate::vector::embedding::Embedder;
use crate::vector::similarity::similarity;
use crate::TARGET_VECTOR;

/// How many results a query returns.
///
/// Scores are always similarities in `[0, 1]` (higher is better), so a
/// threshold means "at least this similar".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetrievalMode {
    /// The `k` most similar entries regardless of their absolute score.
    TopK { k: usize },
    /// Of the `max_k` most similar entries, those scoring at least
    /// `min_similarity`.
    Threshold { min_similarity: f32, max_k: usize },
}

impl RetrievalMode {
    pub fn validate(&self) -> Result<()> {
        if let RetrievalMode::Threshold { min_similarity, .. } = self {
            if !(0.0..=1.0).contains(min_similarity) {
                return Err(PipelineError::Configuration(format!(
                    "similarity threshold {} is outside [0, 1]",
                    min_similarity
                )));
            }
        }
        Ok(())
    }
}

/// Nearest-neighbour search over the persistent index.
#[derive(Clone)]
pub struct Retriever {
    db: Database,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(db: Database, embedder: Arc<dyn Embedder>) -> Self {
        Self { db, embedder }
    }

    /// Returns `Ok` with no results when the index is empty, and an
    /// `ExternalServiceUnavailable` error when the query cannot be embedded.
    pub async fn retrieve(&self, query: &str, mode: RetrievalMode) -> Result<Vec<RetrievalResult>> {
        mode.validate()?;

        let pool_size = match mode {
            RetrievalMode::TopK { k } => k,
            RetrievalMode::Threshold { max_k, .. } => max_k,
        };
        if pool_size == 0 {
            return Ok(Vec::new());
        }

        let entries = self.db.load_entries().await?;
        if entries.is_empty() {
            info!(target: TARGET_VECTOR, "Index is empty, nothing to retrieve for {:?}", query);
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query).await?;
        let results = select_entries(&query_embedding, &entries, mode);

        debug!(target: TARGET_VECTOR,
            "Retrieved {} of {} entries for {:?} ({:?})",
            results.len(), entries.len(), query, mode
        );
        Ok(results)
    }

    pub async fn retrieve_top_k(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        self.retrieve(query, RetrievalMode::TopK { k }).await
    }

    pub async fn retrieve_threshold(
        &self,
        query: &str,
        min_similarity: f32,
        max_k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        self.retrieve(
            query,
            RetrievalMode::Threshold {
                min_similarity,
                max_k,
            },
        )
        .await
    }
}

/// Applies `mode` to the entries ranked against the query.
pub fn select_entries(query_embedding: &[f32], entries: &[IndexEntry], mode: RetrievalMode) -> Vec<RetrievalResult> {
    match mode {
        RetrievalMode::TopK { k } => rank_entries(query_embedding, entries, k),
        RetrievalMode::Threshold { min_similarity, max_k } => rank_entries(query_embedding, entries, max_k)
            .into_iter()
            .filter(|result| result.similarity.meets(min_similarity))
            .collect(),
    }
}

/// Scores every entry against the query and keeps the `k` most similar,
/// best first. Equal scores keep index insertion order. Entries whose vector
/// cannot be compared with the query are skipped.
pub fn rank_entries(query_embedding: &[f32], entries: &[IndexEntry], k: usize) -> Vec<RetrievalResult> {
    let mut scored: Vec<(Similarity, &IndexEntry)> = Vec::with_capacity(entries.len());
    for entry in entries {
        match similarity(query_embedding, &entry.embedding) {
            Ok(score) => scored.push((score, entry)),
            Err(e) => {
                warn!(target: TARGET_VECTOR, "Skipping entry {}: {}", entry.document_id, e);
            }
        }
    }

    // sort_by is stable, so ties stay in insertion order
    scored.sort_by(|a, b| b.0.value().total_cmp(&a.0.value()));

    scored
        .into_iter()
        .take(k)
        .map(|(score, entry)| RetrievalResult::new(entry.metadata.clone(), score))
        .collect()
}
