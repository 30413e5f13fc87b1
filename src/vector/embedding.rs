use async_trait::async_trait;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::error::{PipelineError, Result};
use crate::vector::similarity::{magnitude, MIN_MAGNITUDE};
use crate::TARGET_VECTOR;

const EMBEDDING_SERVICE: &str = "embedding model";
pub const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(60);

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier recorded alongside the index so later runs can detect a
    /// model switch.
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embeds several texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}

/// Embeddings from a locally hosted Ollama model.
pub struct OllamaEmbedder {
    ollama: Ollama,
    model: String,
    timeout: Duration,
}

impl OllamaEmbedder {
    pub fn new(ollama: Ollama, model: impl Into<String>) -> Self {
        Self {
            ollama,
            model: model.into(),
            timeout: EMBEDDING_TIMEOUT,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Ollama::new(config.ollama_host_url(), config.ollama_port),
            config.embedding_model.clone(),
        )
    }

    async fn request(&self, input: EmbeddingsInput, expected: usize) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let request = GenerateEmbeddingsRequest::new(self.model.clone(), input);

        let response = match timeout(self.timeout, self.ollama.generate_embeddings(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(target: TARGET_VECTOR, "Embedding request to model {} failed: {}", self.model, e);
                return Err(PipelineError::unavailable(EMBEDDING_SERVICE, e));
            }
            Err(_) => {
                error!(target: TARGET_VECTOR, "Embedding request to model {} timed out after {:?}", self.model, self.timeout);
                return Err(PipelineError::unavailable(
                    EMBEDDING_SERVICE,
                    format!("timed out after {} seconds", self.timeout.as_secs()),
                ));
            }
        };

        let embeddings = response.embeddings;
        if embeddings.len() != expected {
            return Err(PipelineError::unavailable(
                EMBEDDING_SERVICE,
                format!("expected {} embeddings, got {}", expected, embeddings.len()),
            ));
        }
        for embedding in &embeddings {
            validate_embedding(embedding)?;
        }

        debug!(target: TARGET_VECTOR,
            "Generated {} embeddings of dimension {} in {:?}",
            embeddings.len(),
            embeddings.first().map(Vec::len).unwrap_or(0),
            start.elapsed()
        );
        Ok(embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self
            .request(EmbeddingsInput::Single(text.to_string()), 1)
            .await?;
        embeddings
            .pop()
            .ok_or_else(|| PipelineError::unavailable(EMBEDDING_SERVICE, "empty response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        info!(target: TARGET_VECTOR, "Embedding {} texts with {}", texts.len(), self.model);
        self.request(EmbeddingsInput::Multiple(texts.to_vec()), texts.len())
            .await
    }
}

/// Rejects vectors that cannot take part in cosine similarity.
pub fn validate_embedding(embedding: &[f32]) -> Result<()> {
    if embedding.is_empty() {
        return Err(PipelineError::unavailable(EMBEDDING_SERVICE, "empty embedding"));
    }
    if embedding.iter().any(|x| !x.is_finite()) {
        return Err(PipelineError::unavailable(
            EMBEDDING_SERVICE,
            "embedding contains non-finite values",
        ));
    }
    if magnitude(embedding) < MIN_MAGNITUDE {
        return Err(PipelineError::unavailable(
            EMBEDDING_SERVICE,
            "near-zero magnitude embedding",
        ));
    }
    Ok(())
}
