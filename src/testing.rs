//! Deterministic stand-ins for the embedding model, the generative model and
//! the literature search service.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{PipelineError, Result};
use crate::llm::TextGenerator;
use crate::models::Document;
use crate::pubmed::LiteratureSource;
use crate::vector::Embedder;

pub fn doc(id: &str, title: &str) -> Document {
    Document::new(id, title, "")
}

/// Bag-of-words embedder: every lowercase word is hashed (FNV-1a) into a
/// bucket. Bucket 0 is a constant bias so no text embeds to a zero vector.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::with_dimension(512)
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing-test-embedder"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0; self.dimension];
        vector[0] = 0.5;
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            if word == "title" || word == "abstract" {
                continue;
            }
            let bucket = 1 + (fnv1a(&word) % (self.dimension as u64 - 1)) as usize;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }
}

/// Embedder whose service is always down.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "unreachable-embedder"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(PipelineError::unavailable("embedding model", "connection refused"))
    }
}

/// Hashing embedder that records the size of every batch it is asked for,
/// optionally failing one of them (numbered from 1).
pub struct RecordingEmbedder {
    inner: HashingEmbedder,
    batches: Mutex<Vec<usize>>,
    fail_on_batch: Option<usize>,
}

impl RecordingEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashingEmbedder::default(),
            batches: Mutex::new(Vec::new()),
            fail_on_batch: None,
        }
    }

    pub fn failing_on_batch(batch: usize) -> Self {
        Self {
            fail_on_batch: Some(batch),
            ..Self::new()
        }
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for RecordingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let batch = {
            let mut batches = self.batches.lock().unwrap();
            batches.push(texts.len());
            batches.len()
        };
        if self.fail_on_batch == Some(batch) {
            return Err(PipelineError::unavailable("embedding model", "request timed out"));
        }
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.inner.embed(text).await?);
        }
        Ok(embeddings)
    }
}

/// Generator that replays scripted replies in order and records every prompt.
/// Once the script runs out it answers with a fixed text.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Result<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always fails as an unreachable endpoint would.
    pub fn unreachable() -> Self {
        let replies = (0..16)
            .map(|_| Err(PipelineError::unavailable("ollama", "connection refused")))
            .collect();
        Self::new(replies)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("scripted summary".to_string()))
    }
}

/// Literature source serving a fixed set of documents.
pub struct FakeSource {
    documents: Vec<Document>,
    fail: bool,
}

impl FakeSource {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents,
            fail: false,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            documents: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl LiteratureSource for FakeSource {
    async fn fetch(&self, _query: &str, max_results: usize) -> Result<Vec<Document>> {
        if self.fail {
            return Err(PipelineError::unavailable("pubmed", "connection refused"));
        }
        Ok(self.documents.iter().take(max_results).cloned().collect())
    }
}

/// Reads one HTTP/1.1 request (headers plus a Content-Length body).
pub async fn read_http_request(socket: &mut tokio::net::TcpStream) -> String {
    use tokio::io::AsyncReadExt;

    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&data).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if data.len() >= end + 4 + length {
                return text;
            }
        }
    }
    String::from_utf8_lossy(&data).to_string()
}

/// Serves every incoming request with `handler(request_target)`, which
/// returns a status code and a body. Returns the server's base URL.
pub async fn spawn_http_server<F>(handler: F) -> String
where
    F: Fn(&str) -> (u16, String) + Send + Sync + 'static,
{
    use tokio::io::AsyncWriteExt;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let handler = std::sync::Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                let request = read_http_request(&mut socket).await;
                let target = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = handler(&target);
                let response = format!(
                    "HTTP/1.1 {} X\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    url
}
