//! Parallel lookups of one query across several external databases.
//!
//! Each source is fetched independently with its own timeout; a failing source
//! is recorded as such and never holds up the others.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{PipelineError, Result};
use crate::TARGET_WEB_REQUEST;

pub const QUERY_PLACEHOLDER: &str = "{query}";
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const SOURCE_TIMEOUT: Duration = Duration::from_secs(10);
/// Characters of each source's payload included in a report.
pub const REPORT_EXCERPT_CHARS: usize = 2000;

/// One external endpoint. `{query}` in the URL is replaced with the
/// URL-encoded query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRequest {
    pub key: String,
    pub url: String,
}

impl SourceRequest {
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
        }
    }

    /// Parses `key=url`.
    pub fn parse(value: &str) -> Result<Self> {
        match value.split_once('=') {
            Some((key, url)) if !key.trim().is_empty() && !url.trim().is_empty() => {
                Ok(Self::new(key.trim(), url.trim()))
            }
            _ => Err(PipelineError::Configuration(format!(
                "source must look like key=url, got {:?}",
                value
            ))),
        }
    }

    pub fn resolve(&self, query: &str) -> Result<Url> {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        let raw = self.url.replace(QUERY_PLACEHOLDER, &encoded);
        Url::parse(&raw).map_err(|e| {
            PipelineError::Configuration(format!("invalid URL for source {}: {}", self.key, e))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SourceOutcome {
    Json(serde_json::Value),
    Text(String),
    Failed(String),
}

impl SourceOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, SourceOutcome::Failed(_))
    }
}

pub struct Aggregator {
    client: reqwest::Client,
    concurrency: usize,
    source_timeout: Duration,
}

impl Aggregator {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .build()
            .map_err(|e| PipelineError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            concurrency: DEFAULT_CONCURRENCY,
            source_timeout: SOURCE_TIMEOUT,
        })
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_source_timeout(mut self, source_timeout: Duration) -> Self {
        self.source_timeout = source_timeout;
        self
    }

    /// Queries every source, at most `concurrency` at a time, and returns
    /// each source's outcome keyed by its `key`.
    pub async fn fetch_all(&self, sources: &[SourceRequest], query: &str) -> BTreeMap<String, SourceOutcome> {
        let start = Instant::now();
        let results: BTreeMap<String, SourceOutcome> = stream::iter(sources)
            .map(|source| async move {
                let outcome = self.fetch_one(source, query).await;
                (source.key.clone(), outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let succeeded = results.values().filter(|o| o.is_success()).count();
        info!(target: TARGET_WEB_REQUEST,
            "Aggregated {}/{} sources for {:?} in {:?}",
            succeeded, results.len(), query, start.elapsed());
        results
    }

    async fn fetch_one(&self, source: &SourceRequest, query: &str) -> SourceOutcome {
        let url = match source.resolve(query) {
            Ok(url) => url,
            Err(e) => {
                warn!(target: TARGET_WEB_REQUEST, "Skipping source {}: {}", source.key, e);
                return SourceOutcome::Failed(e.to_string());
            }
        };

        debug!(target: TARGET_WEB_REQUEST, "Requesting {} from {}", source.key, url);
        let request = async {
            let response = self.client.get(url).send().await?.error_for_status()?;
            response.text().await
        };

        match timeout(self.source_timeout, request).await {
            Ok(Ok(body)) => match serde_json::from_str(&body) {
                Ok(json) => SourceOutcome::Json(json),
                Err(_) => SourceOutcome::Text(body),
            },
            Ok(Err(e)) => {
                warn!(target: TARGET_WEB_REQUEST, "Source {} failed: {}", source.key, e);
                SourceOutcome::Failed(e.to_string())
            }
            Err(_) => {
                warn!(target: TARGET_WEB_REQUEST, "Source {} timed out after {:?}", source.key, self.source_timeout);
                SourceOutcome::Failed(format!("timed out after {} seconds", self.source_timeout.as_secs_f32()))
            }
        }
    }
}

/// Renders collected data as plain text for the analysis prompt. Payloads are
/// cut to [`REPORT_EXCERPT_CHARS`].
pub fn format_source_report(target: &str, results: &BTreeMap<String, SourceOutcome>) -> String {
    let mut report = format!("Data collected for {}:\n", target);
    for (key, outcome) in results {
        let body = match outcome {
            SourceOutcome::Json(value) => value.to_string(),
            SourceOutcome::Text(text) => text.trim().to_string(),
            SourceOutcome::Failed(reason) => format!("unavailable ({})", reason),
        };
        let mut excerpt: String = body.chars().take(REPORT_EXCERPT_CHARS).collect();
        if body.chars().count() > REPORT_EXCERPT_CHARS {
            excerpt.push_str("...");
        }
        let _ = write!(report, "\n### {}\n{}\n", key, excerpt);
    }
    report
}
