use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use super::parser::parse_article;
use super::types::{
    ESearchResponse, EUTILS_BASE_URL, INITIAL_BACKOFF, MAX_FETCH_ATTEMPTS, REQUEST_TIMEOUT, TOOL_NAME,
};
use super::LiteratureSource;
use crate::config::AppConfig;
use crate::error::{PipelineError, Result};
use crate::models::Document;
use crate::TARGET_WEB_REQUEST;

const PUBMED_SERVICE: &str = "pubmed";

/// Enforces a minimum interval between successive requests.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Waits until at least `interval` has passed since the previous call
    /// returned.
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.interval;
            if Instant::now() < ready_at {
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// [`LiteratureSource`] backed by the NCBI E-utilities.
pub struct PubMedClient {
    client: reqwest::Client,
    base_url: String,
    email: Option<String>,
    api_key: Option<String>,
    limiter: RateLimiter,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl PubMedClient {
    pub fn new(request_delay: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: EUTILS_BASE_URL.to_string(),
            email: None,
            api_key: None,
            limiter: RateLimiter::new(request_delay),
            max_attempts: MAX_FETCH_ATTEMPTS,
            initial_backoff: INITIAL_BACKOFF,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut client = Self::new(config.request_delay)?;
        client.email = config.ncbi_email.clone();
        client.api_key = config.ncbi_api_key.clone();
        Ok(client)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_policy(mut self, max_attempts: u32, initial_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.initial_backoff = initial_backoff;
        self
    }

    fn common_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", "pubmed".to_string()), ("tool", TOOL_NAME.to_string())];
        if let Some(email) = &self.email {
            params.push(("email", email.clone()));
        }
        if let Some(api_key) = &self.api_key {
            params.push(("api_key", api_key.clone()));
        }
        params
    }

    /// One rate-limited GET. Network failures and non-success statuses are
    /// `ExternalServiceUnavailable`.
    async fn get(&self, endpoint: &str, params: &[(&'static str, String)]) -> Result<String> {
        self.limiter.wait().await;

        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| PipelineError::unavailable(PUBMED_SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::unavailable(
                PUBMED_SERVICE,
                format!("{} returned HTTP {}", endpoint, status),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| PipelineError::unavailable(PUBMED_SERVICE, e))
    }

    /// Retries transient failures with exponential backoff. Anything else,
    /// a malformed record included, is returned at once.
    async fn get_with_retry<T, F>(&self, what: &str, endpoint: &str, params: &[(&'static str, String)], parse: F) -> Result<T>
    where
        F: Fn(&str) -> Result<T>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match self.get(endpoint, params).await.and_then(|body| parse(&body)) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(target: TARGET_WEB_REQUEST,
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what, attempt, self.max_attempts, e, backoff);
                    sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Identifiers of the best matches for `query`, at most `max_results`.
    pub async fn search_ids(&self, query: &str, max_results: usize) -> Result<Vec<String>> {
        let mut params = self.common_params();
        params.push(("term", query.to_string()));
        params.push(("retmax", max_results.to_string()));
        params.push(("retmode", "json".to_string()));

        let ids = self
            .get_with_retry("PubMed search", "esearch.fcgi", &params, |body| {
                let response: ESearchResponse = serde_json::from_str(body).map_err(|e| {
                    PipelineError::unavailable(PUBMED_SERVICE, format!("unreadable search response: {}", e))
                })?;
                if let Some(error) = response.esearchresult.error {
                    return Err(PipelineError::unavailable(PUBMED_SERVICE, error));
                }
                Ok(response.esearchresult.idlist)
            })
            .await?;

        info!(target: TARGET_WEB_REQUEST, "PubMed search for {:?} found {} ids", query, ids.len());
        Ok(ids.into_iter().take(max_results).collect())
    }

    pub async fn fetch_document(&self, id: &str) -> Result<Document> {
        let mut params = self.common_params();
        params.push(("id", id.to_string()));
        params.push(("retmode", "xml".to_string()));
        params.push(("rettype", "abstract".to_string()));

        self.get_with_retry(&format!("Fetching PMID {}", id), "efetch.fcgi", &params, |body| {
            parse_article(id, body)
        })
        .await
    }
}

#[async_trait]
impl LiteratureSource for PubMedClient {
    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<Document>> {
        if query.trim().is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }

        let ids = self.search_ids(query, max_results).await?;
        let total = ids.len();
        let mut documents = Vec::with_capacity(total);

        for (index, id) in ids.iter().enumerate() {
            debug!(target: TARGET_WEB_REQUEST, "Fetching paper {}/{} (PMID {})", index + 1, total, id);
            match self.fetch_document(id).await {
                Ok(document) => documents.push(document),
                Err(e) => {
                    warn!(target: TARGET_WEB_REQUEST, "Skipping PMID {}: {}", id, e);
                }
            }
        }

        info!(target: TARGET_WEB_REQUEST, "Fetched {} of {} papers for {:?}", documents.len(), total, query);
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_http_server;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn article(title: &str) -> String {
        format!(
            "<PubmedArticleSet><PubmedArticle><Article><ArticleTitle>{}</ArticleTitle>\
             <Abstract><AbstractText>Findings.</AbstractText></Abstract></Article></PubmedArticle></PubmedArticleSet>",
            title
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(Duration::from_millis(340));
        let start = Instant::now();
        for _ in 0..4 {
            limiter.wait().await;
        }
        // First call is immediate, the next three each wait a full interval.
        assert!(start.elapsed() >= Duration::from_millis(3 * 340));
        assert!(start.elapsed() < Duration::from_millis(4 * 340));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_does_not_wait_after_idle_gap() {
        let limiter = RateLimiter::new(Duration::from_millis(340));
        limiter.wait().await;
        sleep(Duration::from_secs(1)).await;
        let before = Instant::now();
        limiter.wait().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_fetch_skips_failed_items() {
        let efetch_calls = Arc::new(AtomicUsize::new(0));
        let calls = efetch_calls.clone();
        let url = spawn_http_server(move |target| {
            if target.starts_with("/esearch.fcgi") {
                assert!(target.contains("term=CRISPR+cancer") || target.contains("term=CRISPR%20cancer"));
                assert!(target.contains("retmax=4"));
                return (200, r#"{"esearchresult":{"count":"4","idlist":["1","2","3","4"]}}"#.to_string());
            }
            calls.fetch_add(1, Ordering::SeqCst);
            if target.contains("id=2&") {
                // No title: malformed, skipped without retry
                (200, "<PubmedArticle><Article></Article></PubmedArticle>".to_string())
            } else if target.contains("id=3&") {
                (503, "busy".to_string())
            } else {
                (200, article("A paper"))
            }
        })
        .await;

        let client = PubMedClient::new(Duration::from_millis(1))
            .unwrap()
            .with_base_url(url)
            .with_retry_policy(2, Duration::from_millis(5));
        let documents = client.fetch("CRISPR cancer", 4).await.unwrap();

        let ids: Vec<&str> = documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "4"]);
        assert_eq!(documents[0].abstract_text, "Findings.");
        // 1, 2 once; 3 twice (retried); 4 once
        assert_eq!(efetch_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_search_failure_is_reported() {
        let url = spawn_http_server(|_| (500, "oops".to_string())).await;
        let client = PubMedClient::new(Duration::from_millis(1))
            .unwrap()
            .with_base_url(url)
            .with_retry_policy(2, Duration::from_millis(5));
        assert!(matches!(
            client.fetch("insulin", 10).await,
            Err(PipelineError::ExternalServiceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_blank_query_fetches_nothing() {
        let client = PubMedClient::new(Duration::from_millis(1))
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        assert!(client.fetch("   ", 10).await.unwrap().is_empty());
    }
}
