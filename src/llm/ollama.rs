use async_trait::async_trait;
use futures::StreamExt;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::options::GenerationOptions;
use ollama_rs::Ollama;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::AppConfig;
use crate::error::{PipelineError, Result};
use crate::llm::stream::{StreamAccumulator, DEFAULT_MAX_RESPONSE_CHARS};
use crate::llm::TextGenerator;
use crate::TARGET_LLM_REQUEST;

const LLM_SERVICE: &str = "ollama";

/// Streams completions from a locally hosted Ollama model.
///
/// Failures to start a generation are retried with exponential backoff. Once
/// the model has started answering, a dropped connection, a silent stream or
/// a stream without its completion marker is reported as
/// [`PipelineError::StreamTerminated`] and not retried.
pub struct OllamaGenerator {
    ollama: Ollama,
    model: String,
    temperature: f32,
    num_predict: i32,
    idle_timeout: Duration,
    max_retries: u32,
    initial_backoff: Duration,
    max_response_chars: usize,
    cancel: Option<watch::Receiver<bool>>,
}

impl OllamaGenerator {
    /// `host` is a scheme and host name such as `http://localhost`.
    pub fn new(host: &str, port: u16, model: impl Into<String>) -> Result<Self> {
        let parsed = Url::parse(host)
            .map_err(|e| PipelineError::Configuration(format!("invalid Ollama host {:?}: {}", host, e)))?;
        if !parsed.has_host() {
            return Err(PipelineError::Configuration(format!(
                "invalid Ollama host {:?}: no host name",
                host
            )));
        }

        Ok(Self {
            ollama: Ollama::new(host.trim_end_matches('/').to_string(), port),
            model: model.into(),
            temperature: 0.3,
            num_predict: 5000,
            idle_timeout: Duration::from_secs(120),
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            max_response_chars: DEFAULT_MAX_RESPONSE_CHARS,
            cancel: None,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(
            Self::new(&config.ollama_host_url(), config.ollama_port, config.llm_model.clone())?
                .with_sampling(config.temperature, config.num_predict)
                .with_idle_timeout(config.llm_timeout),
        )
    }

    pub fn with_sampling(mut self, temperature: f32, num_predict: i32) -> Self {
        self.temperature = temperature;
        self.num_predict = num_predict;
        self
    }

    /// Longest wait for the model to start answering, and then for each
    /// further streamed chunk.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_retry_policy(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn with_max_response_chars(mut self, max_response_chars: usize) -> Self {
        self.max_response_chars = max_response_chars;
        self
    }

    /// While the paired sender holds `true`, running generations stop and new
    /// ones fail at once with [`PipelineError::Cancelled`]. Sending `false`
    /// re-arms the generator.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    async fn stream_once(&self, prompt: &str, cancel: &mut Option<watch::Receiver<bool>>) -> Result<String> {
        let mut request = GenerationRequest::new(self.model.clone(), prompt.to_string());
        request.options = Some(
            GenerationOptions::default()
                .temperature(self.temperature)
                .num_predict(self.num_predict),
        );

        let mut stream = tokio::select! {
            biased;
            _ = cancelled(cancel) => return Err(PipelineError::Cancelled),
            started = timeout(self.idle_timeout, self.ollama.generate_stream(request)) => match started {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(request_error(&self.model, e.to_string())),
                Err(_) => {
                    return Err(PipelineError::unavailable(
                        LLM_SERVICE,
                        format!("no answer within {} seconds", self.idle_timeout.as_secs_f32()),
                    ));
                }
            },
        };

        let mut accumulator = StreamAccumulator::new(self.max_response_chars);
        while !accumulator.is_done() {
            let next = tokio::select! {
                biased;
                _ = cancelled(cancel) => {
                    info!(target: TARGET_LLM_REQUEST, "Generation cancelled after {} chars", accumulator.text().len());
                    return Err(PipelineError::Cancelled);
                }
                next = timeout(self.idle_timeout, stream.next()) => next,
            };

            match next {
                Err(_) => {
                    return Err(PipelineError::StreamTerminated(format!(
                        "no data received for {} seconds",
                        self.idle_timeout.as_secs_f32()
                    )));
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    return Err(PipelineError::StreamTerminated(format!("connection dropped: {}", e)));
                }
                Ok(Some(Ok(responses))) => {
                    for response in responses {
                        accumulator.push(&response.response, response.done)?;
                    }
                }
            }
        }

        accumulator.finish()
    }
}

/// Ollama answers an unknown model with "model ... not found"; retrying that
/// cannot help.
fn request_error(model: &str, message: String) -> PipelineError {
    if message.contains("not found") {
        PipelineError::Configuration(format!("model {} rejected request: {}", model, message))
    } else {
        PipelineError::unavailable(LLM_SERVICE, message)
    }
}

/// Resolves while cancellation is requested; never resolves without a
/// receiver or after the sender is gone.
async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    match cancel {
        Some(rx) => {
            if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let mut cancel = self.cancel.clone();
        let mut backoff = self.initial_backoff;
        let start = Instant::now();

        debug!(target: TARGET_LLM_REQUEST, "Sending prompt of {} chars to {}", prompt.len(), self.model);

        for attempt in 1..=self.max_retries {
            match self.stream_once(prompt, &mut cancel).await {
                Ok(text) => {
                    debug!(target: TARGET_LLM_REQUEST,
                        "Received {} chars from {} in {:?}", text.len(), self.model, start.elapsed());
                    return Ok(text);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    warn!(target: TARGET_LLM_REQUEST,
                        "Generation attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, self.max_retries, e, backoff);
                    tokio::select! {
                        biased;
                        _ = cancelled(&mut cancel) => return Err(PipelineError::Cancelled),
                        _ = sleep(backoff) => {}
                    }
                    backoff *= 2;
                }
                Err(e) => {
                    error!(target: TARGET_LLM_REQUEST, "Generation with {} failed: {}", self.model, e);
                    return Err(e);
                }
            }
        }

        Err(PipelineError::unavailable(
            LLM_SERVICE,
            format!("no response after {} attempts", self.max_retries),
        ))
    }
}
