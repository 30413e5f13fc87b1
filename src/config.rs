use std::time::Duration;
use url::Url;

use crate::environment::{get_env_var_as_vec, get_env_var_opt, get_env_var_or};
use crate::error::{PipelineError, Result};

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost";
pub const DEFAULT_OLLAMA_PORT: u16 = 11434;
pub const DEFAULT_MODEL: &str = "llama3";
pub const DEFAULT_DATABASE_PATH: &str = "medlit.db";

/// NCBI asks for no more than three requests per second without an API key.
pub const MIN_REQUEST_DELAY: Duration = Duration::from_millis(300);

/// Runtime configuration, read from the environment with sensible defaults.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ollama_host: String,
    pub ollama_port: u16,
    pub llm_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub num_predict: i32,
    /// Longest silence tolerated between two streamed generation chunks.
    pub llm_timeout: Duration,
    pub database_path: String,
    pub ncbi_email: Option<String>,
    pub ncbi_api_key: Option<String>,
    pub max_results: usize,
    pub request_delay: Duration,
    pub summary_max_input_chars: usize,
    pub session_ttl: chrono::Duration,
    /// `key=url` data sources for target analysis, `;` separated in the environment.
    pub data_sources: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            ollama_port: DEFAULT_OLLAMA_PORT,
            llm_model: DEFAULT_MODEL.to_string(),
            embedding_model: DEFAULT_MODEL.to_string(),
            temperature: 0.3,
            num_predict: 5000,
            llm_timeout: Duration::from_secs(120),
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            ncbi_email: None,
            ncbi_api_key: None,
            max_results: 100,
            request_delay: Duration::from_millis(340),
            summary_max_input_chars: 24_000,
            session_ttl: chrono::Duration::minutes(60),
            data_sources: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = AppConfig::default();

        // OLLAMA_HOST=http://host:port is common; an explicit OLLAMA_PORT wins.
        let ollama_host = get_env_var_opt("OLLAMA_HOST").unwrap_or(defaults.ollama_host);
        let (_, host_port) = split_host_port(&ollama_host);
        let ollama_port = get_env_var_opt("OLLAMA_PORT")
            .and_then(|port| port.parse().ok())
            .or(host_port)
            .unwrap_or(defaults.ollama_port);

        let config = AppConfig {
            ollama_host,
            ollama_port,
            llm_model: get_env_var_opt("LLM_MODEL").unwrap_or(defaults.llm_model),
            embedding_model: get_env_var_opt("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            temperature: get_env_var_or("LLM_TEMPERATURE", defaults.temperature),
            num_predict: get_env_var_or("LLM_NUM_PREDICT", defaults.num_predict),
            llm_timeout: Duration::from_secs(get_env_var_or(
                "LLM_TIMEOUT_SECS",
                defaults.llm_timeout.as_secs(),
            )),
            database_path: get_env_var_opt("DATABASE_PATH").unwrap_or(defaults.database_path),
            ncbi_email: get_env_var_opt("NCBI_EMAIL"),
            ncbi_api_key: get_env_var_opt("NCBI_API_KEY"),
            max_results: get_env_var_or("PUBMED_MAX_RESULTS", defaults.max_results),
            request_delay: Duration::from_millis(get_env_var_or(
                "PUBMED_REQUEST_DELAY_MS",
                defaults.request_delay.as_millis() as u64,
            )),
            summary_max_input_chars: get_env_var_or(
                "SUMMARY_MAX_INPUT_CHARS",
                defaults.summary_max_input_chars,
            ),
            session_ttl: chrono::Duration::minutes(get_env_var_or(
                "SESSION_TTL_MINUTES",
                defaults.session_ttl.num_minutes(),
            )),
            data_sources: get_env_var_as_vec("DATA_SOURCES", ';'),
        };

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would break the pipeline's contracts.
    pub fn validate(&self) -> Result<()> {
        if self.request_delay < MIN_REQUEST_DELAY {
            return Err(PipelineError::Configuration(format!(
                "request delay of {}ms is below the {}ms minimum",
                self.request_delay.as_millis(),
                MIN_REQUEST_DELAY.as_millis()
            )));
        }
        if self.summary_max_input_chars == 0 {
            return Err(PipelineError::Configuration(
                "summary input budget must be greater than zero".to_string(),
            ));
        }
        if self.llm_model.trim().is_empty() || self.embedding_model.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "model names must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Ollama host with its scheme and without a port, as `Ollama::new` expects.
    pub fn ollama_host_url(&self) -> String {
        split_host_port(&self.ollama_host).0
    }

    /// Base URL of the Ollama HTTP API, e.g. `http://localhost:11434`.
    pub fn ollama_base_url(&self) -> String {
        format!("{}:{}", self.ollama_host_url(), self.ollama_port)
    }
}

/// Splits `host[:port]`, with or without a scheme, into `scheme://host` and
/// the port if one was given. `http` is assumed when the scheme is missing.
fn split_host_port(host: &str) -> (String, Option<u16>) {
    let host = host.trim().trim_end_matches('/');
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    };

    match Url::parse(&with_scheme) {
        Ok(url) => match url.host_str() {
            Some(name) => (format!("{}://{}", url.scheme(), name), url.port()),
            None => (with_scheme, None),
        },
        Err(_) => (with_scheme, None),
    }
}
