//! Literature research assistant: fetch PubMed abstracts, keep them in a
//! persistent embedding index, retrieve the closest matches for a query and
//! have a locally hosted model summarize or discuss them.

pub mod aggregate;
pub mod chat;
pub mod config;
pub mod db;
pub mod environment;
pub mod error;
pub mod llm;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod pubmed;
pub mod session;
pub mod summarizer;
pub mod vector;

#[cfg(test)]
pub(crate) mod testing;

pub use config::AppConfig;
pub use error::{PipelineError, Result};
pub use models::{Document, IndexEntry, RetrievalResult, Similarity, SummaryResult};
pub use chat::ChatReply;
pub use pipeline::{Assistant, FetchReport, SearchReport};
pub use summarizer::{SummaryOutcome, SummaryStrategy};
pub use vector::RetrievalMode;

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_LLM_REQUEST: &str = "llm_request";
pub const TARGET_DB: &str = "db_query";
pub const TARGET_VECTOR: &str = "vector_index";
