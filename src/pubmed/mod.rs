//! Literature search: PubMed E-utilities client and record parsing.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Document;

mod client;
mod parser;
mod types;

pub use self::client::{PubMedClient, RateLimiter};
pub use self::parser::{clean_text, parse_article};
pub use self::types::*;

/// A searchable collection of literature records.
#[async_trait]
pub trait LiteratureSource: Send + Sync {
    /// Up to `max_results` documents matching `query`. Records that fail to
    /// download or parse are skipped; only a failed search is an error.
    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<Document>>;
}
