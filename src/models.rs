//! Core records that flow through the pipeline.
//!
//! A [`Document`] is created by the fetcher and never changes afterwards. The
//! store turns each new document into an [`IndexEntry`]; retrieval produces
//! ephemeral [`RetrievalResult`]s that carry a [`Similarity`] score.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const META_DOCUMENT_ID: &str = "document_id";
pub const META_TITLE: &str = "title";
pub const META_ABSTRACT: &str = "abstract";
pub const META_JOURNAL: &str = "journal";
pub const META_YEAR: &str = "year";
pub const META_SIMILARITY: &str = "similarity_score";

pub const PUBMED_ARTICLE_URL: &str = "https://pubmed.ncbi.nlm.nih.gov";

/// A fetched literature record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// External identifier (a PubMed id); the deduplication key.
    pub id: String,
    pub title: String,
    /// May be empty: plenty of PubMed records have no abstract.
    pub abstract_text: String,
    pub journal: Option<String>,
    pub year: Option<i32>,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, abstract_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            abstract_text: abstract_text.into(),
            journal: None,
            year: None,
        }
    }

    /// The text the embedding model sees for this document.
    pub fn embedding_text(&self) -> String {
        format!("Title: {}\nAbstract: {}", self.title, self.abstract_text)
    }

    pub fn metadata(&self) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        metadata.insert(META_DOCUMENT_ID.to_string(), self.id.clone());
        metadata.insert(META_TITLE.to_string(), self.title.clone());
        metadata.insert(META_ABSTRACT.to_string(), self.abstract_text.clone());
        if let Some(journal) = &self.journal {
            metadata.insert(META_JOURNAL.to_string(), journal.clone());
        }
        if let Some(year) = self.year {
            metadata.insert(META_YEAR.to_string(), year.to_string());
        }
        metadata
    }

    pub fn url(&self) -> String {
        article_url(&self.id)
    }
}

pub fn article_url(id: &str) -> String {
    format!("{}/{}/", PUBMED_ARTICLE_URL, id)
}

/// The persisted unit of the vector index. At most one per `document_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub document_id: String,
    pub embedding: Vec<f32>,
    pub metadata: BTreeMap<String, String>,
}

impl IndexEntry {
    pub fn new(document: &Document, embedding: Vec<f32>) -> Self {
        Self {
            document_id: document.id.clone(),
            embedding,
            metadata: document.metadata(),
        }
    }

    pub fn title(&self) -> &str {
        self.metadata.get(META_TITLE).map(String::as_str).unwrap_or("")
    }
}

/// Relevance of an indexed document to a query, always in `[0, 1]` where
/// higher means more relevant.
///
/// Derived from cosine similarity as `(1 + cos) / 2`. Distances are never
/// exposed by the retriever, so a threshold is always "at least this similar".
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Similarity(f32);

impl Similarity {
    /// Maps a cosine value in `[-1, 1]` onto `[0, 1]`.
    pub fn from_cosine(cosine: f32) -> Self {
        if cosine.is_nan() {
            return Similarity(0.0);
        }
        Similarity(((1.0 + cosine) / 2.0).clamp(0.0, 1.0))
    }

    pub fn value(self) -> f32 {
        self.0
    }

    pub fn meets(self, threshold: f32) -> bool {
        self.0 >= threshold
    }
}

impl fmt::Display for Similarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// A query-time match. The score is also copied into `metadata` under
/// `similarity_score` for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub metadata: BTreeMap<String, String>,
    pub similarity: Similarity,
}

impl RetrievalResult {
    pub fn new(mut metadata: BTreeMap<String, String>, similarity: Similarity) -> Self {
        metadata.insert(META_SIMILARITY.to_string(), similarity.to_string());
        Self {
            metadata,
            similarity,
        }
    }

    pub fn document_id(&self) -> &str {
        self.field(META_DOCUMENT_ID)
    }

    pub fn title(&self) -> &str {
        self.field(META_TITLE)
    }

    pub fn abstract_text(&self) -> &str {
        self.field(META_ABSTRACT)
    }

    pub fn url(&self) -> String {
        article_url(self.document_id())
    }

    fn field(&self, key: &str) -> &str {
        self.metadata.get(key).map(String::as_str).unwrap_or("")
    }
}

/// Anything the summarizer can read: a title and a body of text.
pub trait SummarySource {
    fn source_title(&self) -> &str;
    fn source_text(&self) -> String;
}

impl SummarySource for Document {
    fn source_title(&self) -> &str {
        &self.title
    }

    fn source_text(&self) -> String {
        self.embedding_text()
    }
}

impl SummarySource for RetrievalResult {
    fn source_title(&self) -> &str {
        self.title()
    }

    fn source_text(&self) -> String {
        format!("Title: {}\nAbstract: {}", self.title(), self.abstract_text())
    }
}

/// Ordered source texts plus the focus query, ready for the summarizer.
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub query: String,
    pub titles: Vec<String>,
    pub texts: Vec<String>,
}

impl SummaryRequest {
    pub fn new<S: SummarySource>(query: &str, sources: &[S]) -> Self {
        Self {
            query: query.to_string(),
            titles: sources.iter().map(|s| s.source_title().to_string()).collect(),
            texts: sources.iter().map(SummarySource::source_text).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// A consolidated summary and the titles of the documents behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryResult {
    pub summary: String,
    pub contributing_titles: Vec<String>,
}
