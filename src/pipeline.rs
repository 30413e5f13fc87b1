//! The research assistant: fetch and store papers, then search, summarize
//! or chat over everything stored so far.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::aggregate::{format_source_report, Aggregator, SourceRequest};
use crate::chat::{ChatEngine, ChatReply};
use crate::config::AppConfig;
use crate::db::Database;
use crate::error::{PipelineError, Result};
use crate::llm::{OllamaGenerator, TextGenerator};
use crate::models::RetrievalResult;
use crate::prompt::therapeutic_significance_prompt;
use crate::pubmed::{LiteratureSource, PubMedClient};
use crate::session::{Session, SessionStore};
use crate::summarizer::{Summarizer, SummaryOutcome, SummaryStrategy};
use crate::vector::{DocumentStore, Embedder, OllamaEmbedder, RetrievalMode, Retriever};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub fetched: usize,
    pub added: usize,
}

/// Outcome of a search as a user should see it: matches, a genuine absence
/// of matches, or a failure to search at all.
#[derive(Debug, Clone, Serialize)]
pub enum SearchReport {
    Found(Vec<RetrievalResult>),
    NoResults,
    Failed(String),
}

impl SearchReport {
    pub fn results(&self) -> &[RetrievalResult] {
        match self {
            SearchReport::Found(results) => results,
            _ => &[],
        }
    }
}

/// Index statistics.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub documents: i64,
    pub embedding_model: Option<String>,
    pub embedding_dimension: Option<usize>,
    pub active_sessions: usize,
}

pub struct Assistant {
    source: Arc<dyn LiteratureSource>,
    store: DocumentStore,
    retriever: Retriever,
    summarizer: Summarizer,
    chat: ChatEngine,
    generator: Arc<dyn TextGenerator>,
    sessions: SessionStore,
    max_results: usize,
}

impl Assistant {
    pub async fn new(
        db: Database,
        source: Arc<dyn LiteratureSource>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn TextGenerator>,
        config: &AppConfig,
    ) -> Result<Self> {
        let store = DocumentStore::open(db.clone(), embedder.clone()).await?;
        let retriever = Retriever::new(db, embedder);
        Ok(Self {
            source,
            store,
            chat: ChatEngine::new(retriever.clone(), generator.clone()),
            retriever,
            summarizer: Summarizer::new(generator.clone(), config.summary_max_input_chars),
            generator,
            sessions: SessionStore::new(config.session_ttl),
            max_results: config.max_results,
        })
    }

    /// Wires up PubMed, Ollama and the on-disk index from configuration.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let db = Database::new(&config.database_path).await?;
        let source = Arc::new(PubMedClient::from_config(config)?);
        let embedder = Arc::new(OllamaEmbedder::from_config(config));
        let generator = Arc::new(OllamaGenerator::from_config(config)?);
        Self::new(db, source, embedder, generator, config).await
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn start_session(&self) -> Session {
        self.sessions.create().await
    }

    /// Fetches up to `max_results` papers (the configured default when
    /// `None`) and stores the new ones.
    pub async fn fetch_and_store(
        &self,
        query: &str,
        max_results: Option<usize>,
        session: Option<Uuid>,
    ) -> Result<FetchReport> {
        let max_results = max_results.unwrap_or(self.max_results);
        let documents = self.source.fetch(query, max_results).await?;
        let added = self.store.store(&documents).await?;

        if let Some(id) = session {
            if self.sessions.update(id, |s| s.record_fetch(query)).await.is_none() {
                warn!("Session {} is unknown or expired; fetch not recorded", id);
            }
        }

        info!("Fetched {} papers for {:?}, {} new", documents.len(), query, added);
        Ok(FetchReport {
            fetched: documents.len(),
            added,
        })
    }

    /// Retrieves with `mode`, reporting a query nothing matched as
    /// [`PipelineError::EmptyResult`].
    pub async fn retrieve(&self, query: &str, mode: RetrievalMode) -> Result<Vec<RetrievalResult>> {
        let results = self.retriever.retrieve(query, mode).await?;
        if results.is_empty() {
            return Err(PipelineError::EmptyResult(format!("nothing in the index matched {:?}", query)));
        }
        Ok(results)
    }

    pub async fn search(&self, query: &str, mode: RetrievalMode) -> SearchReport {
        match self.retrieve(query, mode).await {
            Ok(results) => SearchReport::Found(results),
            Err(PipelineError::EmptyResult(reason)) => {
                info!("No results: {}", reason);
                SearchReport::NoResults
            }
            Err(e) => {
                error!("Search for {:?} failed: {}", query, e);
                SearchReport::Failed(e.to_string())
            }
        }
    }

    /// Retrieves with `mode` and summarizes what was found. A failed search is
    /// reported as a failed summary rather than as "no documents".
    pub async fn summarize_query(
        &self,
        query: &str,
        mode: RetrievalMode,
        strategy: SummaryStrategy,
    ) -> Result<SummaryOutcome> {
        match self.search(query, mode).await {
            SearchReport::Found(results) => self.summarizer.summarize(&results, query, strategy).await,
            SearchReport::NoResults => Ok(SummaryOutcome::NoDocuments),
            SearchReport::Failed(reason) => Ok(SummaryOutcome::Failed(format!("retrieval failed: {}", reason))),
        }
    }

    /// Answers a question in the context of a session's earlier turns and
    /// records the new turn.
    pub async fn chat(&self, session: Uuid, question: &str) -> Result<ChatReply> {
        let history = self
            .sessions
            .get(session)
            .await
            .ok_or_else(|| PipelineError::Configuration(format!("unknown or expired session {}", session)))?
            .recent_history(crate::chat::HISTORY_TURNS_IN_PROMPT);

        let reply = self.chat.ask(question, &history).await?;
        self.record_turn(session, question, &reply.answer).await;
        Ok(reply)
    }

    /// Appends a turn to the session's history. Returns `false`, with a
    /// warning, when the session expired while the answer was generated.
    async fn record_turn(&self, session: Uuid, question: &str, answer: &str) -> bool {
        let recorded = self
            .sessions
            .update(session, |s| s.record_turn(question, answer))
            .await
            .is_some();
        if !recorded {
            warn!("Session {} is unknown or expired; chat turn not recorded", session);
        }
        recorded
    }

    /// Gathers data on `target` from every source and asks the model for a
    /// therapeutic significance analysis.
    pub async fn therapeutic_analysis(
        &self,
        aggregator: &Aggregator,
        sources: &[SourceRequest],
        target: &str,
    ) -> Result<String> {
        let results = aggregator.fetch_all(sources, target).await;
        if !sources.is_empty() && results.values().all(|outcome| !outcome.is_success()) {
            return Err(PipelineError::unavailable(
                "data sources",
                format!("none of the {} sources answered", sources.len()),
            ));
        }
        let report = format_source_report(target, &results);
        self.generator
            .generate(&therapeutic_significance_prompt(target, &report))
            .await
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let db = self.store.database();
        let (documents, embedding_model) = db.collect_stats().await?;
        Ok(IndexStats {
            documents,
            embedding_model,
            embedding_dimension: db.embedding_dimension().await?,
            active_sessions: self.sessions.len().await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{doc, FailingEmbedder, FakeSource, HashingEmbedder, ScriptedGenerator};
    use tempfile::TempDir;

    fn papers() -> Vec<crate::models::Document> {
        vec![
            doc("1", "CRISPR screening in cancer"),
            doc("2", "CRISPR base editors"),
            doc("3", "Statins and cholesterol"),
        ]
    }

    async fn assistant(
        dir: &TempDir,
        source: FakeSource,
        embedder: Arc<dyn Embedder>,
        generator: Arc<ScriptedGenerator>,
    ) -> Assistant {
        let path = dir.path().join("index.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        Assistant::new(db, Arc::new(source), embedder, generator, &AppConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_store_and_search() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::default());
        let assistant = assistant(&dir, FakeSource::new(papers()), Arc::new(HashingEmbedder::default()), generator).await;
        let session = assistant.start_session().await;

        let report = assistant
            .fetch_and_store("CRISPR", None, Some(session.id))
            .await
            .unwrap();
        assert_eq!(report, FetchReport { fetched: 3, added: 3 });
        let again = assistant.fetch_and_store("CRISPR", None, None).await.unwrap();
        assert_eq!(again, FetchReport { fetched: 3, added: 0 });
        assert!(assistant.sessions().get(session.id).await.unwrap().has_fetched());

        match assistant.search("CRISPR cancer", RetrievalMode::TopK { k: 2 }).await {
            SearchReport::Found(results) => {
                assert_eq!(results.len(), 2);
                assert_eq!(results[0].document_id(), "1");
            }
            other => panic!("unexpected report {:?}", other),
        }

        let stats = assistant.stats().await.unwrap();
        assert_eq!(stats.documents, 3);
        assert_eq!(stats.embedding_model.as_deref(), Some("hashing-test-embedder"));
        assert_eq!(stats.embedding_dimension, Some(512));
    }

    #[tokio::test]
    async fn test_no_results_and_failure_stay_distinct() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::default());
        let empty = assistant(&dir, FakeSource::new(vec![]), Arc::new(HashingEmbedder::default()), generator.clone()).await;
        assert!(matches!(
            empty.search("anything", RetrievalMode::TopK { k: 5 }).await,
            SearchReport::NoResults
        ));
        assert_eq!(
            empty
                .summarize_query("anything", RetrievalMode::TopK { k: 5 }, SummaryStrategy::Auto)
                .await
                .unwrap(),
            SummaryOutcome::NoDocuments
        );

        // Same populated index, but the embedding service is down at query time.
        let dir = TempDir::new().unwrap();
        let healthy = assistant(&dir, FakeSource::new(papers()), Arc::new(HashingEmbedder::default()), generator.clone()).await;
        healthy.fetch_and_store("CRISPR", None, None).await.unwrap();
        let db = healthy.store.database().clone();
        let broken = Assistant::new(
            db,
            Arc::new(FakeSource::new(vec![])),
            Arc::new(FailingEmbedder),
            generator,
            &AppConfig::default(),
        )
        .await
        .unwrap();

        assert!(matches!(
            broken.search("CRISPR", RetrievalMode::TopK { k: 5 }).await,
            SearchReport::Failed(_)
        ));
        let outcome = broken
            .summarize_query("CRISPR", RetrievalMode::TopK { k: 5 }, SummaryStrategy::Auto)
            .await
            .unwrap();
        assert!(matches!(outcome, SummaryOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_fetch_outage_is_an_error() {
        let dir = TempDir::new().unwrap();
        let assistant = assistant(
            &dir,
            FakeSource::unreachable(),
            Arc::new(HashingEmbedder::default()),
            Arc::new(ScriptedGenerator::default()),
        )
        .await;
        assert!(matches!(
            assistant.fetch_and_store("CRISPR", Some(5), None).await,
            Err(PipelineError::ExternalServiceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_summarize_query_uses_retrieved_papers() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok("CRISPR summary".into())]));
        let assistant = assistant(&dir, FakeSource::new(papers()), Arc::new(HashingEmbedder::default()), generator.clone()).await;
        assistant.fetch_and_store("CRISPR", None, None).await.unwrap();

        let outcome = assistant
            .summarize_query(
                "CRISPR",
                RetrievalMode::Threshold { min_similarity: 0.0, max_k: 2 },
                SummaryStrategy::SinglePass,
            )
            .await
            .unwrap();
        match outcome {
            SummaryOutcome::Summary(result) => {
                assert_eq!(result.summary, "CRISPR summary");
                assert_eq!(result.contributing_titles.len(), 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(generator.prompts()[0].contains("\"CRISPR\""));
    }

    #[tokio::test]
    async fn test_chat_records_turns_in_session() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("First answer.".into()),
            Ok("Second answer.".into()),
        ]));
        let assistant = assistant(&dir, FakeSource::new(papers()), Arc::new(HashingEmbedder::default()), generator.clone()).await;
        assistant.fetch_and_store("CRISPR", None, None).await.unwrap();
        let session = assistant.start_session().await;

        assistant.chat(session.id, "What is CRISPR used for?").await.unwrap();
        let reply = assistant.chat(session.id, "And base editors?").await.unwrap();
        assert_eq!(reply.answer, "Second answer.");

        let history = assistant.sessions().get(session.id).await.unwrap().chat_history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].answer, "First answer.");
        assert!(generator.prompts()[1].contains("What is CRISPR used for?"));

        assert!(assistant.chat(Uuid::new_v4(), "Hello?").await.is_err());
    }

    #[tokio::test]
    async fn test_turn_for_vanished_session_is_not_recorded() {
        let dir = TempDir::new().unwrap();
        let assistant = assistant(
            &dir,
            FakeSource::new(vec![]),
            Arc::new(HashingEmbedder::default()),
            Arc::new(ScriptedGenerator::default()),
        )
        .await;
        let session = assistant.start_session().await;

        assert!(assistant.record_turn(session.id, "Q1", "A1").await);
        assistant.sessions().remove(session.id).await;
        assert!(!assistant.record_turn(session.id, "Q2", "A2").await);
        assert!(assistant.sessions().get(session.id).await.is_none());
    }

    #[tokio::test]
    async fn test_unmatched_query_is_an_empty_result() {
        let dir = TempDir::new().unwrap();
        let assistant = assistant(
            &dir,
            FakeSource::new(papers()),
            Arc::new(HashingEmbedder::default()),
            Arc::new(ScriptedGenerator::default()),
        )
        .await;

        assert!(matches!(
            assistant.retrieve("CRISPR", RetrievalMode::TopK { k: 3 }).await,
            Err(PipelineError::EmptyResult(_))
        ));

        assistant.fetch_and_store("CRISPR", None, None).await.unwrap();
        let strict = RetrievalMode::Threshold { min_similarity: 1.0, max_k: 3 };
        assert!(matches!(
            assistant.retrieve("influenza vaccine uptake", strict).await,
            Err(PipelineError::EmptyResult(_))
        ));
        assert!(matches!(
            assistant.search("influenza vaccine uptake", strict).await,
            SearchReport::NoResults
        ));
        assert_eq!(
            assistant
                .retrieve("CRISPR", RetrievalMode::TopK { k: 3 })
                .await
                .unwrap()
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn test_therapeutic_analysis_requires_some_data() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::default());
        let assistant = assistant(&dir, FakeSource::new(vec![]), Arc::new(HashingEmbedder::default()), generator.clone()).await;
        let aggregator = Aggregator::new().unwrap();

        let sources = vec![SourceRequest::new("invalid", "not a url")];
        assert!(assistant
            .therapeutic_analysis(&aggregator, &sources, "TP53")
            .await
            .is_err());
        assert!(generator.prompts().is_empty());
    }
}
