//! Conversational questions over the indexed papers.

use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::llm::TextGenerator;
use crate::models::{RetrievalResult, SummarySource};
use crate::prompt::chat_prompt;
use crate::vector::Retriever;
use crate::TARGET_LLM_REQUEST;

/// Papers retrieved as context for each question.
pub const CONTEXT_DOCUMENTS: usize = 4;
/// Earlier turns replayed in the prompt.
pub const HISTORY_TURNS_IN_PROMPT: usize = 6;
/// Length of the abstract excerpt shown under each reference.
pub const EXCERPT_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub answer: String,
    pub sources: Vec<RetrievalResult>,
}

impl ChatReply {
    /// The answer followed by a numbered reference list with links and
    /// abstract excerpts.
    pub fn format_with_references(&self) -> String {
        let mut out = self.answer.trim().to_string();
        if self.sources.is_empty() {
            return out;
        }

        out.push_str("\n\nReferences:");
        for (index, source) in self.sources.iter().enumerate() {
            let abstract_text = source.abstract_text();
            let mut excerpt: String = abstract_text.chars().take(EXCERPT_CHARS).collect();
            if abstract_text.chars().count() > EXCERPT_CHARS {
                excerpt.push_str("...");
            }
            let _ = write!(
                out,
                "\n[{}] {} (similarity {})\n    {}",
                index + 1,
                source.title(),
                source.similarity,
                source.url()
            );
            if !excerpt.is_empty() {
                let _ = write!(out, "\n    {}", excerpt);
            }
        }
        out
    }
}

pub struct ChatEngine {
    retriever: Retriever,
    generator: Arc<dyn TextGenerator>,
    context_documents: usize,
}

impl ChatEngine {
    pub fn new(retriever: Retriever, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            retriever,
            generator,
            context_documents: CONTEXT_DOCUMENTS,
        }
    }

    pub fn with_context_documents(mut self, context_documents: usize) -> Self {
        self.context_documents = context_documents;
        self
    }

    /// Answers `question` from the closest papers, taking earlier turns
    /// (oldest first) into account.
    pub async fn ask(&self, question: &str, history: &[(String, String)]) -> Result<ChatReply> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::Configuration("question must not be empty".to_string()));
        }

        let sources = self
            .retriever
            .retrieve_top_k(question, self.context_documents)
            .await?;
        debug!(target: TARGET_LLM_REQUEST, "Answering with {} context papers", sources.len());

        let context = format_context(&sources);
        let start = history.len().saturating_sub(HISTORY_TURNS_IN_PROMPT);
        let prompt = chat_prompt(question, &context, &history[start..]);

        let answer = self.generator.generate(&prompt).await?;
        let answer = answer.trim().to_string();
        if answer.is_empty() {
            return Err(PipelineError::StreamTerminated("model returned an empty answer".to_string()));
        }

        info!(target: TARGET_LLM_REQUEST, "Answered question of {} chars", question.len());
        Ok(ChatReply { answer, sources })
    }
}

fn format_context(sources: &[RetrievalResult]) -> String {
    if sources.is_empty() {
        return "(no papers are indexed yet)".to_string();
    }
    sources
        .iter()
        .enumerate()
        .map(|(index, source)| format!("[{}] {}", index + 1, source.source_text()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
