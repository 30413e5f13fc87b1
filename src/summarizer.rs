//! Query-focused summarization of retrieved documents.
//!
//! Budgets are counted in characters of source text, not including the
//! instruction template around it.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::llm::TextGenerator;
use crate::models::{SummaryRequest, SummaryResult, SummarySource};
use crate::prompt::{batch_summary_prompt, consolidated_summary_prompt, synthesis_prompt};
use crate::TARGET_LLM_REQUEST;

pub const NO_DOCUMENTS_MESSAGE: &str = "No documents to summarize.";
pub const FAILURE_MARKER: &str = "[SUMMARY FAILED]";

/// Reduce passes allowed before partial summaries are truncated to fit.
const MAX_REDUCE_ROUNDS: usize = 3;
const TEXT_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SummaryStrategy {
    /// Everything in one request. Input over budget is an error.
    SinglePass,
    /// Summarize budget-sized batches, then combine the partial summaries.
    MapReduce,
    /// Single pass when the input fits, map-reduce otherwise.
    Auto,
}

impl std::str::FromStr for SummaryStrategy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "single_pass" | "single" | "stuff" => Ok(SummaryStrategy::SinglePass),
            "map_reduce" | "mapreduce" => Ok(SummaryStrategy::MapReduce),
            "auto" => Ok(SummaryStrategy::Auto),
            other => Err(PipelineError::Configuration(format!(
                "unknown summary strategy: {}",
                other
            ))),
        }
    }
}

/// What a summarization produced. Every variant renders to text a user can
/// tell apart from the others.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SummaryOutcome {
    Summary(SummaryResult),
    NoDocuments,
    /// The model could not be reached or its output was unusable.
    Failed(String),
}

impl SummaryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SummaryOutcome::Summary(_))
    }
}

impl fmt::Display for SummaryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryOutcome::Summary(result) => write!(f, "{}", result.summary),
            SummaryOutcome::NoDocuments => write!(f, "{}", NO_DOCUMENTS_MESSAGE),
            SummaryOutcome::Failed(reason) => write!(f, "{} {}", FAILURE_MARKER, reason),
        }
    }
}

pub struct Summarizer {
    generator: Arc<dyn TextGenerator>,
    max_input_chars: usize,
}

impl Summarizer {
    pub fn new(generator: Arc<dyn TextGenerator>, max_input_chars: usize) -> Self {
        Self {
            generator,
            max_input_chars: max_input_chars.max(1),
        }
    }

    pub fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    /// Summarizes `sources` with respect to `query`.
    ///
    /// Only [`PipelineError::BudgetExceeded`] is returned as an error, for a
    /// single-pass request that is too large. Model failures come back as
    /// [`SummaryOutcome::Failed`].
    pub async fn summarize<S: SummarySource>(
        &self,
        sources: &[S],
        query: &str,
        strategy: SummaryStrategy,
    ) -> Result<SummaryOutcome> {
        self.summarize_request(&SummaryRequest::new(query, sources), strategy)
            .await
    }

    pub async fn summarize_request(
        &self,
        request: &SummaryRequest,
        strategy: SummaryStrategy,
    ) -> Result<SummaryOutcome> {
        if request.is_empty() {
            return Ok(SummaryOutcome::NoDocuments);
        }

        let combined = join_texts(&request.texts);
        let size = combined.chars().count();
        let fits = size <= self.max_input_chars;

        let generated = match strategy {
            SummaryStrategy::SinglePass if !fits => {
                return Err(PipelineError::BudgetExceeded {
                    size,
                    budget: self.max_input_chars,
                });
            }
            SummaryStrategy::SinglePass => self.single_pass(&request.query, &combined).await,
            SummaryStrategy::Auto if fits => self.single_pass(&request.query, &combined).await,
            SummaryStrategy::MapReduce | SummaryStrategy::Auto => self.map_reduce(request).await,
        };

        Ok(match generated {
            Ok(summary) => {
                info!(target: TARGET_LLM_REQUEST,
                    "Summarized {} documents ({} chars) into {} chars",
                    request.texts.len(), size, summary.len());
                SummaryOutcome::Summary(SummaryResult {
                    summary,
                    contributing_titles: request.titles.clone(),
                })
            }
            Err(e) => {
                error!(target: TARGET_LLM_REQUEST, "Summarization for {:?} failed: {}", request.query, e);
                SummaryOutcome::Failed(e.to_string())
            }
        })
    }

    async fn single_pass(&self, query: &str, text: &str) -> Result<String> {
        self.generate(&consolidated_summary_prompt(query, text)).await
    }

    async fn map_reduce(&self, request: &SummaryRequest) -> Result<String> {
        let query = &request.query;
        let batches = pack_batches(&request.texts, self.max_input_chars);
        if batches.len() == 1 {
            return self.single_pass(query, &join_texts(&batches[0])).await;
        }

        info!(target: TARGET_LLM_REQUEST,
            "Map-reduce over {} documents in {} batches", request.texts.len(), batches.len());

        let total = batches.len();
        let mut partials = Vec::with_capacity(total);
        for (index, batch) in batches.iter().enumerate() {
            let prompt = batch_summary_prompt(query, &join_texts(batch), index + 1, total);
            partials.push(self.generate(&prompt).await?);
        }

        let paper_count = request.texts.len();
        let mut round = 0;
        while combined_len(&partials) > self.max_input_chars {
            if round == MAX_REDUCE_ROUNDS {
                warn!(target: TARGET_LLM_REQUEST,
                    "Partial summaries still exceed the budget after {} rounds, truncating", round);
                partials = truncate_to_share(&partials, self.max_input_chars);
                break;
            }
            round += 1;

            let groups = pack_batches(&partials, self.max_input_chars);
            let mut merged = Vec::with_capacity(groups.len());
            for group in &groups {
                merged.push(self.generate(&synthesis_prompt(query, group, paper_count)).await?);
            }
            info!(target: TARGET_LLM_REQUEST,
                "Reduce round {} merged {} partial summaries into {}", round, partials.len(), merged.len());
            partials = merged;
        }

        self.generate(&synthesis_prompt(query, &partials, paper_count)).await
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let text = self.generator.generate(prompt).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::StreamTerminated(
                "model returned an empty summary".to_string(),
            ));
        }
        Ok(text.to_string())
    }
}

pub fn join_texts(texts: &[String]) -> String {
    texts.join(TEXT_SEPARATOR)
}

fn combined_len(texts: &[String]) -> usize {
    texts.iter().map(|t| t.chars().count()).sum::<usize>()
        + TEXT_SEPARATOR.len() * texts.len().saturating_sub(1)
}

/// Greedily packs texts, in order, into groups whose joined length stays
/// within `budget`. A text that alone exceeds the budget is truncated and
/// placed in its own group.
pub fn pack_batches(texts: &[String], budget: usize) -> Vec<Vec<String>> {
    let mut batches: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0;

    for text in texts {
        let mut text = text.clone();
        let mut len = text.chars().count();
        if len > budget {
            warn!(target: TARGET_LLM_REQUEST, "Truncating a {} char document to {} chars", len, budget);
            text = truncate_chars(&text, budget);
            len = budget;
        }

        let added = if current.is_empty() { len } else { len + TEXT_SEPARATOR.len() };
        if !current.is_empty() && current_len + added > budget {
            batches.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current_len += if current.is_empty() { len } else { len + TEXT_SEPARATOR.len() };
        current.push(text);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

fn truncate_to_share(texts: &[String], budget: usize) -> Vec<String> {
    let overhead = TEXT_SEPARATOR.len() * texts.len().saturating_sub(1);
    let share = (budget.saturating_sub(overhead) / texts.len().max(1)).max(1);
    texts.iter().map(|t| truncate_chars(t, share)).collect()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
