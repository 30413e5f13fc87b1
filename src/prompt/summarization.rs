use crate::prompt::common::{research_context, DONT_TELL_ME, SCIENTIFIC_REGISTER, SOURCE_DELIMITER};

/// Single request summarizing every supplied abstract, scoped to `query`.
pub fn consolidated_summary_prompt(query: &str, text: &str) -> String {
    format!(
        r#"{context}

Based on the collection of abstracts provided below, write a **detailed and focused consolidated summary** that:
- Addresses the research question or topic directly.
- Highlights key findings, biological mechanisms, methods, and conclusions relevant to the query.
- Avoids including information not directly related to the topic.
- Uses scientific language suitable for a researcher or clinician.

TEXT:
{delimiter}
{text}
{delimiter}

{register}
{dont_tell_me}

CONSOLIDATED SUMMARY (focused on the query: "{query}"):"#,
        context = research_context(query),
        delimiter = SOURCE_DELIMITER,
        text = text,
        register = SCIENTIFIC_REGISTER,
        dont_tell_me = DONT_TELL_ME,
        query = query
    )
}

/// Map step: one batch out of several. Partial summaries are combined later,
/// so the model is asked to keep anything relevant rather than to conclude.
pub fn batch_summary_prompt(query: &str, text: &str, batch: usize, total: usize) -> String {
    format!(
        r#"{context}

The abstracts below are batch {batch} of {total}. Write a focused partial summary of ONLY this batch that:
- Keeps every finding, mechanism, method and conclusion relevant to the query.
- Notes which paper each key finding comes from, using its title.
- Notes disagreements between papers in this batch.
- Leaves out anything not related to the query.

TEXT:
{delimiter}
{text}
{delimiter}

{register}
{dont_tell_me}

PARTIAL SUMMARY (batch {batch} of {total}, focused on the query: "{query}"):"#,
        context = research_context(query),
        batch = batch,
        total = total,
        delimiter = SOURCE_DELIMITER,
        text = text,
        register = SCIENTIFIC_REGISTER,
        dont_tell_me = DONT_TELL_ME,
        query = query
    )
}

/// Reduce step: merges partial summaries into one literature synthesis.
pub fn synthesis_prompt(query: &str, partial_summaries: &[String], paper_count: usize) -> String {
    format!(
        r#"{context}

Synthesize the partial summaries below, which together cover {count} papers, into one consolidated summary about '{query}'.

PARTIAL SUMMARIES:
{delimiter}
{summaries}
{delimiter}

Structure your response with:
1. Consensus Findings (with paper count)
2. Contradictory Evidence
3. Research Gaps
4. Clinical/Research Implications

{register}
{dont_tell_me}

CONSOLIDATED SUMMARY (focused on the query: "{query}"):"#,
        context = research_context(query),
        count = paper_count,
        query = query,
        delimiter = SOURCE_DELIMITER,
        summaries = partial_summaries.join("\n\n---\n\n"),
        register = SCIENTIFIC_REGISTER,
        dont_tell_me = DONT_TELL_ME
    )
}
