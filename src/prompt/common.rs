use chrono::Local;

// Common text blocks for all prompts
pub const DONT_TELL_ME: &str = r#"
Important instructions for your responses:

1. Do not narrate or describe your actions.
2. Do not summarize or restate the instructions I've given you.
3. Do not preface your responses with phrases like "Here's a summary..." or "I will now..."
4. Do not acknowledge or confirm that you understand these instructions.
5. If asked a question, answer it directly without restating the question.
6. Avoid phrases like "As an AI language model..." or similar self-referential statements.
"#;

pub const SCIENTIFIC_REGISTER: &str = r#"
Language Standards for Output:
1. Use precise scientific language suitable for a researcher or clinician.
2. Name genes, proteins, drugs and organisms exactly as the sources do.
3. Distinguish established findings from hypotheses and preliminary results.
4. Never invent study results, sample sizes, statistics or citations that are not in the provided text.
5. If the provided text does not cover part of the question, say so plainly.
"#;

/// Marks where supplied source material starts and ends.
pub const SOURCE_DELIMITER: &str = "----------";

/// Today's date, e.g. "March 4, 2025".
pub fn current_date() -> String {
    let today = Local::now();
    format!(
        "{} {}, {}",
        today.format("%B"),
        today.format("%-d"),
        today.format("%Y")
    )
}

pub fn research_context(query: &str) -> String {
    format!(
        r#"You are a biomedical research assistant.
Today's date: {date}

A biomedical researcher is investigating the topic: **"{query}"**."#,
        date = current_date(),
        query = query
    )
}
