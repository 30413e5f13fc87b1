use crate::prompt::common::{DONT_TELL_ME, SCIENTIFIC_REGISTER, SOURCE_DELIMITER};

/// Conversational question over retrieved abstracts. `history` holds earlier
/// (question, answer) pairs, oldest first.
pub fn chat_prompt(question: &str, context: &str, history: &[(String, String)]) -> String {
    let conversation = if history.is_empty() {
        "(this is the first question)".to_string()
    } else {
        history
            .iter()
            .map(|(q, a)| format!("Researcher: {}\nAssistant: {}", q, a))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!(
        r#"You are a biomedical research assistant answering questions about a collection of research papers.

CONVERSATION SO FAR:
{conversation}

RELEVANT PAPERS:
{delimiter}
{context}
{delimiter}

Answer the researcher's latest question using the papers above and the conversation so far.
If the papers do not contain the answer, say that you don't know rather than guessing.
Mention the titles of the papers you rely on.

{register}
{dont_tell_me}

Researcher: {question}
Assistant:"#,
        conversation = conversation,
        delimiter = SOURCE_DELIMITER,
        context = context,
        register = SCIENTIFIC_REGISTER,
        dont_tell_me = DONT_TELL_ME,
        question = question
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_included_in_order() {
        let history = vec![
            ("What is BRCA1?".to_string(), "A tumour suppressor.".to_string()),
            ("And BRCA2?".to_string(), "Also a tumour suppressor.".to_string()),
        ];
        let prompt = chat_prompt("How do they differ?", "Title: X", &history);
        let first = prompt.find("What is BRCA1?").unwrap();
        let second = prompt.find("And BRCA2?").unwrap();
        assert!(first < second);
        assert!(prompt.ends_with("Researcher: How do they differ?\nAssistant:"));
    }
}
