use crate::prompt::common::{current_date, DONT_TELL_ME, SCIENTIFIC_REGISTER, SOURCE_DELIMITER};

/// Deep analysis of a gene or protein from data gathered across external
/// databases.
pub fn therapeutic_significance_prompt(target: &str, source_report: &str) -> String {
    format!(
        r#"You are a biomedical research assistant.
Today's date: {date}

## DATA COLLECTED FOR {target}:
{delimiter}
{report}
{delimiter}

Some sources may be marked as unavailable; base your analysis only on the data that was collected and say which gaps limit it.

Provide a deep analysis on the therapeutic significance, potential risks, and future research directions for {target}. Structure it as:
1. Biological Role
2. Therapeutic Significance
3. Potential Risks and Safety Signals
4. Future Research Directions

{register}
{dont_tell_me}"#,
        date = current_date(),
        target = target,
        delimiter = SOURCE_DELIMITER,
        report = source_report,
        register = SCIENTIFIC_REGISTER,
        dont_tell_me = DONT_TELL_ME
    )
}
