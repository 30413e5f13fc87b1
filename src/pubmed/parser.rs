//! Extraction of the fields we keep from an `efetch` PubMed XML record.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{PipelineError, Result};
use crate::models::Document;

static ARTICLE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<ArticleTitle[^>]*>(.*?)</ArticleTitle>").unwrap());
static ABSTRACT_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<AbstractText([^>]*)>(.*?)</AbstractText>").unwrap());
static LABEL_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"Label="([^"]*)""#).unwrap());
static JOURNAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<Journal>(.*?)</Journal>").unwrap());
static TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<Title>(.*?)</Title>").unwrap());
static PUB_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<PubDate>(.*?)</PubDate>").unwrap());
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"<Year>(\d{4})</Year>").unwrap());
static MEDLINE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"<MedlineDate>(\d{4})").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|amp|lt|gt|quot|apos);").unwrap());

/// Builds a [`Document`] from the XML of a single PubMed article.
///
/// A record without a title is malformed. Structured abstracts are joined
/// section by section as `LABEL: text`; a missing abstract is left empty.
pub fn parse_article(id: &str, xml: &str) -> Result<Document> {
    if !xml.contains("<PubmedArticle") {
        return Err(PipelineError::malformed(id, "response holds no PubmedArticle"));
    }

    let title = ARTICLE_TITLE
        .captures(xml)
        .map(|c| clean_text(&c[1]))
        .unwrap_or_default();
    if title.is_empty() {
        return Err(PipelineError::malformed(id, "missing ArticleTitle"));
    }

    let sections: Vec<String> = ABSTRACT_TEXT
        .captures_iter(xml)
        .filter_map(|c| {
            let text = clean_text(&c[2]);
            if text.is_empty() {
                return None;
            }
            match LABEL_ATTR.captures(&c[1]) {
                Some(label) if !label[1].trim().is_empty() => {
                    Some(format!("{}: {}", decode_entities(label[1].trim()), text))
                }
                _ => Some(text),
            }
        })
        .collect();

    let journal = JOURNAL
        .captures(xml)
        .and_then(|c| c.get(1))
        .and_then(|block| TITLE.captures(block.as_str()))
        .map(|c| clean_text(&c[1]))
        .filter(|j| !j.is_empty());

    let year: Option<i32> = PUB_DATE
        .captures(xml)
        .and_then(|c| c.get(1))
        .and_then(|block| {
            YEAR.captures(block.as_str())
                .or_else(|| MEDLINE_YEAR.captures(block.as_str()))
        })
        .and_then(|c| c[1].parse().ok());

    Ok(Document {
        id: id.to_string(),
        title,
        abstract_text: sections.join("\n"),
        journal,
        year,
    })
}

/// Drops inline markup, decodes entities and collapses whitespace.
pub fn clean_text(fragment: &str) -> String {
    let without_tags = TAG.replace_all(fragment, "");
    let decoded = decode_entities(&without_tags);
    WHITESPACE.replace_all(decoded.trim(), " ").into_owned()
}

pub fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ if entity.starts_with("#x") => {
                    u32::from_str_radix(&entity[2..], 16).ok().and_then(char::from_u32)
                }
                _ => entity[1..].parse::<u32>().ok().and_then(char::from_u32),
            };
            decoded.map(String::from).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
