//! A dependency-free reference NER implementation (spec §6 "NER
//! service... the label vocabulary is open"). Grounded on the same pattern
//! the spec itself applies to Stage A's Tier-3 fallback: an external-ML
//! capability gets a small deterministic reference implementation behind
//! its trait boundary ([`kg_core::traits::NerService`]) so the pipeline is
//! runnable and testable standalone; production deployments swap in a
//! real model server against the same trait.
//!
//! Algorithm: scan for runs of consecutive capitalized words, then
//! classify each run by organization-suffix heuristics, a tiny built-in
//! gazetteer, or fall back to a person-name guess. Confidence values are
//! fixed per classification rule so behavior is deterministic.

use async_trait::async_trait;

use kg_core::error::Result;
use kg_core::traits::{NerMention, NerService};

const ORG_SUFFIXES: &[&str] = &["Inc", "Inc.", "Corp", "Corp.", "LLC", "Ltd", "Ltd.", "Company", "Co", "Co."];

/// Organizations recognized by name regardless of suffix. Includes `Acme`,
/// the placeholder company name spec §8's own worked examples use.
const ORG_GAZETTEER: &[&str] = &[
    "acme", "acme corp", "google", "microsoft", "apple", "amazon", "openai", "anthropic",
];

const LOCATION_GAZETTEER: &[&str] = &[
    "new york", "san francisco", "london", "paris", "tokyo", "berlin", "seattle", "boston",
    "chicago", "toronto", "sydney", "united states", "canada", "germany", "france", "japan",
];

/// Capitalized words that commonly lead a sentence but are not names;
/// excluded so spans like "The Acme" don't get folded into one mention.
const LEADING_STOPWORDS: &[&str] = &[
    "the", "a", "an", "this", "that", "these", "those", "it", "they", "he", "she", "we", "you", "i",
];

/// Rule-based, deterministic NER (spec §4.4 step 4 collaborator).
pub struct RuleBasedNer;

#[async_trait]
impl NerService for RuleBasedNer {
    async fn ner(&self, text: &str) -> Result<Vec<NerMention>> {
        Ok(extract_mentions(text))
    }
}

fn extract_mentions(text: &str) -> Vec<NerMention> {
    let mut mentions = Vec::new();
    let mut word_start: Option<usize> = None;
    let mut run: Vec<(usize, usize, &str)> = Vec::new();

    let mut chars = text.char_indices().peekable();
    let mut cursor = 0usize;
    while cursor <= text.len() {
        let at_boundary = cursor == text.len() || !text[cursor..].chars().next().unwrap().is_alphanumeric();
        if word_start.is_none() && cursor < text.len() && text[cursor..].chars().next().unwrap().is_alphanumeric() {
            word_start = Some(cursor);
        }
        if at_boundary {
            if let Some(start) = word_start.take() {
                let word = &text[start..cursor];
                let starts_capital = word.chars().next().map_or(false, |c| c.is_uppercase());
                if starts_capital && !LEADING_STOPWORDS.contains(&word.to_lowercase().as_str()) {
                    run.push((start, cursor, word));
                } else {
                    flush_run(&mut run, text, &mut mentions);
                }
            }
            // sentence-ending punctuation always breaks a run: two proper
            // nouns either side of a "." are two mentions, never one.
            if cursor < text.len() && matches!(text[cursor..].chars().next(), Some('.') | Some('!') | Some('?')) {
                flush_run(&mut run, text, &mut mentions);
            }
        }
        if cursor >= text.len() {
            break;
        }
        cursor += text[cursor..].chars().next().unwrap().len_utf8();
        let _ = chars.next();
    }
    flush_run(&mut run, text, &mut mentions);
    mentions
}

fn flush_run(run: &mut Vec<(usize, usize, &str)>, text: &str, mentions: &mut Vec<NerMention>) {
    if run.is_empty() {
        return;
    }
    let start = run[0].0;
    let end = run[run.len() - 1].1;
    let span = &text[start..end];
    let last_word = run[run.len() - 1].2.trim_end_matches('.');

    let (label, confidence) = classify(span, last_word);
    mentions.push(NerMention {
        text: span.to_string(),
        label: label.to_string(),
        confidence,
        start,
        end,
    });
    run.clear();
}

fn classify(span: &str, last_word: &str) -> (&'static str, f32) {
    if ORG_SUFFIXES.iter().any(|s| s.trim_end_matches('.') == last_word) {
        return ("ORG", 0.92);
    }
    let lower = span.to_lowercase();
    if ORG_GAZETTEER.contains(&lower.as_str()) {
        return ("ORG", 0.9);
    }
    if LOCATION_GAZETTEER.contains(&lower.as_str()) {
        return ("LOC", 0.9);
    }
    ("PER", 0.75)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recognizes_people_and_organizations() {
        let ner = RuleBasedNer;
        let mentions = ner.ner("Alice works at Acme. Bob works at Acme.").await.unwrap();
        let labels: Vec<(&str, &str)> = mentions.iter().map(|m| (m.text.as_str(), m.label.as_str())).collect();
        assert!(labels.contains(&("Alice", "PER")));
        assert!(labels.contains(&("Bob", "PER")));
        assert!(labels.iter().filter(|(t, l)| *t == "Acme" && *l == "ORG").count() >= 1);
    }

    #[tokio::test]
    async fn recognizes_org_suffix() {
        let ner = RuleBasedNer;
        let mentions = ner.ner("She joined Initech Corp last year.").await.unwrap();
        assert!(mentions.iter().any(|m| m.text == "Initech Corp" && m.label == "ORG"));
    }

    #[tokio::test]
    async fn recognizes_known_locations() {
        let ner = RuleBasedNer;
        let mentions = ner.ner("They moved to New York last spring.").await.unwrap();
        assert!(mentions.iter().any(|m| m.text == "New York" && m.label == "LOC"));
    }

    #[tokio::test]
    async fn empty_text_yields_no_mentions() {
        let ner = RuleBasedNer;
        let mentions = ner.ner("").await.unwrap();
        assert!(mentions.is_empty());
    }

    #[tokio::test]
    async fn excludes_sentence_initial_stopwords() {
        let ner = RuleBasedNer;
        let mentions = ner.ner("The Acme corporation grew.").await.unwrap();
        assert!(!mentions.iter().any(|m| m.text == "The"));
    }
}
