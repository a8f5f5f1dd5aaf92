//! Answer synthesis (spec §4.5 "Answer synthesis"), grounded on
//! `codegraph_vector::rag::response_generator::ResponseGenerator`: an LLM
//! call over the ranked context with a template-based fallback when the
//! LLM is unavailable or its response carries no usable citation.

use kg_core::error::Result;

use crate::types::{RankedItem, NO_INFORMATION_SENTINEL};
use kg_schema::fallback::{try_all_then_default, Tier};

const SYSTEM_PROMPT: &str = "You answer questions about a project's knowledge graph using ONLY the \
supplied context items. Cite items inline using their bracketed id, e.g. [abc123]. If the context \
does not answer the question, say so plainly.";

/// Renders prose with inline citation markers referencing item ids (spec
/// §4.5: "produces prose with inline citation markers referencing the
/// item IDs"). Returns `(text, citations)`.
///
/// If `ranked` is empty, bypasses the LLM entirely and returns the
/// spec's literal no-information sentinel (spec §4.5 "If all tools
/// return empty sets...").
pub async fn synthesize_answer(tiers: &[Tier], query: &str, ranked: &[RankedItem]) -> Result<(String, Vec<String>)> {
    if ranked.is_empty() {
        return Ok((NO_INFORMATION_SENTINEL.to_string(), Vec::new()));
    }

    let citations: Vec<String> = ranked.iter().map(|r| r.item.id.clone()).collect();
    let user_prompt = build_user_prompt(query, ranked);

    if !tiers.is_empty() {
        let citation_set = citations.clone();
        let attempt = try_all_then_default(tiers, SYSTEM_PROMPT, &user_prompt, move |raw| {
            let mentions_a_citation = citation_set.iter().any(|id| raw.contains(id.as_str()));
            if mentions_a_citation {
                Some(raw.to_string())
            } else {
                None
            }
        })
        .await;
        if let Ok((_, _, text)) = attempt {
            return Ok((text, citations));
        }
    }

    Ok((template_fallback(ranked), citations))
}

fn build_user_prompt(query: &str, ranked: &[RankedItem]) -> String {
    let mut prompt = format!("Question: {query}\n\nContext items:\n");
    for ranked_item in ranked {
        prompt.push_str(&format!("[{}] {}\n", ranked_item.item.id, ranked_item.item.text));
    }
    prompt
}

/// Deterministic template-based synthesis used when no LLM tier is
/// configured or every tier fails (mirrors `ResponseGenerator`'s
/// `TemplateBasedSynthesis` fallback method).
fn template_fallback(ranked: &[RankedItem]) -> String {
    let mut text = String::from("Based on the available context: ");
    for (idx, ranked_item) in ranked.iter().enumerate() {
        if idx > 0 {
            text.push_str("; ");
        }
        text.push_str(&format!("{} [{}]", ranked_item.item.text, ranked_item.item.id));
    }
    text.push('.');
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemKind, RetrievedItem};
    use chrono::Utc;

    fn ranked_item(id: &str) -> RankedItem {
        RankedItem {
            item: RetrievedItem {
                id: id.to_string(),
                kind: ItemKind::Chunk,
                score: 1.0,
                created_at: Utc::now(),
                text: "Alice works at Acme".to_string(),
            },
            final_score: 1.0,
        }
    }

    #[tokio::test]
    async fn empty_context_returns_sentinel() {
        let (text, citations) = synthesize_answer(&[], "who works at acme?", &[]).await.unwrap();
        assert_eq!(text, NO_INFORMATION_SENTINEL);
        assert!(citations.is_empty());
    }

    #[tokio::test]
    async fn no_tiers_falls_back_to_template() {
        let ranked = vec![ranked_item("chunk-1")];
        let (text, citations) = synthesize_answer(&[], "who works at acme?", &ranked).await.unwrap();
        assert!(text.contains("chunk-1"));
        assert_eq!(citations, vec!["chunk-1".to_string()]);
    }
}
