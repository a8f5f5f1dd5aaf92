//! Intent classification (spec §4.5 "Intent classification"): a two-tier
//! fallback, primary LLM call then rule-based keyword heuristic, reusing
//! `kg-schema`'s `Tier`/`try_all_then_default` combinator (the same shape
//! the schema inducer's LLM fallback chain uses).

use serde::Deserialize;

use kg_core::traits::{Direction, FilterTree};
use kg_core::types::ProjectId;

use crate::types::{MergeWeights, QueryPlan, ToolArgs, ToolName};
use kg_schema::fallback::{try_all_then_default, Tier};
use kg_schema::json::parse_first_json_object;

const SYSTEM_PROMPT: &str = "Classify a query about a project's knowledge graph into one or more of \
FILTER, TRAVERSAL, SEMANTIC and respond with STRICT JSON {\"intents\": [...], \"relational_weight\": \
float, \"graph_weight\": float, \"vector_weight\": float}. Respond with the JSON object only.";

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default)]
    #[allow(dead_code)]
    intents: Vec<String>,
    relational_weight: f32,
    graph_weight: f32,
    vector_weight: f32,
}

/// Classifies `query` into a [`QueryPlan`] against `project_id` (spec
/// §4.5). `default_top_k` seeds the vector tool's `top_k` and
/// `default_similarity_top_k` names the spec's `SIMILARITY_TOP_K`
/// default. The LLM tier, when usable, supplies only the merge weights;
/// this function always builds the tool argument list itself so the
/// relational/vector tools' inputs stay structured (spec §4.5 "Must never
/// accept raw query strings").
pub async fn classify_intent(tiers: &[Tier], project_id: ProjectId, query: &str, top_k: usize) -> QueryPlan {
    let weights = classify_weights(tiers, query).await;
    build_plan(project_id, query, top_k, weights)
}

async fn classify_weights(tiers: &[Tier], query: &str) -> MergeWeights {
    if !tiers.is_empty() {
        let attempt = try_all_then_default(tiers, SYSTEM_PROMPT, query, |raw| {
            let parsed: RawClassification = parse_first_json_object(raw)?;
            Some(parsed)
        })
        .await;
        if let Ok((_, _, parsed)) = attempt {
            return MergeWeights {
                relational: parsed.relational_weight,
                graph: parsed.graph_weight,
                vector: parsed.vector_weight,
            };
        }
    }
    rule_based_weights(query)
}

/// The Tier-2 fallback: "rule-based keyword heuristic over a small
/// vocabulary: presence of count/how-many → relational; who/connected/
/// related → graph; what/explain/about → vector" (spec §4.5). Falls back
/// further to the spec's pure-semantic default when no keyword matches.
fn rule_based_weights(query: &str) -> MergeWeights {
    let q = query.to_lowercase();
    let relational_hit = q.contains("how many") || q.contains("count");
    let graph_hit = q.contains("who") || q.contains("connected") || q.contains("related");
    let vector_hit = q.contains("what") || q.contains("explain") || q.contains("about");

    match (relational_hit, graph_hit, vector_hit) {
        (true, false, false) => MergeWeights {
            relational: 1.0,
            graph: 0.0,
            vector: 0.0,
        },
        (false, true, false) => MergeWeights {
            relational: 0.0,
            graph: 1.0,
            vector: 0.0,
        },
        _ => MergeWeights::pure_semantic(),
    }
}

fn build_plan(project_id: ProjectId, query: &str, top_k: usize, weights: MergeWeights) -> QueryPlan {
    let mut tools = Vec::new();
    if weights.relational > 0.0 {
        tools.push((
            ToolName::Relational,
            ToolArgs::Relational {
                project_id,
                filter: FilterTree::And(Vec::new()),
            },
        ));
    }
    if weights.graph > 0.0 {
        tools.push((
            ToolName::Graph,
            ToolArgs::Graph {
                project_id,
                start: Vec::new(),
                relationship_types: None,
                direction: Direction::Both,
                max_hops: 2,
            },
        ));
    }
    if weights.vector > 0.0 {
        tools.push((
            ToolName::Vector,
            ToolArgs::Vector {
                project_id,
                query: query.to_string(),
                top_k,
                document_ids: None,
            },
        ));
    }
    QueryPlan { tools, merge_weights: weights }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn count_keyword_routes_to_relational() {
        let project_id = kg_core::types::new_id();
        let plan = classify_intent(&[], project_id, "How many people work at Acme?", 10).await;
        assert_eq!(plan.merge_weights.relational, 1.0);
        assert_eq!(plan.merge_weights.graph, 0.0);
        assert!(plan.tools.iter().any(|(name, _)| *name == ToolName::Relational));
    }

    #[tokio::test]
    async fn who_keyword_routes_to_graph() {
        let project_id = kg_core::types::new_id();
        let plan = classify_intent(&[], project_id, "Who is connected to Alice?", 10).await;
        assert_eq!(plan.merge_weights.graph, 1.0);
        assert!(plan.tools.iter().any(|(name, _)| *name == ToolName::Graph));
    }

    #[tokio::test]
    async fn unmatched_query_falls_back_to_pure_semantic() {
        let project_id = kg_core::types::new_id();
        let plan = classify_intent(&[], project_id, "zzz qqq", 10).await;
        assert_eq!(plan.merge_weights.vector, 1.0);
        assert_eq!(plan.tools.len(), 1);
        assert_eq!(plan.tools[0].0, ToolName::Vector);
    }
}
