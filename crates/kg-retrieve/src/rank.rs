//! Merge & rank (spec §4.5 "Merge & rank"), grounded on
//! `codegraph_vector::rag::result_ranker::ResultRanker`: score-weighted
//! merge across sources, stable tie-break ordering, truncated to a
//! configured top-K.

use std::collections::HashMap;

use crate::types::{MergeWeights, RankedItem, RetrievedItem, ToolName, ToolStatus, ToolUsage};

/// One tool's raw output, prior to merging (spec §4.5 "Across tools, a
/// fixed iteration order (relational, graph, vector) is used when
/// merging").
pub struct ToolOutcome {
    pub tool: ToolName,
    pub status: ToolStatus,
    pub items: Vec<RetrievedItem>,
}

/// Merges per-tool results into a single ranked list (spec §4.5: "The
/// final score of an item is `Σ (weight_t · score_t)` across tools that
/// returned it (missing tools contribute 0)"), truncated to `top_k`.
/// Returns the ranked items plus the `tools_used` diagnostic list in the
/// fixed tool order regardless of which tools actually ran.
pub fn merge_rank(outcomes: Vec<ToolOutcome>, weights: MergeWeights, top_k: usize) -> (Vec<RankedItem>, Vec<ToolUsage>) {
    let mut tools_used = Vec::with_capacity(outcomes.len());

    // id -> (best representative item, accumulated weighted score)
    let mut merged: HashMap<String, (RetrievedItem, f32)> = HashMap::new();

    for outcome in &outcomes {
        tools_used.push(ToolUsage {
            tool: outcome.tool,
            status: outcome.status,
        });
        if outcome.status != ToolStatus::Ok {
            continue;
        }
        let weight = weights.weight_for(outcome.tool);
        for item in &outcome.items {
            let contribution = weight * item.score;
            merged
                .entry(item.id.clone())
                .and_modify(|(_, score)| *score += contribution)
                .or_insert_with(|| (item.clone(), contribution));
        }
    }

    let mut ranked: Vec<RankedItem> = merged
        .into_values()
        .map(|(item, final_score)| RankedItem { item, final_score })
        .collect();

    // Primary order is descending score; ties broken by created_at
    // ascending then id ascending (spec §4.5 "Ordering and determinism").
    ranked.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.item.created_at.cmp(&b.item.created_at))
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
    ranked.truncate(top_k);

    (ranked, tools_used)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ItemKind;
    use chrono::{TimeZone, Utc};

    fn item(id: &str, score: f32, created_secs: i64) -> RetrievedItem {
        RetrievedItem {
            id: id.to_string(),
            kind: ItemKind::Chunk,
            score,
            created_at: Utc.timestamp_opt(created_secs, 0).unwrap(),
            text: id.to_string(),
        }
    }

    #[test]
    fn combines_weighted_scores_across_tools() {
        let outcomes = vec![
            ToolOutcome {
                tool: ToolName::Vector,
                status: ToolStatus::Ok,
                items: vec![item("a", 0.8, 1)],
            },
            ToolOutcome {
                tool: ToolName::Relational,
                status: ToolStatus::Ok,
                items: vec![item("a", 1.0, 1)],
            },
        ];
        let weights = MergeWeights {
            relational: 0.5,
            graph: 0.0,
            vector: 0.5,
        };
        let (ranked, _) = merge_rank(outcomes, weights, 10);
        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].final_score - 0.9).abs() < 1e-5);
    }

    #[test]
    fn timed_out_tool_contributes_nothing_but_is_recorded() {
        let outcomes = vec![ToolOutcome {
            tool: ToolName::Graph,
            status: ToolStatus::Timeout,
            items: vec![item("a", 1.0, 1)],
        }];
        let (ranked, tools_used) = merge_rank(outcomes, MergeWeights::pure_semantic(), 10);
        assert!(ranked.is_empty());
        assert_eq!(tools_used[0].status, ToolStatus::Timeout);
    }

    #[test]
    fn ties_break_by_created_at_then_id() {
        let outcomes = vec![ToolOutcome {
            tool: ToolName::Vector,
            status: ToolStatus::Ok,
            items: vec![item("b", 0.5, 5), item("a", 0.5, 5), item("c", 0.5, 1)],
        }];
        let (ranked, _) = merge_rank(outcomes, MergeWeights::pure_semantic(), 10);
        assert_eq!(ranked.iter().map(|r| r.item.id.as_str()).collect::<Vec<_>>(), vec!["c", "a", "b"]);
    }

    #[test]
    fn truncates_to_top_k() {
        let items: Vec<RetrievedItem> = (0..20).map(|i| item(&i.to_string(), 1.0, i)).collect();
        let outcomes = vec![ToolOutcome {
            tool: ToolName::Vector,
            status: ToolStatus::Ok,
            items,
        }];
        let (ranked, _) = merge_rank(outcomes, MergeWeights::pure_semantic(), 10);
        assert_eq!(ranked.len(), 10);
    }
}
