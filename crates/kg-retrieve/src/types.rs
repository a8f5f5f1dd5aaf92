//! Shared types for Stage C (spec §4.5).

use chrono::{DateTime, Utc};

use kg_core::traits::{Direction, FilterTree};
use kg_core::types::{DocumentId, NodeId, ProjectId};

/// Which retrieval tool a [`QueryPlan`] entry dispatches to (spec §4.5
/// "Tools").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    Relational,
    Graph,
    Vector,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::Relational => "relational",
            ToolName::Graph => "graph",
            ToolName::Vector => "vector",
        }
    }
}

/// The fully-resolved arguments one tool call runs with. Each tool only
/// ever receives the variant it understands; the orchestrator pairs tool
/// name and args in [`QueryPlan::tools`].
#[derive(Debug, Clone)]
pub enum ToolArgs {
    Relational {
        project_id: ProjectId,
        filter: FilterTree,
    },
    Graph {
        project_id: ProjectId,
        start: Vec<NodeId>,
        relationship_types: Option<Vec<String>>,
        direction: Direction,
        max_hops: u32,
    },
    Vector {
        project_id: ProjectId,
        query: String,
        top_k: usize,
        document_ids: Option<Vec<DocumentId>>,
    },
}

/// The per-tool weights used by [`crate::rank::merge_rank`] (spec §4.5
/// "Merge & rank"). Missing tools contribute 0 to an item's final score.
#[derive(Debug, Clone, Copy)]
pub struct MergeWeights {
    pub relational: f32,
    pub graph: f32,
    pub vector: f32,
}

impl MergeWeights {
    /// The low-confidence fallback weighting (spec §4.5 "Default weights
    /// if classification confidence is low").
    pub fn pure_semantic() -> Self {
        Self {
            relational: 0.0,
            graph: 0.0,
            vector: 1.0,
        }
    }

    pub fn weight_for(&self, tool: ToolName) -> f32 {
        match tool {
            ToolName::Relational => self.relational,
            ToolName::Graph => self.graph,
            ToolName::Vector => self.vector,
        }
    }
}

/// The output of intent classification (spec §4.5 "Intent classification").
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub tools: Vec<(ToolName, ToolArgs)>,
    pub merge_weights: MergeWeights,
}

/// What kind of entity a [`RetrievedItem`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Node,
    Edge,
    Chunk,
}

/// One item surfaced by a tool, already normalized to a common shape so
/// [`crate::rank::merge_rank`] can combine items from different tools
/// (spec §4.5 "Merge & rank").
#[derive(Debug, Clone)]
pub struct RetrievedItem {
    pub id: String,
    pub kind: ItemKind,
    /// This tool's raw score for the item, in `[0, 1]`.
    pub score: f32,
    pub created_at: DateTime<Utc>,
    /// Human-readable text used both for answer synthesis context and for
    /// citation rendering.
    pub text: String,
}

/// Whether a tool call completed, was skipped on timeout, or errored
/// (spec §4.5 "on timeout, the tool is skipped... and noted in
/// `tools_used[i].status = TIMEOUT`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Ok,
    Timeout,
    Error,
}

#[derive(Debug, Clone)]
pub struct ToolUsage {
    pub tool: ToolName,
    pub status: ToolStatus,
}

/// A single ranked item in the final answer context, carrying the
/// per-tool breakdown that produced its final score.
#[derive(Debug, Clone)]
pub struct RankedItem {
    pub item: RetrievedItem,
    pub final_score: f32,
}

/// `answer(project_id, query, conversation_history)`'s return value
/// (spec §4.5 "Public operation").
#[derive(Debug, Clone)]
pub struct AnswerResult {
    pub text: String,
    pub citations: Vec<String>,
    pub tools_used: Vec<ToolUsage>,
    pub reasoning_trace: Vec<String>,
}

/// The literal fallback text when every tool returns nothing (spec §4.5
/// "Answer synthesis").
pub const NO_INFORMATION_SENTINEL: &str = "I don't have information about that in this project.";
