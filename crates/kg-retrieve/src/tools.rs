//! The three retrieval tools (spec §4.5 "Tools"), grounded on
//! `codegraph_vector::rag::context_retriever::ContextRetriever`'s
//! multi-source retrieval shape: one narrow trait, one implementation per
//! source, dispatched uniformly by the agent.

use async_trait::async_trait;
use std::sync::Arc;

use kg_core::error::Result;
use kg_core::traits::{Embedder, GraphMirror, RelationalStore};

use crate::types::{ItemKind, RetrievedItem, ToolArgs, ToolName};

/// One retrieval source, exposing the same 1-arg shape (spec §4.5:
/// "each exposes the same 1-arg shape `run(plan) -> ToolResult`").
#[async_trait]
pub trait Tool: Send + Sync {
    async fn run(&self, args: &ToolArgs) -> Result<Vec<RetrievedItem>>;
    fn name(&self) -> ToolName;
}

/// Structured-filter search over nodes/edges (spec §4.5 "Relational
/// tool"). Never accepts a raw query string — only a [`kg_core::traits::FilterTree`],
/// precluding injection by construction.
pub struct RelationalTool {
    store: Arc<dyn RelationalStore>,
}

impl RelationalTool {
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for RelationalTool {
    async fn run(&self, args: &ToolArgs) -> Result<Vec<RetrievedItem>> {
        let ToolArgs::Relational { project_id, filter } = args else {
            return Ok(Vec::new());
        };
        let nodes = self.store.filter_nodes(*project_id, filter).await?;
        let edges = self.store.filter_edges(*project_id, filter).await?;

        // The filter tree is evaluated as a full boolean match (it either
        // matches or it doesn't; there's no native notion of a "partial"
        // match against a typed AND/OR tree), so every returned item
        // scores the spec's "exact match" value of 1.0. See DESIGN.md.
        let mut items: Vec<RetrievedItem> = nodes
            .into_iter()
            .map(|n| RetrievedItem {
                id: n.node_id.to_string(),
                kind: ItemKind::Node,
                score: 1.0,
                created_at: n.created_at,
                text: format!("node {} ({})", n.node_id, serde_json::to_string(&n.structured_data).unwrap_or_default()),
            })
            .collect();
        items.extend(edges.into_iter().map(|e| RetrievedItem {
            id: e.edge_id.to_string(),
            kind: ItemKind::Edge,
            score: 1.0,
            created_at: e.created_at,
            text: format!("edge {} ({} -> {})", e.edge_id, e.source_node_id, e.target_node_id),
        }));
        Ok(items)
    }

    fn name(&self) -> ToolName {
        ToolName::Relational
    }
}

/// BFS graph traversal (spec §4.5 "Graph tool").
pub struct GraphTool {
    mirror: Arc<dyn GraphMirror>,
}

impl GraphTool {
    pub fn new(mirror: Arc<dyn GraphMirror>) -> Self {
        Self { mirror }
    }
}

#[async_trait]
impl Tool for GraphTool {
    async fn run(&self, args: &ToolArgs) -> Result<Vec<RetrievedItem>> {
        let ToolArgs::Graph {
            project_id,
            start,
            relationship_types,
            direction,
            max_hops,
        } = args
        else {
            return Ok(Vec::new());
        };
        let reached = self
            .mirror
            .bfs(
                *project_id,
                start,
                relationship_types.as_deref(),
                *direction,
                *max_hops,
            )
            .await?;

        Ok(reached
            .into_iter()
            .map(|(node_id, hop_distance)| RetrievedItem {
                id: node_id.to_string(),
                kind: ItemKind::Node,
                score: 1.0 / (1.0 + hop_distance as f32),
                created_at: chrono::Utc::now(),
                text: format!("node {node_id} ({hop_distance} hops away)"),
            })
            .collect())
    }

    fn name(&self) -> ToolName {
        ToolName::Graph
    }
}

/// Semantic similarity search (spec §4.5 "Vector tool").
pub struct VectorTool {
    store: Arc<dyn RelationalStore>,
    embedder: Arc<dyn Embedder>,
}

impl VectorTool {
    pub fn new(store: Arc<dyn RelationalStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }
}

#[async_trait]
impl Tool for VectorTool {
    async fn run(&self, args: &ToolArgs) -> Result<Vec<RetrievedItem>> {
        let ToolArgs::Vector {
            project_id,
            query,
            top_k,
            document_ids,
        } = args
        else {
            return Ok(Vec::new());
        };
        let vectors = self.embedder.embed_batch(std::slice::from_ref(query)).await?;
        let Some(query_vector) = vectors.into_iter().next() else {
            return Ok(Vec::new());
        };
        let document_ids = document_ids.as_deref();
        let results = self
            .store
            .similarity_search(*project_id, &query_vector, *top_k, document_ids)
            .await?;

        Ok(results
            .into_iter()
            .map(|(chunk, similarity)| RetrievedItem {
                id: chunk.chunk_id.to_string(),
                kind: ItemKind::Chunk,
                score: similarity,
                created_at: chunk.created_at,
                text: chunk.text,
            })
            .collect())
    }

    fn name(&self) -> ToolName {
        ToolName::Vector
    }
}
