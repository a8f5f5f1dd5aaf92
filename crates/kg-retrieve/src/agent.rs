//! `RetrievalAgent::answer` (spec §4.5 "Public operation"), grounded on
//! `codegraph_vector::rag::rag_system::RAGSystem::process_query`: classify
//! intent, dispatch tools concurrently under a per-tool timeout, merge
//! and rank, then synthesize the final answer.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use kg_core::error::Result;
use kg_core::traits::{Embedder, GraphMirror, RelationalStore};
use kg_core::types::ProjectId;

use crate::intent::classify_intent;
use crate::rank::{merge_rank, ToolOutcome};
use crate::synth::synthesize_answer;
use crate::tools::{GraphTool, RelationalTool, Tool, VectorTool};
use crate::types::{AnswerResult, ToolStatus};
use kg_schema::fallback::Tier;

/// A single prior exchange, accepted for forward-compatibility with
/// conversational follow-up queries; unused by the current one-shot
/// classification and synthesis prompts.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub query: String,
    pub answer: String,
}

/// Stage C orchestrator (spec §4.5 C5).
pub struct RetrievalAgent {
    relational: RelationalTool,
    graph: GraphTool,
    vector: VectorTool,
    classifier_tiers: Vec<Tier>,
    synthesis_tiers: Vec<Tier>,
    tool_timeout: Duration,
    answer_timeout: Duration,
    default_top_k: usize,
}

impl RetrievalAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RelationalStore>,
        mirror: Arc<dyn GraphMirror>,
        embedder: Arc<dyn Embedder>,
        classifier_tiers: Vec<Tier>,
        synthesis_tiers: Vec<Tier>,
        tool_timeout: Duration,
        answer_timeout: Duration,
        default_top_k: usize,
    ) -> Self {
        Self {
            relational: RelationalTool::new(store.clone()),
            graph: GraphTool::new(mirror),
            vector: VectorTool::new(store, embedder),
            classifier_tiers,
            synthesis_tiers,
            tool_timeout,
            answer_timeout,
            default_top_k,
        }
    }

    /// Answers `query` against `project_id` (spec §4.5). `_conversation_history`
    /// is accepted per the public operation's signature but not yet
    /// consulted by classification or synthesis (see DESIGN.md).
    #[instrument(skip(self, _conversation_history), fields(project_id = %project_id))]
    pub async fn answer(
        &self,
        project_id: ProjectId,
        query: &str,
        _conversation_history: &[ConversationTurn],
    ) -> Result<AnswerResult> {
        let budget = tokio::time::timeout(self.answer_timeout, self.answer_inner(project_id, query)).await;
        match budget {
            Ok(result) => result,
            Err(_) => Err(kg_core::error::CoreError::TimeoutExceededError(
                "answer exceeded its overall time budget".to_string(),
            )),
        }
    }

    async fn answer_inner(&self, project_id: ProjectId, query: &str) -> Result<AnswerResult> {
        let plan = classify_intent(&self.classifier_tiers, project_id, query, self.default_top_k).await;

        let mut outcomes = Vec::with_capacity(plan.tools.len());
        // Fixed iteration order (relational, graph, vector) regardless of
        // the order the classifier emitted (spec §4.5 "Ordering and
        // determinism").
        for tool_name in [crate::types::ToolName::Relational, crate::types::ToolName::Graph, crate::types::ToolName::Vector] {
            let Some((_, args)) = plan.tools.iter().find(|(name, _)| *name == tool_name) else {
                continue;
            };
            let outcome = self.run_tool_with_timeout(tool_name, args).await;
            outcomes.push(outcome);
        }

        let (ranked, tools_used) = merge_rank(outcomes, plan.merge_weights, self.default_top_k);
        let reasoning_trace = tools_used
            .iter()
            .map(|usage| format!("{}: {:?}", usage.tool.as_str(), usage.status))
            .collect();

        let (text, citations) = synthesize_answer(&self.synthesis_tiers, query, &ranked).await?;

        Ok(AnswerResult {
            text,
            citations,
            tools_used,
            reasoning_trace,
        })
    }

    async fn run_tool_with_timeout(&self, tool_name: crate::types::ToolName, args: &crate::types::ToolArgs) -> ToolOutcome {
        let run_future = match tool_name {
            crate::types::ToolName::Relational => self.relational.run(args),
            crate::types::ToolName::Graph => self.graph.run(args),
            crate::types::ToolName::Vector => self.vector.run(args),
        };
        match tokio::time::timeout(self.tool_timeout, run_future).await {
            Ok(Ok(items)) => ToolOutcome {
                tool: tool_name,
                status: ToolStatus::Ok,
                items,
            },
            Ok(Err(_)) => ToolOutcome {
                tool: tool_name,
                status: ToolStatus::Error,
                items: Vec::new(),
            },
            Err(_) => ToolOutcome {
                tool: tool_name,
                status: ToolStatus::Timeout,
                items: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kg_chunk::embedding::LocalHashEmbedder;
    use kg_core::model::Schema;
    use kg_core::semver::Semver;
    use kg_core::types::{AttributeDefinition, AttributeMap, AttributeValue, DataType, EntityType};
    use kg_store::graphmirror::SurrealGraphMirror;
    use kg_store::relational::RocksRelationalStore;

    async fn agent_over(store: Arc<RocksRelationalStore>) -> RetrievalAgent {
        let mirror = Arc::new(SurrealGraphMirror::connect_in_memory().await.unwrap());
        RetrievalAgent::new(
            store,
            mirror,
            Arc::new(LocalHashEmbedder::new(16)),
            Vec::new(),
            Vec::new(),
            Duration::from_secs(5),
            Duration::from_secs(5),
            10,
        )
    }

    #[tokio::test]
    async fn empty_project_yields_no_information_sentinel() {
        let (store, _dir) = RocksRelationalStore::open_temp().unwrap();
        let project = store.create_project("acme").await.unwrap();
        let store = Arc::new(store);
        let agent = agent_over(store).await;

        let result = agent.answer(project.project_id, "zzz nonsense qqq", &[]).await.unwrap();
        assert_eq!(result.text, crate::types::NO_INFORMATION_SENTINEL);
        assert!(result.citations.is_empty());
    }

    #[tokio::test]
    async fn semantic_query_surfaces_chunk_citations() {
        let (store, _dir) = RocksRelationalStore::open_temp().unwrap();
        let project = store.create_project("acme").await.unwrap();
        let embedder = LocalHashEmbedder::new(16);
        let vector = embedder.embed_batch(&["Alice works at Acme.".to_string()]).await.unwrap().remove(0);
        store
            .create_chunks_bulk(project.project_id, kg_core::types::new_id(), vec![(0, "Alice works at Acme.".to_string(), vector)])
            .await
            .unwrap();
        let store = Arc::new(store);
        let agent = agent_over(store).await;

        let result = agent.answer(project.project_id, "What does the document say?", &[]).await.unwrap();
        assert!(!result.citations.is_empty());
    }

    #[tokio::test]
    async fn count_query_dispatches_relational_tool() {
        let (store, _dir) = RocksRelationalStore::open_temp().unwrap();
        let project = store.create_project("acme").await.unwrap();
        let schema = Schema::new(
            project.project_id,
            "Person",
            EntityType::Node,
            Semver::initial(),
            "a person",
            vec![AttributeDefinition::new("name", DataType::String, true)],
        );
        let schema = store.create_schema(schema).await.unwrap();
        let mut data = AttributeMap::new();
        data.insert("name".to_string(), AttributeValue::Str("Alice".to_string()));
        store
            .create_node(project.project_id, schema.schema_id, data, serde_json::Map::new(), None)
            .await
            .unwrap();
        let store = Arc::new(store);
        let agent = agent_over(store).await;

        let result = agent.answer(project.project_id, "How many people are there?", &[]).await.unwrap();
        assert!(result.tools_used.iter().any(|u| u.tool == crate::types::ToolName::Relational));
        assert!(!result.citations.is_empty());
    }
}
