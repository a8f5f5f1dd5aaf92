//! `KnowledgeConstructor::build_knowledge` (spec §4.4): turn approved
//! schemas + uploaded documents into nodes, edges, chunks and embeddings.

use std::collections::BTreeMap as StdBTreeMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use kg_chunk::chunker::{chunk, ChunkConfig};
use kg_core::canon::canonical_key;
use kg_core::error::{CoreError, Result};
use kg_core::model::{Document, Schema};
use kg_core::traits::{DocumentTextSource, Embedder, GraphMirror, NerService, RelationalStore};
use kg_core::types::{AttributeMap, AttributeValue, DocumentStatus, EdgeId, EntityType, MirrorState, NodeId, ProjectId};
use kg_core::validation::validate_structured_data;

use crate::mapping::{LabelAliasTable, RelationMappingTable};
use crate::quota::EndpointQuotas;

/// Returned by one [`KnowledgeConstructor::build_knowledge`] call (spec
/// §4.4 "Returned stats").
#[derive(Debug, Clone, Default)]
pub struct ConstructionStats {
    pub documents_processed: usize,
    pub chunks_created: usize,
    pub nodes_created: usize,
    pub edges_created: usize,
    pub embeddings_generated: usize,
    pub entities_dropped_unknown_label: usize,
}

/// One resolved candidate entity before node creation (spec §4.4 step 5).
struct CandidateEntity {
    schema: Schema,
    canonical_key: String,
    structured_data: AttributeMap,
}

/// Stage B orchestrator (spec §4.4 C4). Holds `Arc` handles to every
/// external collaborator, matching the teacher's practice of threading
/// `Arc<Storage>`/`Arc<dyn LLMProvider>` into async workers rather than
/// reaching for global state (Design Notes §9, §5 "no global mutable
/// state").
pub struct KnowledgeConstructor {
    store: Arc<dyn RelationalStore>,
    mirror: Arc<dyn GraphMirror>,
    embedder: Arc<dyn Embedder>,
    ner: Arc<dyn NerService>,
    text_source: Arc<dyn DocumentTextSource>,
    quotas: EndpointQuotas,
    alias_table: LabelAliasTable,
    relation_table: RelationMappingTable,
    ner_confidence_threshold: f32,
    chunk_config: ChunkConfig,
}

impl KnowledgeConstructor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RelationalStore>,
        mirror: Arc<dyn GraphMirror>,
        embedder: Arc<dyn Embedder>,
        ner: Arc<dyn NerService>,
        text_source: Arc<dyn DocumentTextSource>,
        quotas: EndpointQuotas,
        alias_table: LabelAliasTable,
        relation_table: RelationMappingTable,
        ner_confidence_threshold: f32,
        chunk_config: ChunkConfig,
    ) -> Self {
        Self {
            store,
            mirror,
            embedder,
            ner,
            text_source,
            quotas,
            alias_table,
            relation_table,
            ner_confidence_threshold,
            chunk_config,
        }
    }

    /// Processes every Document in state UPLOADED for `project_id`,
    /// transitioning each to PROCESSED (spec §4.4 "Public operation").
    /// A failure on one document never aborts the others (spec §4.4
    /// "NER or LLM provider failures do not fail the whole project").
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn build_knowledge(&self, project_id: ProjectId) -> Result<ConstructionStats> {
        let documents = self.store.list_documents(project_id, Some(DocumentStatus::Uploaded)).await?;
        let mut stats = ConstructionStats::default();

        for document in documents {
            match self.process_document(project_id, &document).await {
                Ok(doc_stats) => {
                    stats.documents_processed += 1;
                    stats.chunks_created += doc_stats.chunks_created;
                    stats.nodes_created += doc_stats.nodes_created;
                    stats.edges_created += doc_stats.edges_created;
                    stats.embeddings_generated += doc_stats.embeddings_generated;
                    stats.entities_dropped_unknown_label += doc_stats.entities_dropped_unknown_label;
                }
                Err(err) => {
                    warn!(document_id = %document.document_id, error = %err, "document construction failed, document left unprocessed");
                }
            }
        }

        info!(?stats, "knowledge construction pass complete");
        Ok(stats)
    }

    async fn process_document(&self, project_id: ProjectId, document: &Document) -> Result<ConstructionStats> {
        let mut stats = ConstructionStats::default();

        // Step 1: read text.
        let text = self.text_source.document_text(document.document_id).await?;

        // Step 2: chunk.
        let chunk_texts = chunk(&text, self.chunk_config);

        // Step 3: embed chunks and persist, idempotent by (document_id, chunk_index).
        let already_chunked = self.store.chunk_count_for_document(document.document_id).await? > 0;
        if !already_chunked && !chunk_texts.is_empty() {
            self.quotas.embedder.acquire().await;
            let vectors = self.embedder.embed_batch(&chunk_texts).await?;
            let rows: Vec<(u32, String, Vec<f32>)> = chunk_texts
                .iter()
                .zip(vectors.iter())
                .enumerate()
                .map(|(idx, (text, vector))| (idx as u32, text.clone(), vector.clone()))
                .collect();
            stats.embeddings_generated += rows.len();
            let created = self
                .store
                .create_chunks_bulk(project_id, document.document_id, rows)
                .await?;
            stats.chunks_created += created;
        }

        // Steps 4-7: entity extraction, canonicalization, node/edge creation.
        let node_schemas = self.store.list_schemas(project_id, Some(EntityType::Node), true).await?;
        let node_schema_names: Vec<String> = node_schemas.iter().map(|s| s.schema_name.clone()).collect();
        let edge_schemas = self.store.list_schemas(project_id, Some(EntityType::Edge), true).await?;

        // Process per chunk so co-occurrence (step 7) is scoped to "within the same chunk".
        for chunk_text in &chunk_texts {
            self.extract_chunk_entities_and_relations(
                project_id,
                chunk_text,
                &node_schemas,
                &node_schema_names,
                &edge_schemas,
                &mut stats,
            )
            .await?;
        }

        // Step 8: graph mirror drain for this document's rows.
        kg_store::drain::drain_pending(self.store.as_ref(), self.mirror.as_ref(), Some(document.document_id)).await?;

        // Step 9: finalize.
        self.store.set_document_status(document.document_id, DocumentStatus::Processed).await?;

        Ok(stats)
    }

    async fn extract_chunk_entities_and_relations(
        &self,
        project_id: ProjectId,
        chunk_text: &str,
        node_schemas: &[Schema],
        node_schema_names: &[String],
        edge_schemas: &[Schema],
        stats: &mut ConstructionStats,
    ) -> Result<()> {
        self.quotas.ner.acquire().await;
        let mentions = self.ner.ner(chunk_text).await?;

        // Step 4: filter by confidence and map label -> schema.
        let mut candidates: Vec<CandidateEntity> = Vec::new();
        for mention in mentions {
            if mention.confidence < self.ner_confidence_threshold {
                continue;
            }
            let Some(schema_name) = self.alias_table.resolve(&mention.label, node_schema_names) else {
                stats.entities_dropped_unknown_label += 1;
                continue;
            };
            let schema = node_schemas
                .iter()
                .find(|s| s.schema_name == schema_name)
                .expect("resolved schema name must belong to node_schemas")
                .clone();

            let Some(attr) = schema.first_required_string_attribute() else {
                // No anchor attribute to hold the mention text; nothing to canonicalize on.
                stats.entities_dropped_unknown_label += 1;
                continue;
            };
            let mut structured_data = AttributeMap::new();
            structured_data.insert(attr.name.clone(), AttributeValue::Str(mention.text.clone()));

            let Some(key) = canonical_key(&schema, &structured_data) else {
                continue;
            };

            candidates.push(CandidateEntity {
                schema,
                canonical_key: key,
                structured_data,
            });
        }

        // Step 5: canonicalize within this chunk's candidates. Conflicting
        // non-anchor attributes aren't produced by this extraction path
        // (the anchor attribute is the only one populated), so "first
        // write wins" degenerates to "first write" since merges of the
        // same key carry identical data.
        let mut merged: StdBTreeMap<(String, String), CandidateEntity> = StdBTreeMap::new();
        for candidate in candidates {
            let key = (candidate.schema.schema_id.to_string(), candidate.canonical_key.clone());
            merged.entry(key).or_insert(candidate);
        }

        // Step 6: create-or-upsert nodes, tracking node ids for step 7.
        let mut node_ids: Vec<(String, NodeId)> = Vec::new(); // (schema_name, node_id)
        for candidate in merged.into_values() {
            let node_id = self
                .create_or_upsert_node(project_id, &candidate.schema, candidate.canonical_key.clone(), candidate.structured_data)
                .await?;
            let is_new = node_id.1;
            node_ids.push((candidate.schema.schema_name.clone(), node_id.0));
            if is_new {
                stats.nodes_created += 1;
            }
        }

        // Step 7: co-occurrence edges within this chunk, deduplicated.
        let mut seen_triples = std::collections::HashSet::new();
        for i in 0..node_ids.len() {
            for j in 0..node_ids.len() {
                if i == j {
                    continue;
                }
                let (source_schema, source_id) = &node_ids[i];
                let (target_schema, target_id) = &node_ids[j];
                let Some(edge_schema_name) = self.relation_table.edge_schema_for(source_schema, target_schema) else {
                    continue;
                };
                let Some(edge_schema) = edge_schemas.iter().find(|s| s.schema_name == edge_schema_name) else {
                    continue;
                };
                let triple = (*source_id, edge_schema.schema_id, *target_id);
                if !seen_triples.insert(triple) {
                    continue;
                }
                if self
                    .store
                    .find_edge(project_id, edge_schema.schema_id, *source_id, *target_id)
                    .await?
                    .is_some()
                {
                    continue;
                }
                let edge = self
                    .store
                    .create_edge(project_id, edge_schema.schema_id, *source_id, *target_id, AttributeMap::new())
                    .await?;
                self.mirror_edge_or_mark_pending(project_id, edge.edge_id, edge_schema, *source_id, *target_id)
                    .await?;
                stats.edges_created += 1;
            }
        }

        Ok(())
    }

    /// Returns `(node_id, was_newly_created)`.
    async fn create_or_upsert_node(
        &self,
        project_id: ProjectId,
        schema: &Schema,
        canonical_key: String,
        structured_data: AttributeMap,
    ) -> Result<(NodeId, bool)> {
        if let Some(existing) = self
            .store
            .find_node_by_canonical_key(project_id, schema.schema_id, &canonical_key)
            .await?
        {
            return Ok((existing.node_id, false));
        }

        let validated = validate_structured_data(schema, &structured_data)?;
        let embedding_input = structured_data_to_text(&validated);
        self.quotas.embedder.acquire().await;
        let vectors = self.embedder.embed_batch(&[embedding_input]).await?;
        let vector = vectors.into_iter().next();

        let node = self
            .store
            .create_node(project_id, schema.schema_id, validated, serde_json::Map::new(), vector)
            .await
            .map_err(|err| match err {
                // A race against a concurrent writer on the same canonical
                // key (spec §5 "two constructors... must not corrupt
                // state") is not fatal to this document's construction: the
                // other writer's node is authoritative.
                CoreError::ConflictError(msg) => CoreError::ConflictError(msg),
                other => other,
            })?;
        self.mirror_node_or_mark_pending(&node, schema).await?;
        Ok((node.node_id, true))
    }

    /// "After every successful node/edge write, the layer emits a mirror
    /// directive" (spec §4.1): attempt the mirror write immediately; on
    /// failure mark the row `PENDING` instead of failing the whole write
    /// (§4.1 "Mirror failures do not roll back the relational write").
    /// Step 8's drain pass replays whatever is left `PENDING` at document
    /// completion.
    async fn mirror_node_or_mark_pending(&self, node: &kg_core::model::Node, schema: &Schema) -> Result<()> {
        match self.mirror.upsert_node(node, schema).await {
            Ok(()) => self.store.set_node_mirror_state(node.node_id, MirrorState::Ok).await,
            Err(err) => {
                warn!(node_id = %node.node_id, error = %err, "graph mirror upsert failed, marking pending");
                self.store.set_node_mirror_state(node.node_id, MirrorState::Pending).await
            }
        }
    }

    async fn mirror_edge_or_mark_pending(
        &self,
        project_id: ProjectId,
        edge_id: EdgeId,
        schema: &Schema,
        source_id: NodeId,
        target_id: NodeId,
    ) -> Result<()> {
        let edge = self.store.find_edge(project_id, schema.schema_id, source_id, target_id).await?;
        let Some(edge) = edge else {
            return Ok(());
        };
        let source = self.store.get_node(source_id).await?;
        let target = self.store.get_node(target_id).await?;
        match self.mirror.upsert_edge(&edge, schema, &source, &target).await {
            Ok(()) => self.store.set_edge_mirror_state(edge_id, MirrorState::Ok).await,
            Err(err) => {
                warn!(edge_id = %edge_id, error = %err, "graph mirror upsert failed, marking pending");
                self.store.set_edge_mirror_state(edge_id, MirrorState::Pending).await
            }
        }
    }
}

/// `json_stable(structured_data)` (spec §4.4 step 6): a deterministic JSON
/// rendering of a node's structured attributes used as embedder input.
/// `AttributeMap` is a `BTreeMap`, so key order is already deterministic;
/// this only needs to render it.
fn structured_data_to_text(data: &AttributeMap) -> String {
    let as_json: StdBTreeMap<&str, String> = data.iter().map(|(k, v)| (k.as_str(), v.to_string())).collect();
    serde_json::to_string(&as_json).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kg_chunk::embedding::LocalHashEmbedder;
    use kg_core::model::Schema;
    use kg_core::semver::Semver;
    use kg_core::types::{AttributeDefinition, DataType};
    use kg_store::graphmirror::SurrealGraphMirror;
    use kg_store::relational::RocksRelationalStore;
    use std::collections::HashMap;

    use crate::ner::RuleBasedNer;
    use crate::text_source::InMemoryTextSource;

    async fn setup() -> (Arc<RocksRelationalStore>, Arc<SurrealGraphMirror>, ProjectId, tempfile::TempDir) {
        let (store, dir) = RocksRelationalStore::open_temp().unwrap();
        let mirror = SurrealGraphMirror::connect_in_memory().await.unwrap();
        let project = store.create_project("acme").await.unwrap();

        let person = Schema::new(
            project.project_id,
            "Person",
            EntityType::Node,
            Semver::initial(),
            "a person",
            vec![AttributeDefinition::new("name", DataType::String, true)],
        );
        let org = Schema::new(
            project.project_id,
            "Organization",
            EntityType::Node,
            Semver::initial(),
            "an organization",
            vec![AttributeDefinition::new("name", DataType::String, true)],
        );
        store.create_schema(person).await.unwrap();
        store.create_schema(org).await.unwrap();
        let works_at = Schema::new(
            project.project_id,
            "works at",
            EntityType::Edge,
            Semver::initial(),
            "employment relation",
            vec![],
        );
        store.create_schema(works_at).await.unwrap();

        (Arc::new(store), Arc::new(mirror), project.project_id, dir)
    }

    fn constructor(
        store: Arc<RocksRelationalStore>,
        mirror: Arc<SurrealGraphMirror>,
        text_source: Arc<InMemoryTextSource>,
    ) -> KnowledgeConstructor {
        let mut relations = HashMap::new();
        relations.insert(("Person".to_string(), "Organization".to_string()), "WORKS_AT".to_string());

        KnowledgeConstructor::new(
            store,
            mirror,
            Arc::new(LocalHashEmbedder::new(16)),
            Arc::new(RuleBasedNer),
            text_source,
            EndpointQuotas::new(1000, 1000, 1000),
            LabelAliasTable::default(),
            RelationMappingTable::new(relations),
            0.7,
            ChunkConfig::default(),
        )
    }

    #[tokio::test]
    async fn builds_people_organizations_and_edges_end_to_end() {
        let (store, mirror, project_id, _dir) = setup().await;
        let text_source = Arc::new(InMemoryTextSource::new());
        let document = store
            .create_document(project_id, "report.pdf", 1024, 1)
            .await
            .unwrap();
        text_source.insert(document.document_id, "Alice works at Acme. Bob works at Acme.");

        let constructor = constructor(store.clone(), mirror, text_source);
        let stats = constructor.build_knowledge(project_id).await.unwrap();

        assert_eq!(stats.documents_processed, 1);
        assert!(stats.nodes_created >= 3); // Alice, Bob, Acme
        assert!(stats.edges_created >= 2); // Alice->Acme, Bob->Acme

        let refreshed = store.get_document(document.document_id).await.unwrap();
        assert_eq!(refreshed.status, DocumentStatus::Processed);
    }

    #[tokio::test]
    async fn rerun_is_idempotent_on_chunk_and_node_counts() {
        let (store, mirror, project_id, _dir) = setup().await;
        let text_source = Arc::new(InMemoryTextSource::new());
        let document = store
            .create_document(project_id, "report.pdf", 1024, 1)
            .await
            .unwrap();
        text_source.insert(document.document_id, "Alice works at Acme.");

        let constructor = constructor(store.clone(), mirror, text_source);
        constructor.build_knowledge(project_id).await.unwrap();

        // The document is now PROCESSED, so a second pass finds no
        // UPLOADED documents and is a no-op.
        let stats = constructor.build_knowledge(project_id).await.unwrap();
        assert_eq!(stats.documents_processed, 0);
    }

    #[tokio::test]
    async fn canonicalization_merges_same_person_across_chunks() {
        let (store, mirror, project_id, _dir) = setup().await;
        let text_source = Arc::new(InMemoryTextSource::new());
        let document = store
            .create_document(project_id, "report.pdf", 1_000_000, 1)
            .await
            .unwrap();
        // Force two chunks by exceeding the default chunk_size with a long separator.
        let long_text = format!("Alice Smith works at Acme.\n\n{}\n\nAlice Smith works at Acme.", "x ".repeat(400));
        text_source.insert(document.document_id, long_text);

        let constructor = constructor(store.clone(), mirror, text_source);
        constructor.build_knowledge(project_id).await.unwrap();

        let person_nodes = store
            .filter_nodes(project_id, &kg_core::traits::FilterTree::SchemaNameEq("Person".to_string()))
            .await
            .unwrap();
        let alice_count = person_nodes
            .iter()
            .filter(|n| n.structured_data.get("name") == Some(&AttributeValue::Str("Alice Smith".to_string())))
            .count();
        assert_eq!(alice_count, 1);
    }

    #[tokio::test]
    async fn created_nodes_and_edges_are_mirrored_immediately() {
        let (store, mirror, project_id, _dir) = setup().await;
        let text_source = Arc::new(InMemoryTextSource::new());
        let document = store
            .create_document(project_id, "report.pdf", 1024, 1)
            .await
            .unwrap();
        text_source.insert(document.document_id, "Alice works at Acme.");

        let constructor = constructor(store.clone(), mirror, text_source);
        constructor.build_knowledge(project_id).await.unwrap();

        let person_nodes = store
            .filter_nodes(project_id, &kg_core::traits::FilterTree::SchemaNameEq("Person".to_string()))
            .await
            .unwrap();
        assert!(!person_nodes.is_empty());
        assert!(
            person_nodes.iter().all(|n| n.mirror_state == kg_core::types::MirrorState::Ok),
            "every created node should be mirrored (state OK) rather than left at its initial NONE state"
        );

        let edges = store
            .filter_edges(project_id, &kg_core::traits::FilterTree::SchemaNameEq("WORKS_AT".to_string()))
            .await
            .unwrap();
        assert!(!edges.is_empty());
        assert!(edges.iter().all(|e| e.mirror_state == kg_core::types::MirrorState::Ok));

        // Step 8's drain pass should find nothing left PENDING for this document.
        let pending_nodes = store.pending_mirror_nodes(Some(document.document_id)).await.unwrap();
        let pending_edges = store.pending_mirror_edges(Some(document.document_id)).await.unwrap();
        assert!(pending_nodes.is_empty());
        assert!(pending_edges.is_empty());
    }
}
