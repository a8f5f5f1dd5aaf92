//! Trait seams for every external collaborator and for the persistence
//! layer itself (spec §6, Design Notes §9 "Cyclic references" / "Ad-hoc LLM
//! client objects"). `kg-construct` and `kg-retrieve` depend only on these
//! traits, never on concrete HTTP/DB types, matching
//! `codegraph_core::traits`'s seam (`CodeParser`, `VectorStore`,
//! `GraphStore`, ...).

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Chunk, Document, Edge, Node, Project, Schema};
use crate::types::{DocumentId, DocumentStatus, EntityType, NodeId, ProjectId, SchemaId};

/// A single mention returned by the NER collaborator (spec §6).
#[derive(Debug, Clone)]
pub struct NerMention {
    pub text: String,
    pub label: String,
    pub confidence: f32,
    pub start: usize,
    pub end: usize,
}

/// `extract_text(pdf_bytes) -> string` (spec §6). Out of core scope to
/// implement (PDF byte parsing is an external collaborator); this is the
/// seam production code plugs a real extractor into.
#[async_trait]
pub trait DocumentTextProvider: Send + Sync {
    async fn extract_text(&self, pdf_bytes: &[u8]) -> Result<String>;
}

/// Stage B step 1 ("Read text. Fetch extracted text for the document"),
/// composing the file-upload-transport and PDF-byte-parsing collaborators
/// §1 places out of scope behind one seam keyed by [`DocumentId`]. Failures
/// surface as `DocumentUnreadableError`.
#[async_trait]
pub trait DocumentTextSource: Send + Sync {
    async fn document_text(&self, document_id: DocumentId) -> Result<String>;
}

/// `ner(text) -> list of mentions` (spec §6).
#[async_trait]
pub trait NerService: Send + Sync {
    async fn ner(&self, text: &str) -> Result<Vec<NerMention>>;
}

/// `embed(list of strings) -> list of float arrays of dimension D` (spec
/// §6). Also used as the pure Chunker+Embedder contract of §4.2.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
}

/// One rung of the Stage A LLM fallback chain (spec §4.3, Design Notes §9:
/// "a polymorphic `LlmBackend` capability with a single method"). Takes a
/// fully-rendered prompt, returns raw text; JSON extraction and validation
/// happen above this seam in `kg-schema`.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    /// Human-readable name for `ProposalResult.source_tier` diagnostics
    /// and tracing spans.
    fn name(&self) -> &str;
}

/// The Persistence Layer (C1, spec §4.1). Every read/write against the
/// relational store of truth goes through this trait; the rest of the
/// system never sees SQL/KV details.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn create_project(&self, name: &str) -> Result<Project>;
    async fn get_project(&self, project_id: ProjectId) -> Result<Project>;
    async fn delete_project(&self, project_id: ProjectId) -> Result<()>;

    async fn create_document(
        &self,
        project_id: ProjectId,
        filename: &str,
        size_bytes: u64,
        page_count: u32,
    ) -> Result<Document>;
    async fn set_document_status(&self, document_id: DocumentId, status: DocumentStatus) -> Result<()>;
    async fn get_document(&self, document_id: DocumentId) -> Result<Document>;
    async fn list_documents(&self, project_id: ProjectId, status: Option<DocumentStatus>) -> Result<Vec<Document>>;

    async fn create_schema(&self, schema: Schema) -> Result<Schema>;
    /// Fails `SchemaInUseError` if any Node or Edge still references this
    /// schema (spec §3 "Ownership": "deleting a Schema with live
    /// Nodes/Edges is forbidden").
    async fn delete_schema(&self, schema_id: SchemaId) -> Result<()>;
    async fn list_schemas(
        &self,
        project_id: ProjectId,
        entity_type: Option<EntityType>,
        active_only: bool,
    ) -> Result<Vec<Schema>>;
    async fn get_schema(
        &self,
        project_id: ProjectId,
        schema_name: &str,
        version: Option<&str>,
    ) -> Result<Schema>;
    async fn get_schema_by_id(&self, schema_id: SchemaId) -> Result<Schema>;

    async fn create_node(
        &self,
        project_id: ProjectId,
        schema_id: SchemaId,
        structured_data: crate::types::AttributeMap,
        unstructured_data: serde_json::Map<String, serde_json::Value>,
        vector: Option<Vec<f32>>,
    ) -> Result<Node>;
    async fn get_node(&self, node_id: NodeId) -> Result<Node>;
    /// Fails `ConflictError` if any Edge still references this node as
    /// source or target (spec §3 "Ownership": "deleting a Node with live
    /// Edges is forbidden").
    async fn delete_node(&self, node_id: NodeId) -> Result<()>;
    async fn find_node_by_canonical_key(
        &self,
        project_id: ProjectId,
        schema_id: SchemaId,
        canonical_key: &str,
    ) -> Result<Option<Node>>;
    async fn update_node(&self, node: Node) -> Result<Node>;

    async fn create_edge(
        &self,
        project_id: ProjectId,
        schema_id: SchemaId,
        source_node_id: NodeId,
        target_node_id: NodeId,
        structured_data: crate::types::AttributeMap,
    ) -> Result<Edge>;
    async fn find_edge(
        &self,
        project_id: ProjectId,
        schema_id: SchemaId,
        source_node_id: NodeId,
        target_node_id: NodeId,
    ) -> Result<Option<Edge>>;

    async fn create_chunks_bulk(
        &self,
        project_id: ProjectId,
        document_id: DocumentId,
        chunks: Vec<(u32, String, Vec<f32>)>,
    ) -> Result<usize>;
    async fn chunk_count_for_document(&self, document_id: DocumentId) -> Result<usize>;

    async fn similarity_search(
        &self,
        project_id: ProjectId,
        query_vector: &[f32],
        top_k: usize,
        document_ids: Option<&[DocumentId]>,
    ) -> Result<Vec<(Chunk, f32)>>;

    /// Rows whose graph-mirror directive previously failed and is due for
    /// a replay (spec §4.1 "mirror_pending").
    async fn pending_mirror_nodes(&self, document_id: Option<DocumentId>) -> Result<Vec<Node>>;
    async fn pending_mirror_edges(&self, document_id: Option<DocumentId>) -> Result<Vec<Edge>>;
    async fn set_node_mirror_state(&self, node_id: NodeId, state: crate::types::MirrorState) -> Result<()>;
    async fn set_edge_mirror_state(&self, edge_id: crate::types::EdgeId, state: crate::types::MirrorState) -> Result<()>;

    async fn filter_nodes(&self, project_id: ProjectId, filter: &FilterTree) -> Result<Vec<Node>>;
    async fn filter_edges(&self, project_id: ProjectId, filter: &FilterTree) -> Result<Vec<Edge>>;
}

/// The one-way downstream graph mirror (spec §4.1 "Graph mirror
/// protocol"). `MERGE`-style idempotent upsert keyed on node id /
/// `(source, edge_schema_name, target)`.
#[async_trait]
pub trait GraphMirror: Send + Sync {
    async fn upsert_node(&self, node: &Node, schema: &Schema) -> Result<()>;
    async fn upsert_edge(&self, edge: &Edge, schema: &Schema, source: &Node, target: &Node) -> Result<()>;

    /// BFS traversal from a start set of node ids (spec §4.5 graph tool).
    async fn bfs(
        &self,
        project_id: ProjectId,
        start: &[NodeId],
        relationship_types: Option<&[String]>,
        direction: Direction,
        max_hops: u32,
    ) -> Result<Vec<(NodeId, u32)>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// A structured filter tree for the relational tool (spec §4.5: "Must
/// never accept raw query strings... a structured filter tree, not SQL").
#[derive(Debug, Clone)]
pub enum FilterTree {
    Eq { field: String, value: crate::types::AttributeValue },
    In { field: String, values: Vec<crate::types::AttributeValue> },
    SchemaNameEq(String),
    And(Vec<FilterTree>),
    Or(Vec<FilterTree>),
}
