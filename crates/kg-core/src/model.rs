use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::semver::Semver;
use crate::types::{
    AttributeDefinition, AttributeMap, ChunkId, DocumentId, DocumentStatus, EdgeId, EntityType,
    MetadataMap, MirrorState, NodeId, ProjectId, SchemaId,
};

/// Top-level tenant boundary (spec §3 Project). Owns every other entity by
/// foreign reference; never deleted during the core's own operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub project_id: ProjectId,
    pub project_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: MetadataMap,
}

impl Project {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_id: crate::types::new_id(),
            project_name: project_name.into(),
            created_at: Utc::now(),
            metadata: MetadataMap::new(),
        }
    }
}

/// One ingested file (spec §3 Document).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: DocumentId,
    pub project_id: ProjectId,
    pub filename: String,
    pub size_bytes: u64,
    pub page_count: u32,
    pub uploaded_at: DateTime<Utc>,
    pub status: DocumentStatus,
}

impl Document {
    pub fn new(project_id: ProjectId, filename: impl Into<String>, size_bytes: u64, page_count: u32) -> Self {
        Self {
            document_id: crate::types::new_id(),
            project_id,
            filename: filename.into(),
            size_bytes,
            page_count,
            uploaded_at: Utc::now(),
            status: DocumentStatus::Uploaded,
        }
    }
}

/// Versioned ontology type definition (spec §3 Schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub schema_id: SchemaId,
    pub project_id: ProjectId,
    pub schema_name: String,
    pub entity_type: EntityType,
    pub version: Semver,
    pub description: String,
    pub structured_attributes: Vec<AttributeDefinition>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Schema {
    pub fn new(
        project_id: ProjectId,
        schema_name: impl Into<String>,
        entity_type: EntityType,
        version: Semver,
        description: impl Into<String>,
        structured_attributes: Vec<AttributeDefinition>,
    ) -> Self {
        let schema_name = schema_name.into();
        let schema_name = match entity_type {
            EntityType::Edge => crate::types::normalize_edge_schema_name(&schema_name),
            EntityType::Node => schema_name,
        };
        Self {
            schema_id: crate::types::new_id(),
            project_id,
            schema_name,
            entity_type,
            version,
            description: description.into(),
            structured_attributes,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// The first attribute marked `required = true` with data type String;
    /// spec §4.4 step 5 ("Canonicalize entities") anchors the canonical key
    /// to this attribute.
    pub fn first_required_string_attribute(&self) -> Option<&AttributeDefinition> {
        self.structured_attributes
            .iter()
            .find(|a| a.required && matches!(a.data_type, crate::types::DataType::String))
    }
}

/// Graph vertex instance (spec §3 Node).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub project_id: ProjectId,
    pub schema_id: SchemaId,
    pub structured_data: AttributeMap,
    pub unstructured_data: serde_json::Map<String, serde_json::Value>,
    pub vector: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub metadata: MetadataMap,
    pub mirror_state: MirrorState,
}

impl Node {
    pub fn new(project_id: ProjectId, schema_id: SchemaId, structured_data: AttributeMap) -> Self {
        Self {
            node_id: crate::types::new_id(),
            project_id,
            schema_id,
            structured_data,
            unstructured_data: serde_json::Map::new(),
            vector: None,
            created_at: Utc::now(),
            metadata: MetadataMap::new(),
            mirror_state: MirrorState::None,
        }
    }
}

/// Directed graph relationship (spec §3 Edge).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub edge_id: EdgeId,
    pub project_id: ProjectId,
    pub schema_id: SchemaId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub structured_data: AttributeMap,
    pub unstructured_data: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub metadata: MetadataMap,
    pub mirror_state: MirrorState,
}

impl Edge {
    pub fn new(
        project_id: ProjectId,
        schema_id: SchemaId,
        source_node_id: NodeId,
        target_node_id: NodeId,
        structured_data: AttributeMap,
    ) -> Self {
        Self {
            edge_id: crate::types::new_id(),
            project_id,
            schema_id,
            source_node_id,
            target_node_id,
            structured_data,
            unstructured_data: serde_json::Map::new(),
            created_at: Utc::now(),
            metadata: MetadataMap::new(),
            mirror_state: MirrorState::None,
        }
    }
}

/// Text segment with semantic embedding (spec §3 Chunk).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub project_id: ProjectId,
    pub document_id: DocumentId,
    pub chunk_index: u32,
    pub text: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub fn new(
        project_id: ProjectId,
        document_id: DocumentId,
        chunk_index: u32,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            chunk_id: crate::types::new_id(),
            project_id,
            document_id,
            chunk_index,
            text: text.into(),
            embedding,
            created_at: Utc::now(),
        }
    }
}
