//! SurrealDB-backed graph mirror (spec §4.1 "Graph mirror protocol").
//! Grounded on `codegraph_graph::surrealdb_storage::SurrealDbStorage`:
//! connect via `Surreal::new::<Any>`, select namespace/database, define a
//! couple of flexible (`SCHEMALESS`) tables, and read/write through raw
//! `.query()` calls with bound parameters rather than the typed
//! query-builder surface, matching the teacher's own choice for this
//! storage backend.
//!
//! Nodes and edges are kept in two flat tables (`nodes`, `edges`) rather
//! than one table per schema, since the mirror only needs to answer BFS
//! traversal queries (spec §4.5 graph tool) and never needs schema-typed
//! column definitions the way the relational store does.

use std::sync::Arc;
use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;

use kg_core::error::{CoreError, Result};
use kg_core::model::{Edge, Node, Schema};
use kg_core::traits::{Direction, GraphMirror};
use kg_core::types::{AttributeValue, NodeId, ProjectId};

#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    project_id: String,
    schema_id: String,
    schema_name: String,
    structured_data: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct EdgeRecord {
    project_id: String,
    edge_type: String,
    from_node: String,
    to_node: String,
    structured_data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct NeighborRow {
    neighbor: String,
}

/// One-way mirror of the relational store, eventually consistent (spec
/// §4.1: mirror writes never block the relational write path and may be
/// retried by the background drain task).
pub struct SurrealGraphMirror {
    db: Arc<Surreal<Any>>,
}

impl SurrealGraphMirror {
    pub async fn connect(
        connection: &str,
        namespace: &str,
        database: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self> {
        let db = Surreal::new::<Any>(connection)
            .await
            .map_err(|e| CoreError::GraphMirrorError(format!("connect failed: {e}")))?;

        if let (Some(user), Some(pass)) = (username, password) {
            db.signin(Root {
                username: user,
                password: pass,
            })
            .await
            .map_err(|e| CoreError::GraphMirrorError(format!("authentication failed: {e}")))?;
        }

        db.use_ns(namespace)
            .use_db(database)
            .await
            .map_err(|e| CoreError::GraphMirrorError(format!("failed to select namespace/database: {e}")))?;

        let mirror = Self { db: Arc::new(db) };
        mirror.initialize_schema().await?;
        Ok(mirror)
    }

    /// In-memory mirror for tests, via SurrealDB's embedded `mem://` engine.
    pub async fn connect_in_memory() -> Result<Self> {
        Self::connect("mem://", "kg", "kg", None, None).await
    }

    async fn initialize_schema(&self) -> Result<()> {
        self.db
            .query(
                r#"
                DEFINE TABLE IF NOT EXISTS nodes SCHEMALESS;
                DEFINE TABLE IF NOT EXISTS edges SCHEMALESS;
                DEFINE INDEX IF NOT EXISTS idx_nodes_project ON TABLE nodes COLUMNS project_id;
                DEFINE INDEX IF NOT EXISTS idx_edges_from ON TABLE edges COLUMNS from_node;
                DEFINE INDEX IF NOT EXISTS idx_edges_to ON TABLE edges COLUMNS to_node;
                DEFINE INDEX IF NOT EXISTS idx_edges_type ON TABLE edges COLUMNS edge_type;
                "#,
            )
            .await
            .map_err(|e| CoreError::GraphMirrorError(format!("schema init failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl GraphMirror for SurrealGraphMirror {
    async fn upsert_node(&self, node: &Node, schema: &Schema) -> Result<()> {
        let record = NodeRecord {
            project_id: node.project_id.to_string(),
            schema_id: node.schema_id.to_string(),
            schema_name: schema.schema_name.clone(),
            structured_data: attribute_map_to_json(&node.structured_data),
        };
        self.db
            .query("UPSERT type::thing('nodes', $id) CONTENT $data")
            .bind(("id", node.node_id.to_string()))
            .bind(("data", record))
            .await
            .map_err(|e| CoreError::GraphMirrorError(format!("node upsert failed: {e}")))?;
        Ok(())
    }

    async fn upsert_edge(&self, edge: &Edge, schema: &Schema, source: &Node, target: &Node) -> Result<()> {
        // record id mirrors the (source, edge_schema_name, target) dedup
        // key the relational store enforces, so replays of the same
        // logical edge are idempotent upserts rather than duplicates.
        let record_id = format!("{}_{}_{}", edge.source_node_id, schema.schema_name, edge.target_node_id);
        let record = EdgeRecord {
            project_id: edge.project_id.to_string(),
            edge_type: schema.schema_name.clone(),
            from_node: source.node_id.to_string(),
            to_node: target.node_id.to_string(),
            structured_data: attribute_map_to_json(&edge.structured_data),
        };
        self.db
            .query("UPSERT type::thing('edges', $id) CONTENT $data")
            .bind(("id", record_id))
            .bind(("data", record))
            .await
            .map_err(|e| CoreError::GraphMirrorError(format!("edge upsert failed: {e}")))?;
        Ok(())
    }

    async fn bfs(
        &self,
        project_id: ProjectId,
        start: &[NodeId],
        relationship_types: Option<&[String]>,
        direction: Direction,
        max_hops: u32,
    ) -> Result<Vec<(NodeId, u32)>> {
        let mut visited: HashSet<String> = start.iter().map(|id| id.to_string()).collect();
        let mut result: Vec<(NodeId, u32)> = Vec::new();
        let mut frontier: VecDeque<String> = start.iter().map(|id| id.to_string()).collect();
        let mut hop = 0u32;

        while hop < max_hops && !frontier.is_empty() {
            let current: Vec<String> = frontier.drain(..).collect();
            let neighbors = self.neighbors(project_id, &current, relationship_types, direction).await?;

            hop += 1;
            for neighbor in neighbors {
                if visited.insert(neighbor.clone()) {
                    if let Ok(id) = neighbor.parse::<NodeId>() {
                        result.push((id, hop));
                        frontier.push_back(neighbor);
                    }
                }
            }
        }

        Ok(result)
    }
}

impl SurrealGraphMirror {
    async fn neighbors(
        &self,
        project_id: ProjectId,
        from_ids: &[String],
        relationship_types: Option<&[String]>,
        direction: Direction,
    ) -> Result<Vec<String>> {
        let mut out = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            out.extend(self.query_neighbors(project_id, from_ids, relationship_types, "from_node", "to_node").await?);
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            out.extend(self.query_neighbors(project_id, from_ids, relationship_types, "to_node", "from_node").await?);
        }
        Ok(out)
    }

    async fn query_neighbors(
        &self,
        project_id: ProjectId,
        from_ids: &[String],
        relationship_types: Option<&[String]>,
        anchor_field: &str,
        neighbor_field: &str,
    ) -> Result<Vec<String>> {
        let type_clause = if relationship_types.is_some() {
            " AND edge_type IN $types"
        } else {
            ""
        };
        let query = format!(
            "SELECT {neighbor_field} AS neighbor FROM edges WHERE project_id = $project_id AND {anchor_field} IN $from_ids{type_clause}"
        );

        let mut q = self
            .db
            .query(query)
            .bind(("project_id", project_id.to_string()))
            .bind(("from_ids", from_ids.to_vec()));
        if let Some(types) = relationship_types {
            q = q.bind(("types", types.to_vec()));
        }

        let mut response = q
            .await
            .map_err(|e| CoreError::GraphMirrorError(format!("neighbor query failed: {e}")))?;
        let rows: Vec<NeighborRow> = response
            .take(0)
            .map_err(|e| CoreError::GraphMirrorError(format!("neighbor query decode failed: {e}")))?;
        Ok(rows.into_iter().map(|r| r.neighbor).collect())
    }
}

fn attribute_map_to_json(data: &kg_core::types::AttributeMap) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, value) in data {
        let json_value = match value {
            AttributeValue::Str(s) => serde_json::Value::String(s.clone()),
            AttributeValue::Int(i) => serde_json::Value::from(*i),
            AttributeValue::Float(f) => serde_json::Value::from(*f),
            AttributeValue::Bool(b) => serde_json::Value::Bool(*b),
            AttributeValue::Datetime(d) => serde_json::Value::String(d.to_rfc3339()),
        };
        map.insert(key.clone(), json_value);
    }
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kg_core::model::{Edge, Node};
    use kg_core::semver::Semver;
    use kg_core::types::{AttributeMap, EntityType};

    async fn mirror() -> SurrealGraphMirror {
        SurrealGraphMirror::connect_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn upserts_are_idempotent() {
        let mirror = mirror().await;
        let project_id = kg_core::types::new_id();
        let schema_id = kg_core::types::new_id();
        let schema = Schema::new(project_id, "Person", EntityType::Node, Semver::initial(), "a person", vec![]);
        let node = Node::new(project_id, schema_id, AttributeMap::new());

        mirror.upsert_node(&node, &schema).await.unwrap();
        mirror.upsert_node(&node, &schema).await.unwrap();
    }

    #[tokio::test]
    async fn bfs_finds_direct_neighbor() {
        let mirror = mirror().await;
        let project_id = kg_core::types::new_id();
        let node_schema = Schema::new(project_id, "Person", EntityType::Node, Semver::initial(), "a person", vec![]);
        let edge_schema = Schema::new(project_id, "KNOWS", EntityType::Edge, Semver::initial(), "knows", vec![]);

        let source = Node::new(project_id, node_schema.schema_id, AttributeMap::new());
        let target = Node::new(project_id, node_schema.schema_id, AttributeMap::new());
        mirror.upsert_node(&source, &node_schema).await.unwrap();
        mirror.upsert_node(&target, &node_schema).await.unwrap();

        let edge = Edge::new(project_id, edge_schema.schema_id, source.node_id, target.node_id, AttributeMap::new());
        mirror.upsert_edge(&edge, &edge_schema, &source, &target).await.unwrap();

        let reached = mirror
            .bfs(project_id, &[source.node_id], None, Direction::Outgoing, 1)
            .await
            .unwrap();
        assert_eq!(reached, vec![(target.node_id, 1)]);
    }
}
