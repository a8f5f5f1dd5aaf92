//! Graph mirror background drain (spec §4.1 "Graph mirror protocol":
//! mirror failures mark the row `mirror_pending=true` and are replayed by
//! a background drain task; §4.4 step 8 drains a single document's rows
//! synchronously at document completion). Grounded structurally on
//! `codegraph_graph::update_scheduler`'s buffer-and-flush loop, trimmed to
//! a plain poll-and-replay since this drain has no event channel to merge.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use kg_core::error::Result;
use kg_core::model::{Edge, Node};
use kg_core::traits::{GraphMirror, RelationalStore};
use kg_core::types::{DocumentId, MirrorState};

/// Outcome of one drain pass (§4.4 `ConstructionStats` doesn't carry this
/// directly, but `kg-cli` surfaces it in operator logs).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub nodes_replayed: usize,
    pub nodes_still_pending: usize,
    pub edges_replayed: usize,
    pub edges_still_pending: usize,
}

/// Replays every row (optionally scoped to one document's nodes/edges)
/// whose mirror state is `PENDING`. Idempotent: replaying the same
/// directive N times converges to the same mirror state as replaying it
/// once (spec §8 "Mirror replay is idempotent").
pub async fn drain_pending(
    store: &dyn RelationalStore,
    mirror: &dyn GraphMirror,
    document_id: Option<DocumentId>,
) -> Result<DrainStats> {
    let mut stats = DrainStats::default();

    let pending_nodes = store.pending_mirror_nodes(document_id).await?;
    for node in &pending_nodes {
        match replay_node(store, mirror, node).await {
            Ok(()) => stats.nodes_replayed += 1,
            Err(err) => {
                warn!(node_id = %node.node_id, error = %err, "graph mirror replay failed, remains pending");
                stats.nodes_still_pending += 1;
            }
        }
    }

    let pending_edges = store.pending_mirror_edges(document_id).await?;
    for edge in &pending_edges {
        match replay_edge(store, mirror, edge).await {
            Ok(()) => stats.edges_replayed += 1,
            Err(err) => {
                warn!(edge_id = %edge.edge_id, error = %err, "graph mirror replay failed, remains pending");
                stats.edges_still_pending += 1;
            }
        }
    }

    debug!(?stats, "graph mirror drain pass complete");
    Ok(stats)
}

async fn replay_node(store: &dyn RelationalStore, mirror: &dyn GraphMirror, node: &Node) -> Result<()> {
    let schema = store.get_schema_by_id(node.schema_id).await?;
    mirror.upsert_node(node, &schema).await?;
    store.set_node_mirror_state(node.node_id, MirrorState::Ok).await
}

async fn replay_edge(store: &dyn RelationalStore, mirror: &dyn GraphMirror, edge: &Edge) -> Result<()> {
    let schema = store.get_schema_by_id(edge.schema_id).await?;
    let source = store.get_node(edge.source_node_id).await?;
    let target = store.get_node(edge.target_node_id).await?;
    mirror.upsert_edge(edge, &schema, &source, &target).await?;
    store.set_edge_mirror_state(edge.edge_id, MirrorState::Ok).await
}

/// Spawns the process-lifetime periodic drain task (spec §6
/// `GRAPH_MIRROR_DRAIN_INTERVAL_SECONDS`). Runs until the returned
/// `tokio::task::JoinHandle` is aborted, which `CoreRuntime::shutdown`
/// does.
pub fn spawn_periodic_drain(
    store: Arc<dyn RelationalStore>,
    mirror: Arc<dyn GraphMirror>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = drain_pending(store.as_ref(), mirror.as_ref(), None).await {
                warn!(error = %err, "periodic graph mirror drain pass errored");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphmirror::SurrealGraphMirror;
    use crate::relational::RocksRelationalStore;
    use kg_core::semver::Semver;
    use kg_core::types::{AttributeMap, EntityType};

    #[tokio::test]
    async fn drains_a_pending_node() {
        let (store, _dir) = RocksRelationalStore::open_temp().unwrap();
        let mirror = SurrealGraphMirror::connect_in_memory().await.unwrap();

        let project = store.create_project("acme").await.unwrap();
        let schema = kg_core::model::Schema::new(
            project.project_id,
            "Person",
            EntityType::Node,
            Semver::initial(),
            "a person",
            vec![],
        );
        let schema = store.create_schema(schema).await.unwrap();
        let node = store
            .create_node(project.project_id, schema.schema_id, AttributeMap::new(), serde_json::Map::new(), None)
            .await
            .unwrap();
        store.set_node_mirror_state(node.node_id, MirrorState::Pending).await.unwrap();

        let stats = drain_pending(&store, &mirror, None).await.unwrap();
        assert_eq!(stats.nodes_replayed, 1);
        assert_eq!(stats.nodes_still_pending, 0);

        let refreshed = store.get_node(node.node_id).await.unwrap();
        assert_eq!(refreshed.mirror_state, MirrorState::Ok);
    }

    #[tokio::test]
    async fn replaying_a_drained_row_twice_stays_idempotent() {
        let (store, _dir) = RocksRelationalStore::open_temp().unwrap();
        let mirror = SurrealGraphMirror::connect_in_memory().await.unwrap();

        let project = store.create_project("acme").await.unwrap();
        let schema = kg_core::model::Schema::new(
            project.project_id,
            "Person",
            EntityType::Node,
            Semver::initial(),
            "a person",
            vec![],
        );
        let schema = store.create_schema(schema).await.unwrap();
        let node = store
            .create_node(project.project_id, schema.schema_id, AttributeMap::new(), serde_json::Map::new(), None)
            .await
            .unwrap();
        store.set_node_mirror_state(node.node_id, MirrorState::Pending).await.unwrap();
        drain_pending(&store, &mirror, None).await.unwrap();

        store.set_node_mirror_state(node.node_id, MirrorState::Pending).await.unwrap();
        let stats = drain_pending(&store, &mirror, None).await.unwrap();
        assert_eq!(stats.nodes_replayed, 1);
    }
}
