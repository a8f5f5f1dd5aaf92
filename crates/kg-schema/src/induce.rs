//! `induce_schemas` (spec §4.3): propose an ontology from document text and
//! persist the surviving schemas for user approval.

use serde::Deserialize;
use tracing::{info, instrument, warn};

use kg_core::error::Result;
use kg_core::model::Schema;
use kg_core::semver::Semver;
use kg_core::traits::RelationalStore;
use kg_core::types::{AttributeDefinition, EntityType, ProjectId};

use crate::fallback::{try_all_then_default, Tier};
use crate::json::parse_first_json_object;

/// First-N-paragraphs policy default (spec §4.3 step 1 "N=5 by default").
const DEFAULT_N_SNIPPETS: usize = 5;

const SYSTEM_PROMPT: &str = "You propose a typed ontology for a knowledge graph. \
Read the supplied document excerpts and respond with STRICT JSON of the shape \
{\"nodes\": [...], \"edges\": [...], \"summary\": string} where each element of \
`nodes`/`edges` carries `schema_name`, `entity_type` (\"NODE\" or \"EDGE\"), \
`structured_attributes` (a list of {name, data_type, required, constraints?}), \
and an optional free-text `notes`. Respond with the JSON object only.";

#[derive(Debug, Deserialize)]
struct RawSchemaProposal {
    schema_name: String,
    #[serde(default)]
    entity_type: Option<String>,
    #[serde(default)]
    structured_attributes: Vec<AttributeDefinition>,
    #[serde(default)]
    #[allow(dead_code)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawProposal {
    #[serde(default)]
    nodes: Vec<RawSchemaProposal>,
    #[serde(default)]
    edges: Vec<RawSchemaProposal>,
    #[serde(default)]
    summary: String,
}

/// A schema proposal that failed validation and was dropped (spec §4.3
/// step 4 "drop malformed schemas and record them under `rejected`").
#[derive(Debug, Clone)]
pub struct RejectedSchema {
    pub schema_name: String,
    pub reason: String,
}

/// The result of one `induce_schemas` call (spec §4.3).
#[derive(Debug, Clone)]
pub struct ProposalResult {
    pub nodes: Vec<Schema>,
    pub edges: Vec<Schema>,
    pub rejected: Vec<RejectedSchema>,
    pub summary: String,
    /// Which tier of the fallback chain produced this proposal: 1
    /// primary, 2 secondary, 3 built-in default (spec GLOSSARY "Source
    /// tier").
    pub source_tier: u8,
}

/// Proposes an ontology from `document_text` and persists the surviving
/// schemas via `store` (spec §4.3). `hints` is an open-ended JSON object
/// of caller-supplied guidance folded into the prompt; `tiers` is the
/// fallback chain in priority order and must end in a tier that cannot
/// fail (the built-in default backend).
#[instrument(skip(store, tiers, document_text), fields(project_id = %project_id))]
pub async fn induce_schemas(
    store: &dyn RelationalStore,
    project_id: ProjectId,
    document_text: &str,
    hints: &serde_json::Value,
    tiers: &[Tier],
) -> Result<ProposalResult> {
    let user_prompt = build_user_prompt(document_text, hints);

    let (_, source_tier, raw_proposal) =
        try_all_then_default(tiers, SYSTEM_PROMPT, &user_prompt, |raw| {
            let parsed: RawProposal = parse_first_json_object(raw)?;
            if parsed.nodes.is_empty() && parsed.edges.is_empty() {
                None
            } else {
                Some(parsed)
            }
        })
        .await?;

    let mut rejected = Vec::new();
    let mut node_schemas = Vec::new();
    for raw in raw_proposal.nodes {
        match build_schema(project_id, EntityType::Node, raw) {
            Ok(schema) => node_schemas.push(schema),
            Err((name, reason)) => rejected.push(RejectedSchema { schema_name: name, reason }),
        }
    }
    let mut edge_schemas = Vec::new();
    for raw in raw_proposal.edges {
        match build_schema(project_id, EntityType::Edge, raw) {
            Ok(schema) => edge_schemas.push(schema),
            Err((name, reason)) => rejected.push(RejectedSchema { schema_name: name, reason }),
        }
    }

    if !rejected.is_empty() {
        warn!(count = rejected.len(), "dropped malformed schema proposals");
    }

    // Persistence is all-or-nothing across one proposal's nodes and edges
    // (spec §4.3 "State machine"). The embedded store's per-row writes
    // give us no native multi-row transaction, so surviving schemas are
    // written in a single pass and the first failure aborts the rest;
    // see DESIGN.md for the Open Question this resolves.
    let mut persisted_nodes = Vec::with_capacity(node_schemas.len());
    for schema in node_schemas {
        persisted_nodes.push(store.create_schema(schema).await?);
    }
    let mut persisted_edges = Vec::with_capacity(edge_schemas.len());
    for schema in edge_schemas {
        persisted_edges.push(store.create_schema(schema).await?);
    }

    info!(
        source_tier,
        nodes = persisted_nodes.len(),
        edges = persisted_edges.len(),
        rejected = rejected.len(),
        "schema induction complete"
    );

    Ok(ProposalResult {
        nodes: persisted_nodes,
        edges: persisted_edges,
        rejected,
        summary: raw_proposal.summary,
        source_tier,
    })
}

fn build_schema(
    project_id: ProjectId,
    entity_type: EntityType,
    raw: RawSchemaProposal,
) -> std::result::Result<Schema, (String, String)> {
    if let Some(declared) = &raw.entity_type {
        let declared_matches = match entity_type {
            EntityType::Node => declared.eq_ignore_ascii_case("node"),
            EntityType::Edge => declared.eq_ignore_ascii_case("edge"),
        };
        if !declared_matches {
            return Err((
                raw.schema_name.clone(),
                format!("declared entity_type '{declared}' does not match its section"),
            ));
        }
    }
    if raw.schema_name.trim().is_empty() {
        return Err((raw.schema_name, "schema_name is empty".to_string()));
    }
    for attr in &raw.structured_attributes {
        if attr.name.trim().is_empty() {
            return Err((raw.schema_name.clone(), "an attribute has an empty name".to_string()));
        }
        if let (Some(min), Some(max)) = (attr.constraints.min, attr.constraints.max) {
            if min > max {
                return Err((raw.schema_name.clone(), format!("attribute '{}' has min > max", attr.name)));
            }
        }
        if let Some(pattern) = &attr.constraints.pattern {
            if regex::Regex::new(pattern).is_err() {
                return Err((
                    raw.schema_name.clone(),
                    format!("attribute '{}' has an invalid regex pattern", attr.name),
                ));
            }
        }
    }

    Ok(Schema::new(
        project_id,
        raw.schema_name,
        entity_type,
        Semver::initial(),
        "proposed by schema induction",
        raw.structured_attributes,
    ))
}

fn build_user_prompt(document_text: &str, hints: &serde_json::Value) -> String {
    let snippets = select_snippets(document_text, DEFAULT_N_SNIPPETS);
    let mut prompt = String::new();
    prompt.push_str("Document excerpts:\n\n");
    for (idx, snippet) in snippets.iter().enumerate() {
        prompt.push_str(&format!("[{}]\n{}\n\n", idx + 1, snippet));
    }
    if !hints.is_null() && hints.as_object().map_or(true, |m| !m.is_empty()) {
        prompt.push_str(&format!("Additional hints: {hints}\n"));
    }
    prompt
}

/// First-N-paragraphs selection policy (spec §4.3 step 1).
fn select_snippets(text: &str, n: usize) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .take(n)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::DefaultOntologyBackend;
    use kg_store::relational::RocksRelationalStore;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn default_ontology_fallback_persists_expected_schemas() {
        let (store, _dir) = RocksRelationalStore::open_temp().unwrap();
        let project = store.create_project("acme").await.unwrap();

        let tiers = vec![Tier::new(Arc::new(DefaultOntologyBackend), Duration::from_secs(1), 3)];
        let result = induce_schemas(&store, project.project_id, "Alice works at Acme.", &serde_json::Value::Null, &tiers)
            .await
            .unwrap();

        assert_eq!(result.source_tier, 3);
        assert_eq!(result.nodes.len(), 3);
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.edges[0].schema_name, "WORKS_AT");
        for schema in result.nodes.iter().chain(result.edges.iter()) {
            assert!(schema.is_active);
            assert_eq!(schema.version, Semver::initial());
        }
    }

    #[test]
    fn first_n_paragraph_selection_respects_n() {
        let text = "p1\n\np2\n\np3\n\np4\n\np5\n\np6";
        let snippets = select_snippets(text, 5);
        assert_eq!(snippets.len(), 5);
        assert_eq!(snippets[0], "p1");
    }
}
