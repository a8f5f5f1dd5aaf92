//! Configurable label/schema mappings used by [`crate::constructor`] (spec
//! §4.4 steps 4 and 7).

use std::collections::HashMap;

/// NER label → node schema name mapping (spec §4.4 step 4: "exact
/// case-insensitive match on `schema_name` first, then configured alias
/// table (e.g., PER→Person, ORG→Organization, LOC→Location); unknown
/// labels are dropped and counted").
#[derive(Debug, Clone)]
pub struct LabelAliasTable {
    aliases: HashMap<String, String>,
}

impl LabelAliasTable {
    pub fn new(aliases: HashMap<String, String>) -> Self {
        Self { aliases }
    }

    /// Resolves `ner_label` against `known_schema_names` (the project's
    /// active node schemas), trying an exact case-insensitive match first
    /// and falling back to the configured alias table.
    pub fn resolve<'a>(&self, ner_label: &str, known_schema_names: &'a [String]) -> Option<&'a str> {
        if let Some(found) = known_schema_names
            .iter()
            .find(|name| name.eq_ignore_ascii_case(ner_label))
        {
            return Some(found.as_str());
        }
        let aliased = self.aliases.get(&ner_label.to_ascii_uppercase())?;
        known_schema_names
            .iter()
            .find(|name| name.eq_ignore_ascii_case(aliased))
            .map(|s| s.as_str())
    }
}

impl Default for LabelAliasTable {
    /// The spec's own worked example table (spec §4.4 step 4).
    fn default() -> Self {
        let mut aliases = HashMap::new();
        aliases.insert("PER".to_string(), "Person".to_string());
        aliases.insert("ORG".to_string(), "Organization".to_string());
        aliases.insert("LOC".to_string(), "Location".to_string());
        Self::new(aliases)
    }
}

/// `(source_schema_name, target_schema_name) → edge_schema_name` mapping
/// used for co-occurrence relationship extraction (spec §4.4 step 7:
/// "Relationship extraction policy (spec-level, not code-level)").
#[derive(Debug, Clone)]
pub struct RelationMappingTable {
    mappings: HashMap<(String, String), String>,
}

impl RelationMappingTable {
    pub fn new(mappings: HashMap<(String, String), String>) -> Self {
        Self { mappings }
    }

    pub fn edge_schema_for(&self, source_schema: &str, target_schema: &str) -> Option<&str> {
        self.mappings
            .get(&(source_schema.to_string(), target_schema.to_string()))
            .map(|s| s.as_str())
    }
}

impl Default for RelationMappingTable {
    /// The built-in default ontology's only relation (spec §8 scenario 2:
    /// Person-WORKS_AT-Organization).
    fn default() -> Self {
        let mut mappings = HashMap::new();
        mappings.insert(("Person".to_string(), "Organization".to_string()), "WORKS_AT".to_string());
        Self::new(mappings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_case_insensitive_match_wins_over_alias() {
        let table = LabelAliasTable::default();
        let schemas = vec!["PER".to_string(), "Person".to_string()];
        assert_eq!(table.resolve("per", &schemas), Some("PER"));
    }

    #[test]
    fn falls_back_to_alias_table() {
        let table = LabelAliasTable::default();
        let schemas = vec!["Person".to_string(), "Organization".to_string()];
        assert_eq!(table.resolve("PER", &schemas), Some("Person"));
        assert_eq!(table.resolve("ORG", &schemas), Some("Organization"));
    }

    #[test]
    fn unknown_label_resolves_to_none() {
        let table = LabelAliasTable::default();
        let schemas = vec!["Person".to_string()];
        assert_eq!(table.resolve("MISC", &schemas), None);
    }

    #[test]
    fn relation_mapping_looks_up_by_schema_pair() {
        let mut mappings = HashMap::new();
        mappings.insert(("Person".to_string(), "Organization".to_string()), "WORKS_AT".to_string());
        let table = RelationMappingTable::new(mappings);
        assert_eq!(table.edge_schema_for("Person", "Organization"), Some("WORKS_AT"));
        assert_eq!(table.edge_schema_for("Organization", "Person"), None);
    }

    #[test]
    fn default_relation_mapping_covers_the_default_ontology() {
        let table = RelationMappingTable::default();
        assert_eq!(table.edge_schema_for("Person", "Organization"), Some("WORKS_AT"));
    }
}
