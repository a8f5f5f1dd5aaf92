use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque 128-bit identifiers, allocated at creation time (spec §3).
pub type ProjectId = Uuid;
pub type DocumentId = Uuid;
pub type SchemaId = Uuid;
pub type NodeId = Uuid;
pub type EdgeId = Uuid;
pub type ChunkId = Uuid;

pub fn new_id() -> Uuid {
    Uuid::new_v4()
}

/// Which side of the ontology a [`crate::model::Schema`] defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    Node,
    Edge,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Node => write!(f, "NODE"),
            EntityType::Edge => write!(f, "EDGE"),
        }
    }
}

/// Lifecycle of a [`crate::model::Document`] (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentStatus {
    Uploaded,
    Processed,
    Failed,
}

/// Graph-mirror replication state carried on every Node/Edge row (spec
/// §4.1 "State of the graph mirror").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum MirrorState {
    #[default]
    None,
    Ok,
    Pending,
    Disabled,
}

/// The declared type of one structured attribute (spec §3
/// `structured_attributes`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
    Datetime,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Boolean => "boolean",
            DataType::Datetime => "datetime",
        };
        write!(f, "{}", s)
    }
}

/// A validated, typed attribute value. Design Note §9 ("Dynamic typing on
/// structured payloads") calls for exactly this: a closed tagged variant
/// rather than a free-form dynamic map, so validation can reject type
/// mismatches explicitly instead of relying on runtime duck typing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Datetime(DateTime<Utc>),
}

impl AttributeValue {
    pub fn data_type(&self) -> DataType {
        match self {
            AttributeValue::Str(_) => DataType::String,
            AttributeValue::Int(_) => DataType::Integer,
            AttributeValue::Float(_) => DataType::Float,
            AttributeValue::Bool(_) => DataType::Boolean,
            AttributeValue::Datetime(_) => DataType::Datetime,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(i) => Some(*i as f64),
            AttributeValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Str(s) => write!(f, "{}", s),
            AttributeValue::Int(i) => write!(f, "{}", i),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Datetime(d) => write!(f, "{}", d.to_rfc3339()),
        }
    }
}

/// Ordered map of attribute name to value. A `BTreeMap` (rather than
/// `HashMap`) is used so `json_stable` serialization (spec §4.4 step 6,
/// "embedding `json_stable(structured_data)`") is deterministic across
/// processes without an extra sort step.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// Optional constraints on one structured attribute (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "enum")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

/// One entry of a Schema's `structured_attributes` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub constraints: AttributeConstraints,
}

impl AttributeDefinition {
    pub fn new(name: impl Into<String>, data_type: DataType, required: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            required,
            constraints: AttributeConstraints::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: AttributeConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}

/// Free-form metadata carried by several entities (spec §3).
pub type MetadataMap = BTreeMap<String, String>;

/// Normalizes an edge schema name to UPPER_SNAKE_CASE, as required for
/// relationship schemas (spec §3 Schema invariants).
pub fn normalize_edge_schema_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_was_lower_or_digit = false;
    for ch in name.chars() {
        if ch.is_whitespace() || ch == '-' {
            out.push('_');
            prev_was_lower_or_digit = false;
            continue;
        }
        if ch.is_uppercase() && prev_was_lower_or_digit {
            out.push('_');
        }
        for upper in ch.to_uppercase() {
            out.push(upper);
        }
        prev_was_lower_or_digit = ch.is_lowercase() || ch.is_numeric();
    }
    // collapse any accidental double underscores produced by mixed separators
    while out.contains("__") {
        out = out.replace("__", "_");
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_camel_case() {
        assert_eq!(normalize_edge_schema_name("worksAt"), "WORKS_AT");
    }

    #[test]
    fn normalizes_spaced_words() {
        assert_eq!(normalize_edge_schema_name("works at"), "WORKS_AT");
    }

    #[test]
    fn leaves_already_normalized_names_unchanged() {
        assert_eq!(normalize_edge_schema_name("WORKS_AT"), "WORKS_AT");
    }

    #[test]
    fn attribute_value_reports_its_data_type() {
        assert_eq!(AttributeValue::Str("x".into()).data_type(), DataType::String);
        assert_eq!(AttributeValue::Int(3).data_type(), DataType::Integer);
    }
}
