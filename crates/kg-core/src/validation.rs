//! Structured-data validation rules (spec §4.1 "Validation rules").
//!
//! Invoked on every node/edge write by the persistence layer. Grounded on
//! the coercion + constraint-checking shape that `codegraph_core::config`
//! applies to configuration values, generalized here to arbitrary typed
//! attributes.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{CoreError, Result};
use crate::model::Schema;
use crate::types::{AttributeDefinition, AttributeMap, AttributeValue, DataType};

/// Coerces and validates `structured_data` against `schema`, in attribute
/// declaration order. Mirrors spec §4.1 rules 1-4:
///
/// 1. Every required attribute must be present.
/// 2. Values are coerced into their declared type (`coerce = true` is the
///    write-path default); `"30"` coerces to the integer `30`, `"abc"`
///    does not.
/// 3. Numeric/length/pattern/enum constraints are enforced.
/// 4. Unknown keys are preserved as-is.
///
/// On the first offending attribute, returns `SchemaValidationError`
/// naming it, per the contract of `create_node`/`create_edge`.
pub fn validate_structured_data(schema: &Schema, data: &AttributeMap) -> Result<AttributeMap> {
    let mut validated = AttributeMap::new();
    let declared: HashMap<&str, &AttributeDefinition> = schema
        .structured_attributes
        .iter()
        .map(|a| (a.name.as_str(), a))
        .collect();

    for attr in &schema.structured_attributes {
        match data.get(&attr.name) {
            Some(value) => {
                let coerced = coerce(&attr.name, value, attr.data_type)?;
                check_constraints(attr, &coerced)?;
                validated.insert(attr.name.clone(), coerced);
            }
            None => {
                if attr.required {
                    return Err(CoreError::SchemaValidationError {
                        attribute: attr.name.clone(),
                        reason: "required attribute is missing".to_string(),
                    });
                }
            }
        }
    }

    // Unknown keys are preserved as-is (rule 4).
    for (key, value) in data {
        if !declared.contains_key(key.as_str()) {
            validated.insert(key.clone(), value.clone());
        }
    }

    Ok(validated)
}

fn coerce(attribute: &str, value: &AttributeValue, target: DataType) -> Result<AttributeValue> {
    if value.data_type() == target {
        return Ok(value.clone());
    }

    // Only string-typed source values are eligible for coercion; this
    // matches the spec's one named example ("30" -> 30).
    let as_str = match value {
        AttributeValue::Str(s) => s.as_str(),
        _ => {
            return Err(type_error(attribute, target, value));
        }
    };

    match target {
        DataType::Integer => as_str
            .trim()
            .parse::<i64>()
            .map(AttributeValue::Int)
            .map_err(|_| type_error(attribute, target, value)),
        DataType::Float => as_str
            .trim()
            .parse::<f64>()
            .map(AttributeValue::Float)
            .map_err(|_| type_error(attribute, target, value)),
        DataType::Boolean => match as_str.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(AttributeValue::Bool(true)),
            "false" | "0" | "no" => Ok(AttributeValue::Bool(false)),
            _ => Err(type_error(attribute, target, value)),
        },
        DataType::Datetime => DateTime::<Utc>::from_str(as_str.trim())
            .map(AttributeValue::Datetime)
            .map_err(|_| type_error(attribute, target, value)),
        DataType::String => Ok(AttributeValue::Str(as_str.to_string())),
    }
}

fn type_error(attribute: &str, expected: DataType, actual: &AttributeValue) -> CoreError {
    CoreError::AttributeTypeError {
        attribute: attribute.to_string(),
        expected: expected.to_string(),
        actual: actual.data_type().to_string(),
    }
}

fn check_constraints(attr: &AttributeDefinition, value: &AttributeValue) -> Result<()> {
    let c = &attr.constraints;

    if let (Some(min), Some(num)) = (c.min, value.as_f64()) {
        if num < min {
            return Err(CoreError::SchemaValidationError {
                attribute: attr.name.clone(),
                reason: format!("value {} is below minimum {}", num, min),
            });
        }
    }
    if let (Some(max), Some(num)) = (c.max, value.as_f64()) {
        if num > max {
            return Err(CoreError::SchemaValidationError {
                attribute: attr.name.clone(),
                reason: format!("value {} exceeds maximum {}", num, max),
            });
        }
    }

    if let AttributeValue::Str(s) = value {
        if let Some(min_len) = c.min_length {
            if s.chars().count() < min_len {
                return Err(CoreError::SchemaValidationError {
                    attribute: attr.name.clone(),
                    reason: format!("string shorter than min_length {}", min_len),
                });
            }
        }
        if let Some(max_len) = c.max_length {
            if s.chars().count() > max_len {
                return Err(CoreError::SchemaValidationError {
                    attribute: attr.name.clone(),
                    reason: format!("string longer than max_length {}", max_len),
                });
            }
        }
        if let Some(pattern) = &c.pattern {
            let re = compiled_pattern(pattern).map_err(|_| CoreError::SchemaValidationError {
                attribute: attr.name.clone(),
                reason: format!("constraint pattern '{}' is not a valid regex", pattern),
            })?;
            if !full_match(&re, s) {
                return Err(CoreError::SchemaValidationError {
                    attribute: attr.name.clone(),
                    reason: format!("value does not match pattern '{}'", pattern),
                });
            }
        }
        if let Some(enum_values) = &c.enum_values {
            if !enum_values.iter().any(|v| v == s) {
                return Err(CoreError::SchemaValidationError {
                    attribute: attr.name.clone(),
                    reason: format!("value '{}' is not one of the allowed enum values", s),
                });
            }
        }
    }

    Ok(())
}

// Full-match semantics (spec: "pattern (full regex match)") achieved by
// anchoring the user pattern on both ends.
fn full_match(re: &Regex, s: &str) -> bool {
    re.find(s).map_or(false, |m| m.start() == 0 && m.end() == s.len())
}

fn compiled_pattern(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    static CACHE: Lazy<std::sync::Mutex<HashMap<String, Regex>>> =
        Lazy::new(|| std::sync::Mutex::new(HashMap::new()));
    let mut cache = CACHE.lock().unwrap();
    if let Some(re) = cache.get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)?;
    cache.insert(pattern.to_string(), re.clone());
    Ok(re)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Schema;
    use crate::semver::Semver;
    use crate::types::{AttributeConstraints, AttributeDefinition, EntityType};

    fn person_schema() -> Schema {
        Schema::new(
            crate::types::new_id(),
            "Person",
            EntityType::Node,
            Semver::initial(),
            "a person",
            vec![
                AttributeDefinition::new("name", DataType::String, true),
                AttributeDefinition::new("age", DataType::Integer, false).with_constraints(
                    AttributeConstraints {
                        min: Some(0.0),
                        max: Some(150.0),
                        ..Default::default()
                    },
                ),
            ],
        )
    }

    #[test]
    fn missing_required_attribute_fails() {
        let schema = person_schema();
        let data = AttributeMap::new();
        let err = validate_structured_data(&schema, &data).unwrap_err();
        assert!(matches!(err, CoreError::SchemaValidationError { attribute, .. } if attribute == "name"));
    }

    #[test]
    fn coerces_numeric_strings() {
        let schema = person_schema();
        let mut data = AttributeMap::new();
        data.insert("name".into(), AttributeValue::Str("Alice".into()));
        data.insert("age".into(), AttributeValue::Str("30".into()));
        let validated = validate_structured_data(&schema, &data).unwrap();
        assert_eq!(validated.get("age"), Some(&AttributeValue::Int(30)));
    }

    #[test]
    fn rejects_non_numeric_coercion() {
        let schema = person_schema();
        let mut data = AttributeMap::new();
        data.insert("name".into(), AttributeValue::Str("Alice".into()));
        data.insert("age".into(), AttributeValue::Str("abc".into()));
        assert!(validate_structured_data(&schema, &data).is_err());
    }

    #[test]
    fn enforces_numeric_bounds() {
        let schema = person_schema();
        let mut data = AttributeMap::new();
        data.insert("name".into(), AttributeValue::Str("Alice".into()));
        data.insert("age".into(), AttributeValue::Int(200));
        assert!(validate_structured_data(&schema, &data).is_err());
    }

    #[test]
    fn zero_required_attributes_accepts_empty_map() {
        let schema = Schema::new(
            crate::types::new_id(),
            "Tag",
            EntityType::Node,
            Semver::initial(),
            "an unconstrained tag",
            vec![],
        );
        let data = AttributeMap::new();
        assert!(validate_structured_data(&schema, &data).is_ok());
    }

    #[test]
    fn unknown_keys_are_preserved() {
        let schema = person_schema();
        let mut data = AttributeMap::new();
        data.insert("name".into(), AttributeValue::Str("Alice".into()));
        data.insert("nickname".into(), AttributeValue::Str("Ally".into()));
        let validated = validate_structured_data(&schema, &data).unwrap();
        assert_eq!(validated.get("nickname"), Some(&AttributeValue::Str("Ally".into())));
    }

    #[test]
    fn pattern_constraint_requires_full_match() {
        let schema = Schema::new(
            crate::types::new_id(),
            "Email",
            EntityType::Node,
            Semver::initial(),
            "an email holder",
            vec![AttributeDefinition::new("address", DataType::String, true).with_constraints(
                AttributeConstraints {
                    pattern: Some(r"[^@]+@[^@]+\.[a-z]+".to_string()),
                    ..Default::default()
                },
            )],
        );
        let mut ok = AttributeMap::new();
        ok.insert("address".into(), AttributeValue::Str("a@b.com".into()));
        assert!(validate_structured_data(&schema, &ok).is_ok());

        let mut bad = AttributeMap::new();
        bad.insert("address".into(), AttributeValue::Str("a@b.com trailing".into()));
        assert!(validate_structured_data(&schema, &bad).is_err());
    }
}
