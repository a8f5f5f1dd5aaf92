//! Canonical-key derivation for entity resolution (spec §4.4 step 5
//! "Canonicalize entities"). Lives in `kg-core` because both the
//! persistence layer (which indexes nodes by canonical key) and the
//! knowledge constructor (which merges candidate entities before writing)
//! need the identical definition.

use crate::model::Schema;
use crate::types::AttributeMap;

/// The canonical key is the value of the schema's first `required=true`
/// string attribute, case-folded and whitespace-normalized (spec §4.4,
/// and the Open Question in §9 that fixes this as the default policy).
/// Returns `None` if the schema has no such attribute or the value is
/// absent/non-string.
pub fn canonical_key(schema: &Schema, structured_data: &AttributeMap) -> Option<String> {
    let attr = schema.first_required_string_attribute()?;
    let value = structured_data.get(&attr.name)?;
    let raw = value.as_str()?;
    Some(normalize_key(raw))
}

fn normalize_key(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
