//! First-balanced-JSON-object extraction (spec §4.3 "Parsing robustness":
//! "The LLM response is searched for the first balanced JSON object;
//! leading/trailing prose is ignored"). A hand-rolled brace-counting
//! scanner — the corpus doesn't vendor a JSON-repair crate for this, so
//! this is written the way a `serde_json`-based service would: track
//! string/escape state, count brace depth, slice, then let `serde_json`
//! do the actual parsing.

/// Returns the substring of `text` spanning the first balanced `{...}`
/// object, or `None` if no balanced object is found.
pub fn first_balanced_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in bytes[start..].iter().enumerate() {
        let ch = *byte as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses the first balanced JSON object in `text` as `T`, tolerating
/// arbitrary surrounding prose.
pub fn parse_first_json_object<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    let slice = first_balanced_json_object(text)?;
    serde_json::from_str(slice).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn extracts_object_with_surrounding_prose() {
        let text = "Sure, here you go:\n```json\n{\"a\": 1}\n```\nHope that helps!";
        assert_eq!(first_balanced_json_object(text), Some("{\"a\": 1}"));
    }

    #[test]
    fn handles_nested_braces_and_strings_with_braces() {
        let text = r#"prose {"a": {"b": "c}d"}, "e": 2} trailing"#;
        let extracted = first_balanced_json_object(text).unwrap();
        let parsed: Value = serde_json::from_str(extracted).unwrap();
        assert_eq!(parsed["e"], 2);
        assert_eq!(parsed["a"]["b"], "c}d");
    }

    #[test]
    fn returns_none_when_unbalanced() {
        assert_eq!(first_balanced_json_object("not json { at all"), None);
    }

    #[test]
    fn parse_first_json_object_deserializes_into_target_type() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            a: i32,
        }
        let parsed: Wrapper = parse_first_json_object("blah {\"a\": 7} blah").unwrap();
        assert_eq!(parsed.a, 7);
    }
}
