//! Content-addressed document identity.
//!
//! A document's id is the SHA-256 of its canonical JSON form: compact
//! separators and object keys in sorted order at every level. Two documents
//! with the same content (metadata included) always get the same id, which
//! is what lets a create-only sink reject re-ingested duplicates.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonical serialization used for hashing.
///
/// Key order is made explicit here rather than relying on the map type
/// behind `serde_json::Map`.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Id of a fully stamped document.
pub fn document_id(doc: &Value) -> String {
    sha256_hex(canonical_json(doc).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_is_stable() {
        let doc = json!({"@timestamp": "2024-03-01T00:00:00.000000", "iostat": {"disk": {"id": "sda"}}});
        assert_eq!(document_id(&doc), document_id(&doc.clone()));
        assert_eq!(document_id(&doc).len(), 64);
    }

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": "2", "x": [1, {"q": 0, "p": 1}]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": [1, {"p": 1, "q": 0}], "y": "2"}, "b": 1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(document_id(&a), document_id(&b));
    }

    #[test]
    fn any_field_change_changes_id() {
        let base = json!({"@metadata": {"host": "h1"}, "v": "1"});
        let other_meta = json!({"@metadata": {"host": "h2"}, "v": "1"});
        let other_value = json!({"@metadata": {"host": "h1"}, "v": "2"});
        assert_ne!(document_id(&base), document_id(&other_meta));
        assert_ne!(document_id(&base), document_id(&other_value));
    }

    #[test]
    fn canonical_form_is_compact() {
        let doc = json!({"b": [1, 2], "a": "x\"y"});
        assert_eq!(canonical_json(&doc), r#"{"a":"x\"y","b":[1,2]}"#);
    }
}
