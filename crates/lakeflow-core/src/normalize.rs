//! Payload normalization for the transform path
//!
//! Raw-zone records keep whatever shape the producer sent. The transform
//! engine canonicalizes them before columnar encoding:
//! - key casing is lowered (`PageUrl` and `page_url` become one column)
//! - nested objects are flattened with `_` joins (`geo.city` -> `geo_city`)
//! - arrays are kept as JSON text (columnar engines handle them poorly)

use serde_json::{Map, Value};

/// Flatten and lowercase a payload object. Non-object inputs are returned
/// unchanged; the caller validates shape before normalizing.
pub fn normalize_payload(payload: &Value) -> Value {
    match payload {
        Value::Object(map) => {
            let mut flat = Map::new();
            flatten_into(&mut flat, None, map);
            Value::Object(flat)
        }
        other => other.clone(),
    }
}

fn flatten_into(out: &mut Map<String, Value>, prefix: Option<&str>, map: &Map<String, Value>) {
    for (key, value) in map {
        let lowered = lower_key(key);
        let full_key = match prefix {
            Some(p) => format!("{}_{}", p, lowered),
            None => lowered,
        };

        match value {
            Value::Object(nested) => flatten_into(out, Some(&full_key), nested),
            Value::Array(_) => {
                let text = serde_json::to_string(value).unwrap_or_default();
                out.insert(full_key, Value::String(text));
            }
            other => {
                out.insert(full_key, other.clone());
            }
        }
    }
}

/// camelCase/PascalCase to snake_case, everything else lowered in place.
fn lower_key(key: &str) -> String {
    let mut result = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;

    for c in key.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            result.push(c.to_ascii_lowercase());
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lowers_and_snake_cases_keys() {
        let payload = json!({"PageUrl": "/home", "userID": 7, "Referrer": null});
        let out = normalize_payload(&payload);
        assert_eq!(
            out,
            json!({"page_url": "/home", "user_id": 7, "referrer": null})
        );
    }

    #[test]
    fn flattens_nested_objects() {
        let payload = json!({"geo": {"City": "Lisbon", "Country": "PT"}, "event": "view"});
        let out = normalize_payload(&payload);
        assert_eq!(
            out,
            json!({"geo_city": "Lisbon", "geo_country": "PT", "event": "view"})
        );
    }

    #[test]
    fn arrays_become_json_text() {
        let payload = json!({"tags": ["a", "b"]});
        let out = normalize_payload(&payload);
        assert_eq!(out, json!({"tags": "[\"a\",\"b\"]"}));
    }

    #[test]
    fn normalization_is_idempotent() {
        let payload = json!({"Outer": {"InnerValue": 1}, "plain": true});
        let once = normalize_payload(&payload);
        let twice = normalize_payload(&once);
        assert_eq!(once, twice);
    }
}
