//! Deterministic request fingerprinting.
//!
//! A fingerprint identifies the semantically relevant fields of a request
//! (plus the resolved role) and serves as the cache key. Parameter maps are
//! normalized by key order before hashing, so two requests that differ only
//! in map insertion order fingerprint identically.

use crate::request::QueryType;
use crate::role::Role;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Compute the fingerprint for `(role, query_type, parameters)`.
pub fn request_fingerprint(
    role: Role,
    query_type: QueryType,
    parameters: &HashMap<String, serde_json::Value>,
) -> String {
    let normalized: BTreeMap<&str, &serde_json::Value> =
        parameters.iter().map(|(k, v)| (k.as_str(), v)).collect();

    let mut hasher = Sha256::new();
    hasher.update(role.as_str().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(query_type.to_string().as_bytes());
    hasher.update(b"\x1f");
    for (key, value) in &normalized {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        // Canonical form: serde_json renders object keys in map order, and
        // BTreeMap ordering makes that deterministic for nested objects too.
        hasher.update(canonical_json(value).as_bytes());
        hasher.update(b"\x1e");
    }
    hex_digest(hasher)
}

/// Join two fingerprints into one cache key (request ⊕ context).
pub fn combine_fingerprints(a: &str, b: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(a.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(b.as_bytes());
    hex_digest(hasher)
}

fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<&String, &serde_json::Value> = map.iter().collect();
            let fields: Vec<String> = sorted
                .iter()
                .map(|(k, v)| format!("{}:{}", k, canonical_json(v)))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn identical_inputs_identical_fingerprints() {
        let p = params(&[
            ("home", serde_json::json!("georgia")),
            ("away", serde_json::json!("alabama")),
        ]);
        let a = request_fingerprint(Role::Analyst, QueryType::Prediction, &p);
        let b = request_fingerprint(Role::Analyst, QueryType::Prediction, &p);
        assert_eq!(a, b);
    }

    #[test]
    fn parameter_order_is_irrelevant() {
        let p1 = params(&[
            ("home", serde_json::json!("georgia")),
            ("away", serde_json::json!("alabama")),
        ]);
        let p2 = params(&[
            ("away", serde_json::json!("alabama")),
            ("home", serde_json::json!("georgia")),
        ]);
        assert_eq!(
            request_fingerprint(Role::Analyst, QueryType::Prediction, &p1),
            request_fingerprint(Role::Analyst, QueryType::Prediction, &p2),
        );
    }

    #[test]
    fn role_changes_fingerprint() {
        let p = params(&[("week", serde_json::json!(9))]);
        assert_ne!(
            request_fingerprint(Role::Production, QueryType::Prediction, &p),
            request_fingerprint(Role::Analyst, QueryType::Prediction, &p),
        );
    }

    #[test]
    fn query_type_changes_fingerprint() {
        let p = params(&[("week", serde_json::json!(9))]);
        assert_ne!(
            request_fingerprint(Role::Analyst, QueryType::Prediction, &p),
            request_fingerprint(Role::Analyst, QueryType::Explanation, &p),
        );
    }

    #[test]
    fn nested_object_key_order_is_irrelevant() {
        let v1 = serde_json::json!({"a": 1, "b": {"x": 1, "y": 2}});
        let v2 = serde_json::json!({"b": {"y": 2, "x": 1}, "a": 1});
        assert_eq!(canonical_json(&v1), canonical_json(&v2));
    }

    #[test]
    fn combined_fingerprint_is_order_sensitive() {
        assert_ne!(
            combine_fingerprints("abc", "def"),
            combine_fingerprints("def", "abc")
        );
    }
}
