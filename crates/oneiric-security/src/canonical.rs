use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::SecurityError;

/// Serialize `value` to the canonical byte form used for signing and
/// drift detection: UTF-8 JSON, object keys sorted, no insignificant
/// whitespace, numbers in serde_json's shortest round-trippable form.
pub fn canonical_json(value: &Value) -> Vec<u8> {
    let sorted = sort_json_keys(value.clone());
    serde_json::to_vec(&sorted).unwrap_or_default()
}

/// SHA-256 hex digest of the canonical serialization of `value`.
pub fn canonical_sha256(value: &Value) -> String {
    sha256_hex(&canonical_json(value))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{:x}", digest)
}

/// Check `bytes` against an expected hex digest.
pub fn verify_digest(expected: &str, bytes: &[u8]) -> Result<(), SecurityError> {
    let actual = sha256_hex(bytes);
    if actual != expected {
        return Err(SecurityError::DigestMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Recursively sort JSON object keys so map field ordering doesn't affect
/// the signed bytes.
fn sort_json_keys(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, sort_json_keys(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_bytes() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":2,"x":3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":3,"y":2},"b":1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_sha256(&a), canonical_sha256(&b));
    }

    #[test]
    fn no_insignificant_whitespace() {
        let v = json!({"a": [1, 2], "b": "x"});
        let bytes = canonical_json(&v);
        assert_eq!(bytes, br#"{"a":[1,2],"b":"x"}"#.to_vec());
    }

    #[test]
    fn canonical_round_trips() {
        let v = json!({"version": 1, "entries": [{"key": "cache", "priority": 100}]});
        let parsed: Value = serde_json::from_slice(&canonical_json(&v)).unwrap();
        assert_eq!(parsed, v);
    }

    #[test]
    fn digest_check_accepts_matching_and_rejects_tampered() {
        let digest = sha256_hex(b"artifact bytes");
        verify_digest(&digest, b"artifact bytes").unwrap();

        let err = verify_digest(&digest, b"tampered bytes").unwrap_err();
        match err {
            crate::SecurityError::DigestMismatch { expected, actual } => {
                assert_eq!(expected, digest);
                assert_ne!(actual, digest);
            }
            other => panic!("expected DigestMismatch, got {other:?}"),
        }
    }
}
