//! Signed-artifact-pointer verification (§4.2).
//!
//! Strips the three signature fields, canonicalizes the remainder to
//! sorted-key compact JSON, computes HMAC-SHA256 with the process-wide
//! `SECRET_KEY`, and compares in constant time via `Mac::verify_slice`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::error::DispatchError;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_FIELDS: &[&str] = &["signature", "signed_at", "signing_algorithm"];
const MAX_SIGNATURE_AGE: chrono::Duration = chrono::Duration::minutes(5);

/// Verify a signed artifact pointer package against `secret_key`.
///
/// `artifact` must be a JSON object carrying `pointers`, `signature`,
/// `signed_at` (RFC 3339), and `signing_algorithm`. `now` is injected so
/// callers (and tests) control the clock.
pub fn verify(artifact: &Value, secret_key: &[u8], now: DateTime<Utc>) -> Result<(), DispatchError> {
    let obj = artifact
        .as_object()
        .ok_or_else(|| DispatchError::ArtifactSignatureMissing("result is not an object".into()))?;

    for field in SIGNATURE_FIELDS {
        if !obj.contains_key(*field) {
            return Err(DispatchError::ArtifactSignatureMissing((*field).to_string()));
        }
    }

    let algorithm = obj
        .get("signing_algorithm")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if algorithm != "HMAC-SHA256" {
        return Err(DispatchError::ArtifactSignatureAlgorithmInvalid(algorithm.to_string()));
    }

    let signed_at_str = obj.get("signed_at").and_then(Value::as_str).unwrap_or_default();
    let signed_at = DateTime::parse_from_rfc3339(signed_at_str)
        .map_err(|_| DispatchError::ArtifactSignatureInvalid)?
        .with_timezone(&Utc);
    if now - signed_at > MAX_SIGNATURE_AGE {
        return Err(DispatchError::ArtifactSignatureExpired);
    }

    let signature_hex = obj.get("signature").and_then(Value::as_str).unwrap_or_default();
    let provided_mac = hex::decode(signature_hex).map_err(|_| DispatchError::ArtifactSignatureInvalid)?;

    let mut stripped = obj.clone();
    for field in SIGNATURE_FIELDS {
        stripped.remove(*field);
    }
    let canonical = canonicalize(&Value::Object(stripped));

    let mut mac = HmacSha256::new_from_slice(secret_key).expect("HMAC accepts a key of any size");
    mac.update(canonical.as_bytes());
    mac.verify_slice(&provided_mac)
        .map_err(|_| DispatchError::ArtifactSignatureInvalid)
}

/// Serialize `value` to canonical JSON: UTF-8, object keys sorted
/// lexicographically, compact separators, no insignificant whitespace.
///
/// `serde_json::Map` preserves insertion order, not sorted order, so each
/// object is rebuilt through a `BTreeMap` before encoding rather than
/// trusting the wire's key order.
pub fn canonicalize(value: &Value) -> String {
    serde_json::to_string(&sort_keys(value)).expect("canonicalized JSON always serializes")
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.iter().map(|(k, v)| (k.clone(), sort_keys(v))).collect();
            serde_json::to_value(sorted).expect("BTreeMap<String, Value> always serializes")
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Sign `artifact` (without the three signature fields) with `secret_key`,
/// returning the hex-encoded HMAC-SHA256. Used by tests and by any CLI
/// affordance that mints fixtures.
pub fn sign(artifact: &Value, secret_key: &[u8]) -> String {
    let canonical = canonicalize(artifact);
    let mut mac = HmacSha256::new_from_slice(secret_key).expect("HMAC accepts a key of any size");
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &[u8] = b"test-secret-key";

    fn signed_artifact(now: DateTime<Utc>) -> Value {
        let mut unsigned = json!({
            "pointers": [{"type": "log", "path": "s3://bucket/x", "sha256": "a".repeat(64)}],
        });
        let signature = sign(&unsigned, SECRET);
        unsigned["signature"] = json!(signature);
        unsigned["signed_at"] = json!(now.to_rfc3339());
        unsigned["signing_algorithm"] = json!("HMAC-SHA256");
        unsigned
    }

    #[test]
    fn valid_signature_verifies() {
        let now = Utc::now();
        let artifact = signed_artifact(now);
        assert!(verify(&artifact, SECRET, now).is_ok());
    }

    #[test]
    fn missing_signature_field_rejected() {
        let now = Utc::now();
        let mut artifact = signed_artifact(now);
        artifact.as_object_mut().unwrap().remove("signature");
        let err = verify(&artifact, SECRET, now).unwrap_err();
        assert!(matches!(err, DispatchError::ArtifactSignatureMissing(_)));
    }

    #[test]
    fn wrong_algorithm_rejected() {
        let now = Utc::now();
        let mut artifact = signed_artifact(now);
        artifact["signing_algorithm"] = json!("HMAC-SHA1");
        let err = verify(&artifact, SECRET, now).unwrap_err();
        assert!(matches!(err, DispatchError::ArtifactSignatureAlgorithmInvalid(_)));
    }

    #[test]
    fn expired_signature_rejected() {
        let signed_at = Utc::now() - chrono::Duration::minutes(10);
        let artifact = signed_artifact(signed_at);
        let err = verify(&artifact, SECRET, Utc::now()).unwrap_err();
        assert!(matches!(err, DispatchError::ArtifactSignatureExpired));
    }

    #[test]
    fn tampered_field_invalidates_signature() {
        let now = Utc::now();
        let mut artifact = signed_artifact(now);
        artifact["pointers"][0]["sha256"] = json!("b".repeat(64));
        let err = verify(&artifact, SECRET, now).unwrap_err();
        assert!(matches!(err, DispatchError::ArtifactSignatureInvalid));
    }

    #[test]
    fn wrong_secret_rejected() {
        let now = Utc::now();
        let artifact = signed_artifact(now);
        let err = verify(&artifact, b"wrong-secret", now).unwrap_err();
        assert!(matches!(err, DispatchError::ArtifactSignatureInvalid));
    }

    #[test]
    fn canonicalize_sorts_keys() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }
}
