//! Canonical-pack validation (§4.2): a fixed, ordered field-list result
//! shape used for downstream gate evaluation.

use serde_json::Value;
use uuid::Uuid;

use crate::error::DispatchError;

use super::CANONICAL_PACK_FIELDS;

const ALLOWED_STATUSES: &[&str] = &["PASS", "FAIL", "ERROR"];

/// Validate a canonical pack. `result` must be a JSON object whose keys,
/// in insertion order, exactly match [`CANONICAL_PACK_FIELDS`] -- `serde_json`
/// with the `preserve_order` feature keeps that order available here.
pub fn validate(result: &Value) -> Result<(), DispatchError> {
    let obj = result
        .as_object()
        .ok_or_else(|| DispatchError::MissingRequiredField("result is not an object".into()))?;

    for field in CANONICAL_PACK_FIELDS {
        if !obj.contains_key(*field) {
            return Err(DispatchError::MissingRequiredField((*field).to_string()));
        }
    }

    let actual_order: Vec<&str> = obj.keys().map(String::as_str).collect();
    if actual_order != CANONICAL_PACK_FIELDS {
        return Err(DispatchError::InvalidFieldOrder);
    }

    let task_code = require_str(obj, "task_code")?;
    let trace_id = require_str(obj, "trace_id")?;
    let status = require_str(obj, "status")?;
    let _submit_path = require_str(obj, "submit_path")?;
    let _ata_path = require_str(obj, "ata_path")?;
    let evidence_paths = obj
        .get("evidence_paths")
        .and_then(Value::as_array)
        .ok_or_else(|| DispatchError::InvalidFieldFormat("evidence_paths must be an array".into()))?;
    for path in evidence_paths {
        if path.as_str().is_none() {
            return Err(DispatchError::InvalidFieldFormat(
                "all evidence_paths must be strings".into(),
            ));
        }
    }
    let sha256_map = obj
        .get("sha256_map")
        .and_then(Value::as_object)
        .ok_or_else(|| DispatchError::InvalidFieldFormat("sha256_map must be an object".into()))?;
    let ruleset_sha256 = require_str(obj, "ruleset_sha256")?;
    let _ = task_code;

    if !ALLOWED_STATUSES.contains(&status) {
        return Err(DispatchError::InvalidStatus(status.to_string()));
    }

    let parsed = Uuid::parse_str(trace_id).map_err(|_| DispatchError::InvalidUuid(trace_id.to_string()))?;
    if parsed.get_version_num() != 4 {
        return Err(DispatchError::InvalidUuid(trace_id.to_string()));
    }

    if !is_sha256(ruleset_sha256) {
        return Err(DispatchError::InvalidSha256(ruleset_sha256.to_string()));
    }
    for (path, hash) in sha256_map {
        let hash = hash
            .as_str()
            .ok_or_else(|| DispatchError::InvalidFieldFormat(format!("sha256_map[{path}] must be a string")))?;
        if !is_sha256(hash) {
            return Err(DispatchError::InvalidSha256(format!("{path}: {hash}")));
        }
    }

    Ok(())
}

fn require_str<'a>(obj: &'a serde_json::Map<String, Value>, field: &str) -> Result<&'a str, DispatchError> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::InvalidFieldFormat(format!("{field} must be a string")))
}

fn is_sha256(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_pack() -> Value {
        json!({
            "task_code": "T1",
            "trace_id": Uuid::new_v4().to_string(),
            "status": "PASS",
            "submit_path": "/submit",
            "ata_path": "/ata",
            "evidence_paths": ["/ev1", "/ev2"],
            "sha256_map": {"file.rs": "a".repeat(64)},
            "ruleset_sha256": "b".repeat(64),
        })
    }

    #[test]
    fn valid_pack_passes() {
        assert!(validate(&valid_pack()).is_ok());
    }

    #[test]
    fn missing_field_rejected() {
        let mut pack = valid_pack();
        pack.as_object_mut().unwrap().remove("ruleset_sha256");
        let err = validate(&pack).unwrap_err();
        assert!(matches!(err, DispatchError::MissingRequiredField(_)));
    }

    #[test]
    fn permuted_fields_rejected_as_invalid_order() {
        // Rebuild the object with two fields swapped -- insertion order
        // determines iteration order in a `serde_json::Map`.
        let mut pack = serde_json::Map::new();
        pack.insert("trace_id".into(), json!(Uuid::new_v4().to_string()));
        pack.insert("task_code".into(), json!("T1"));
        pack.insert("status".into(), json!("PASS"));
        pack.insert("submit_path".into(), json!("/submit"));
        pack.insert("ata_path".into(), json!("/ata"));
        pack.insert("evidence_paths".into(), json!([]));
        pack.insert("sha256_map".into(), json!({}));
        pack.insert("ruleset_sha256".into(), json!("a".repeat(64)));
        let err = validate(&Value::Object(pack)).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidFieldOrder));
    }

    #[test]
    fn invalid_status_rejected() {
        let mut pack = valid_pack();
        pack["status"] = json!("UNKNOWN");
        let err = validate(&pack).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidStatus(_)));
    }

    #[test]
    fn non_v4_uuid_rejected() {
        let mut pack = valid_pack();
        // A nil UUID is version 0, not 4.
        pack["trace_id"] = json!(Uuid::nil().to_string());
        let err = validate(&pack).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidUuid(_)));
    }

    #[test]
    fn bad_sha256_rejected() {
        let mut pack = valid_pack();
        pack["ruleset_sha256"] = json!("not-hex");
        let err = validate(&pack).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidSha256(_)));
    }

    #[test]
    fn bad_sha256_in_map_rejected() {
        let mut pack = valid_pack();
        pack["sha256_map"]["file.rs"] = json!("short");
        let err = validate(&pack).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidSha256(_)));
    }
}
