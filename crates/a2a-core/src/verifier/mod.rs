//! Artifact Verifier: two validators over a task's `result` payload.
//!
//! A payload with a `pointers` field goes through [`signature`]
//! (HMAC-SHA256 signed-artifact-pointer verification). A payload carrying
//! the full canonical-pack field set goes through [`canonical_pack`]. Any
//! other shape is accepted as an opaque, unvalidated result blob -- see
//! spec.md §9, "Signed results vs. canonical packs".

pub mod canonical_pack;
pub mod signature;

/// The fixed, ordered field list of a canonical pack (§4.2).
pub const CANONICAL_PACK_FIELDS: &[&str] = &[
    "task_code",
    "trace_id",
    "status",
    "submit_path",
    "ata_path",
    "evidence_paths",
    "sha256_map",
    "ruleset_sha256",
];

/// `true` if `result` carries every canonical-pack field (in any order --
/// [`canonical_pack::validate`] is what actually checks ordering).
pub fn looks_like_canonical_pack(result: &serde_json::Value) -> bool {
    let Some(obj) = result.as_object() else {
        return false;
    };
    CANONICAL_PACK_FIELDS.iter().all(|f| obj.contains_key(*f))
}

/// `true` if `result` carries a `pointers` field (the signed-artifact
/// shape).
pub fn looks_like_signed_pointer(result: &serde_json::Value) -> bool {
    result.get("pointers").is_some()
}
