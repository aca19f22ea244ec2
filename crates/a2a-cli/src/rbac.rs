//! RBAC collaborator for the HTTP surface (§6's permission map).
//!
//! There is no user/token store to validate `X-A2A-Token` against, only a
//! role -> permission map consulted per request. A plain function guard
//! returning a typed error, called at the top of each handler, rather than
//! an axum middleware `Layer`.

use axum::http::HeaderMap;

pub const ROLE_HEADER: &str = "x-a2a-role";
pub const TOKEN_HEADER: &str = "x-a2a-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Create,
    ReadAll,
    ReportResult,
    Assign,
    ReplayDlq,
}

#[derive(Debug, thiserror::Error)]
pub enum RbacError {
    #[error("missing X-A2A-Role header")]
    MissingRole,
    #[error("role '{0}' is not recognized")]
    UnknownRole(String),
    #[error("role '{0}' lacks the required permission")]
    Denied(String),
}

/// The permission map from §6. `worker` gets `assign` because `task/next`
/// (assignment) is a worker-initiated action, same as `report_result`.
fn permissions_for(role: &str) -> Option<&'static [Permission]> {
    match role {
        "submitter" => Some(&[Permission::Create, Permission::ReadAll]),
        "worker" => Some(&[
            Permission::ReportResult,
            Permission::ReadAll,
            Permission::Assign,
        ]),
        "auditor" => Some(&[Permission::ReadAll]),
        "admin" => Some(&[
            Permission::Create,
            Permission::Assign,
            Permission::ReportResult,
            Permission::ReplayDlq,
            Permission::ReadAll,
        ]),
        _ => None,
    }
}

/// Extract the caller's role from `X-A2A-Role` and check it carries
/// `required`. The `X-A2A-Token` header is read only for log-identity
/// purposes (hashed, never compared against a secret) -- there is no
/// per-caller credential store to validate it against.
pub fn require(headers: &HeaderMap, required: Permission) -> Result<String, RbacError> {
    let role = headers
        .get(ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(RbacError::MissingRole)?
        .to_owned();

    let perms = permissions_for(&role).ok_or_else(|| RbacError::UnknownRole(role.clone()))?;

    if !perms.contains(&required) {
        return Err(RbacError::Denied(role));
    }

    Ok(role)
}

/// A stable, non-reversible identifier for the caller's token, safe to put
/// in a structured log line without leaking the credential itself.
pub fn token_identity(headers: &HeaderMap) -> String {
    use sha2::{Digest, Sha256};
    match headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        Some(token) if !token.is_empty() => {
            let digest = Sha256::digest(token.as_bytes());
            hex::encode(&digest[..8])
        }
        _ => "anonymous".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_role(role: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(ROLE_HEADER, HeaderValue::from_str(role).unwrap());
        h
    }

    #[test]
    fn submitter_can_create() {
        let h = headers_with_role("submitter");
        assert!(require(&h, Permission::Create).is_ok());
    }

    #[test]
    fn submitter_cannot_report_result() {
        let h = headers_with_role("submitter");
        assert!(matches!(
            require(&h, Permission::ReportResult),
            Err(RbacError::Denied(_))
        ));
    }

    #[test]
    fn auditor_can_only_read() {
        let h = headers_with_role("auditor");
        assert!(require(&h, Permission::ReadAll).is_ok());
        assert!(require(&h, Permission::Create).is_err());
    }

    #[test]
    fn admin_can_replay_dlq() {
        let h = headers_with_role("admin");
        assert!(require(&h, Permission::ReplayDlq).is_ok());
    }

    #[test]
    fn missing_role_header_is_rejected() {
        let h = HeaderMap::new();
        assert!(matches!(
            require(&h, Permission::ReadAll),
            Err(RbacError::MissingRole)
        ));
    }

    #[test]
    fn unknown_role_is_rejected() {
        let h = headers_with_role("intern");
        assert!(matches!(
            require(&h, Permission::ReadAll),
            Err(RbacError::UnknownRole(_))
        ));
    }

    #[test]
    fn token_identity_is_stable_and_does_not_leak_token() {
        let mut h = HeaderMap::new();
        h.insert(TOKEN_HEADER, HeaderValue::from_static("s3cr3t-token"));
        let id1 = token_identity(&h);
        let id2 = token_identity(&h);
        assert_eq!(id1, id2);
        assert_ne!(id1, "s3cr3t-token");
    }

    #[test]
    fn token_identity_without_header_is_anonymous() {
        let h = HeaderMap::new();
        assert_eq!(token_identity(&h), "anonymous");
    }
}
