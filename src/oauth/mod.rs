//! OAuth 2.1 authorization server bound to delegated session keys.
//!
//! Access tokens issued here do not merely grant API access: each one
//! references a session key and inherits its lifetime, so a bearer carries
//! scoped, time-bounded signing authority over that key.

pub mod authorize;
pub mod bearer;
pub mod discovery;
pub mod register;
pub mod token;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as b64url;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// The enumerated scope set. There is no general scope model beyond these.
pub const SCOPES_SUPPORTED: [&str; 3] = ["x402:payments", "mcp:tools", "workflow:token-approvals"];

/// Display metadata for one OAuth scope, consumed by the consent surface.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthScopeDetail {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub budget_enforceable: bool,
}

/// Scope details, in the order of `SCOPES_SUPPORTED`.
pub fn scope_detail(id: &str) -> Option<OAuthScopeDetail> {
    match id {
        "x402:payments" => Some(OAuthScopeDetail {
            id: "x402:payments",
            name: "Pay-per-call payments",
            description: "Sign transferWithAuthorization payments with the tokens approved for this session",
            kind: "eip712",
            budget_enforceable: false,
        }),
        "mcp:tools" => Some(OAuthScopeDetail {
            id: "mcp:tools",
            name: "Tool access",
            description: "Invoke the tools exposed by this MCP server",
            kind: "execute",
            budget_enforceable: true,
        }),
        "workflow:token-approvals" => Some(OAuthScopeDetail {
            id: "workflow:token-approvals",
            name: "Workflow token approvals",
            description: "Execute token approvals required by workflow steps",
            kind: "execute",
            budget_enforceable: true,
        }),
        _ => None,
    }
}

/// `base64url(sha256(verifier))`, the S256 PKCE transform.
pub fn s256_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    b64url.encode(digest)
}

/// Hex SHA-256 of a raw bearer token; tokens are only ever stored hashed.
pub fn token_hash(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// `n` random bytes, base64url without padding.
pub fn random_b64url(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::rng().fill_bytes(&mut bytes);
    b64url.encode(bytes)
}

/// A fresh client id: `mcp_` + 16 random bytes as hex.
pub fn new_client_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    format!("mcp_{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s256_matches_rfc7636_appendix_b() {
        // Test vector from RFC 7636 appendix B.
        assert_eq!(
            s256_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn client_ids_have_the_mcp_prefix() {
        let id = new_client_id();
        assert!(id.starts_with("mcp_"));
        assert_eq!(id.len(), 4 + 32);
        assert_ne!(new_client_id(), new_client_id());
    }

    #[test]
    fn token_hash_is_hex_sha256() {
        assert_eq!(token_hash("abc").len(), 64);
        assert_eq!(
            token_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn every_supported_scope_has_details() {
        for scope in SCOPES_SUPPORTED {
            assert!(scope_detail(scope).is_some(), "missing detail for {scope}");
        }
        assert!(scope_detail("unknown:scope").is_none());
    }
}
