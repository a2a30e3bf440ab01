//! RFC 8414 / RFC 9470 discovery documents.
//!
//! Served both globally and per slug. The slug-scoped authorization server
//! identifier is `{issuer}/oauth/{slug}`; its protected resource is
//! `{mcp_public_url}/mcp/{slug}`. All discovery responses are uncacheable
//! and CORS-open.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

use super::SCOPES_SUPPORTED;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct DiscoveryQuery {
    #[serde(default)]
    pub mcp_slug: Option<String>,
}

/// The `oauth-authorization-server` document, optionally slug-scoped.
pub fn authorization_server_metadata(
    app_url: &str,
    mcp_public_url: &str,
    slug: Option<&str>,
) -> Value {
    let issuer = match slug {
        Some(slug) => format!("{app_url}/oauth/{slug}"),
        None => app_url.to_string(),
    };
    let slug_query = slug
        .map(|s| format!("?mcp_slug={}", urlencode(s)))
        .unwrap_or_default();
    json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{app_url}/oauth/authorize{slug_query}"),
        "token_endpoint": format!("{mcp_public_url}/token"),
        "registration_endpoint": format!("{mcp_public_url}/register{slug_query}"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code"],
        "code_challenge_methods_supported": ["S256"],
        "scopes_supported": SCOPES_SUPPORTED,
        "token_endpoint_auth_methods_supported": ["client_secret_post", "none"],
    })
}

/// The `oauth-protected-resource` document, optionally slug-scoped.
pub fn protected_resource_metadata(
    app_url: &str,
    mcp_public_url: &str,
    slug: Option<&str>,
) -> Value {
    let (resource, authorization_server) = match slug {
        Some(slug) => (
            format!("{mcp_public_url}/mcp/{slug}"),
            format!("{app_url}/oauth/{slug}"),
        ),
        None => (mcp_public_url.to_string(), app_url.to_string()),
    };
    json!({
        "resource": resource,
        "authorization_servers": [authorization_server],
        "scopes_supported": SCOPES_SUPPORTED,
        "bearer_methods_supported": ["header"],
    })
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn no_store(body: Value) -> Response {
    ([(header::CACHE_CONTROL, "no-store")], Json(body)).into_response()
}

#[instrument(skip_all)]
pub async fn get_authorization_server(
    State(state): State<SharedState>,
    Query(query): Query<DiscoveryQuery>,
) -> Response {
    no_store(authorization_server_metadata(
        &state.config.app_url,
        &state.config.mcp_public_url,
        query.mcp_slug.as_deref(),
    ))
}

#[instrument(skip_all)]
pub async fn get_protected_resource(
    State(state): State<SharedState>,
    Query(query): Query<DiscoveryQuery>,
) -> Response {
    no_store(protected_resource_metadata(
        &state.config.app_url,
        &state.config.mcp_public_url,
        query.mcp_slug.as_deref(),
    ))
}

/// `openid-configuration` mirrors the authorization-server document for
/// client compatibility.
#[instrument(skip_all)]
pub async fn get_openid_configuration(
    State(state): State<SharedState>,
    Query(query): Query<DiscoveryQuery>,
) -> Response {
    no_store(authorization_server_metadata(
        &state.config.app_url,
        &state.config.mcp_public_url,
        query.mcp_slug.as_deref(),
    ))
}

#[instrument(skip_all)]
pub async fn get_authorization_server_for_slug(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> Response {
    no_store(authorization_server_metadata(
        &state.config.app_url,
        &state.config.mcp_public_url,
        Some(&slug),
    ))
}

#[instrument(skip_all)]
pub async fn get_protected_resource_for_slug(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> Response {
    no_store(protected_resource_metadata(
        &state.config.app_url,
        &state.config.mcp_public_url,
        Some(&slug),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: &str = "https://app.example";
    const MCP: &str = "https://mcp.example";

    #[test]
    fn plain_metadata_has_exact_fields() {
        let doc = authorization_server_metadata(APP, MCP, None);
        assert_eq!(doc["issuer"], json!(APP));
        assert_eq!(
            doc["authorization_endpoint"],
            json!("https://app.example/oauth/authorize")
        );
        assert_eq!(doc["token_endpoint"], json!("https://mcp.example/token"));
        assert_eq!(
            doc["registration_endpoint"],
            json!("https://mcp.example/register")
        );
        assert_eq!(doc["response_types_supported"], json!(["code"]));
        assert_eq!(doc["grant_types_supported"], json!(["authorization_code"]));
        assert_eq!(doc["code_challenge_methods_supported"], json!(["S256"]));
        assert_eq!(
            doc["scopes_supported"],
            json!(["x402:payments", "mcp:tools", "workflow:token-approvals"])
        );
        assert_eq!(
            doc["token_endpoint_auth_methods_supported"],
            json!(["client_secret_post", "none"])
        );
    }

    #[test]
    fn slug_metadata_appends_encoded_slug() {
        let doc = authorization_server_metadata(APP, MCP, Some("my demo"));
        assert_eq!(doc["issuer"], json!("https://app.example/oauth/my demo"));
        assert_eq!(
            doc["authorization_endpoint"],
            json!("https://app.example/oauth/authorize?mcp_slug=my+demo")
        );
        assert_eq!(
            doc["registration_endpoint"],
            json!("https://mcp.example/register?mcp_slug=my+demo")
        );
    }

    #[test]
    fn protected_resource_is_slug_aware() {
        let plain = protected_resource_metadata(APP, MCP, None);
        assert_eq!(plain["resource"], json!(MCP));
        assert_eq!(plain["authorization_servers"], json!([APP]));
        assert_eq!(plain["bearer_methods_supported"], json!(["header"]));

        let scoped = protected_resource_metadata(APP, MCP, Some("demo"));
        assert_eq!(scoped["resource"], json!("https://mcp.example/mcp/demo"));
        assert_eq!(
            scoped["authorization_servers"],
            json!(["https://app.example/oauth/demo"])
        );
    }
}
