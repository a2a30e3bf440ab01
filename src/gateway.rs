//! HTTP route surface of the gateway.
//!
//! Assembles every public endpoint: health, MCP transport, OAuth discovery
//! (global, path-inserted, and slug-prefixed variants), dynamic client
//! registration, authorization and token endpoints, and the session-key
//! registry.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{self, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::error::GatewayError;
use crate::mcp::protocol::{PROTOCOL_VERSION_HEADER, SESSION_ID_HEADER};
use crate::mcp::session as mcp_session;
use crate::oauth::{authorize, discovery, register, token};
use crate::sessions;
use crate::state::SharedState;

#[instrument(skip_all)]
pub async fn get_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn post_mcp(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, GatewayError> {
    mcp_session::handle_post(state, slug, headers, body).await
}

async fn get_mcp(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    mcp_session::handle_get(state, slug, headers).await
}

async fn delete_mcp(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    mcp_session::handle_delete(state, slug, headers).await
}

/// RFC 8414 path-insertion variant: the metadata of issuer
/// `https://host/oauth/demo` is served under
/// `/.well-known/oauth-authorization-server/oauth/demo`.
fn slug_from_inserted_path(rest: &str) -> Option<String> {
    let rest = rest.trim_matches('/');
    if rest.is_empty() {
        return None;
    }
    let slug = rest
        .strip_prefix("oauth/")
        .or_else(|| rest.strip_prefix("mcp/"))
        .unwrap_or(rest);
    (!slug.is_empty()).then(|| slug.to_string())
}

async fn get_authorization_server_inserted(
    State(state): State<SharedState>,
    Path(rest): Path<String>,
) -> Response {
    let slug = slug_from_inserted_path(&rest);
    discovery_no_store(discovery::authorization_server_metadata(
        &state.config.app_url,
        &state.config.mcp_public_url,
        slug.as_deref(),
    ))
}

async fn get_protected_resource_inserted(
    State(state): State<SharedState>,
    Path(rest): Path<String>,
) -> Response {
    let slug = slug_from_inserted_path(&rest);
    discovery_no_store(discovery::protected_resource_metadata(
        &state.config.app_url,
        &state.config.mcp_public_url,
        slug.as_deref(),
    ))
}

fn discovery_no_store(body: serde_json::Value) -> Response {
    (
        [(axum::http::header::CACHE_CONTROL, "no-store")],
        Json(body),
    )
        .into_response()
}

/// The full route table.
pub fn routes(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            HeaderName::from_static(SESSION_ID_HEADER),
            HeaderName::from_static(PROTOCOL_VERSION_HEADER),
        ])
        .expose_headers([HeaderName::from_static(SESSION_ID_HEADER)]);

    Router::new()
        .route("/health", get(get_health))
        // MCP transport
        .route("/mcp/{slug}", post(post_mcp).get(get_mcp).delete(delete_mcp))
        // Discovery: global, path-inserted, and slug-prefixed variants
        .route(
            "/.well-known/oauth-authorization-server",
            get(discovery::get_authorization_server),
        )
        .route(
            "/.well-known/oauth-authorization-server/{*rest}",
            get(get_authorization_server_inserted),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(discovery::get_protected_resource),
        )
        .route(
            "/.well-known/oauth-protected-resource/{*rest}",
            get(get_protected_resource_inserted),
        )
        .route(
            "/.well-known/openid-configuration",
            get(discovery::get_openid_configuration),
        )
        .route(
            "/mcp/{slug}/.well-known/oauth-authorization-server",
            get(discovery::get_authorization_server_for_slug),
        )
        .route(
            "/mcp/{slug}/.well-known/oauth-protected-resource",
            get(discovery::get_protected_resource_for_slug),
        )
        .route(
            "/mcp/{slug}/.well-known/openid-configuration",
            get(discovery::get_authorization_server_for_slug),
        )
        .route(
            "/oauth/{slug}/.well-known/oauth-authorization-server",
            get(discovery::get_authorization_server_for_slug),
        )
        .route(
            "/oauth/{slug}/.well-known/oauth-protected-resource",
            get(discovery::get_protected_resource_for_slug),
        )
        .route(
            "/oauth/{slug}/.well-known/openid-configuration",
            get(discovery::get_authorization_server_for_slug),
        )
        // OAuth endpoints
        .route("/register", post(register::post_register))
        .route(
            "/authorize",
            get(authorize::get_authorize).post(authorize::post_authorize),
        )
        .route("/token", post(token::post_token))
        // Session-key registry + signing
        .route(
            "/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route(
            "/sessions/{session_id}",
            get(sessions::get_session).delete(sessions::revoke_session),
        )
        .route("/sessions/{session_id}/sign", post(sessions::sign_transfer))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_paths_resolve_slugs() {
        assert_eq!(slug_from_inserted_path("oauth/demo"), Some("demo".into()));
        assert_eq!(slug_from_inserted_path("mcp/demo"), Some("demo".into()));
        assert_eq!(slug_from_inserted_path("demo"), Some("demo".into()));
        assert_eq!(slug_from_inserted_path(""), None);
        assert_eq!(slug_from_inserted_path("/"), None);
    }
}
