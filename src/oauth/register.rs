//! RFC 7591 dynamic client registration with redirect-set deduplication.
//!
//! Re-registering with the same normalized redirect set returns the same
//! client id with a freshly rotated secret, so agent clients that lose
//! state do not accumulate duplicate registrations.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use super::discovery::DiscoveryQuery;
use super::{SCOPES_SUPPORTED, new_client_id, random_b64url};
use crate::error::GatewayError;
use crate::state::SharedState;
use crate::store::oauth::normalize_redirect_uris;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub client_uri: Option<String>,
    #[serde(default)]
    pub logo_uri: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[instrument(skip_all)]
pub async fn post_register(
    State(state): State<SharedState>,
    Query(query): Query<DiscoveryQuery>,
    Json(body): Json<RegisterRequest>,
) -> Result<Response, GatewayError> {
    if body.redirect_uris.is_empty() {
        return Err(GatewayError::Validation(
            "redirect_uris must contain at least one entry".to_string(),
        ));
    }
    for uri in &body.redirect_uris {
        url::Url::parse(uri).map_err(|_| {
            GatewayError::Validation(format!("redirect_uri '{uri}' is not a valid URL"))
        })?;
    }

    let allowed_scopes: Vec<String> = match &body.scope {
        Some(scope) => {
            let requested: Vec<String> = scope
                .split_whitespace()
                .filter(|s| SCOPES_SUPPORTED.contains(s))
                .map(ToOwned::to_owned)
                .collect();
            if requested.is_empty() {
                SCOPES_SUPPORTED.iter().map(|s| s.to_string()).collect()
            } else {
                requested
            }
        }
        None => SCOPES_SUPPORTED.iter().map(|s| s.to_string()).collect(),
    };

    let client_name = body
        .client_name
        .clone()
        .unwrap_or_else(|| "MCP client".to_string());
    let client_secret = random_b64url(32);
    let secret_hash =
        bcrypt::hash(&client_secret, bcrypt::DEFAULT_COST).map_err(GatewayError::internal)?;

    let normalized = normalize_redirect_uris(&body.redirect_uris);
    let existing = state.db.find_client_by_redirect_set(&normalized).await?;

    let (client_id, status) = match existing {
        Some(client) => {
            state
                .db
                .rotate_oauth_client(
                    &client.id,
                    &secret_hash,
                    &client_name,
                    query.mcp_slug.as_deref(),
                )
                .await?;
            tracing::info!(client_id = %client.id, "rotated secret for re-registered client");
            (client.id, StatusCode::OK)
        }
        None => {
            let id = new_client_id();
            state
                .db
                .insert_oauth_client(
                    &id,
                    &secret_hash,
                    &client_name,
                    body.client_uri.as_deref(),
                    body.logo_uri.as_deref(),
                    &body.redirect_uris,
                    &allowed_scopes,
                    query.mcp_slug.as_deref(),
                )
                .await?;
            tracing::info!(client_id = %id, "registered new client");
            (id, StatusCode::CREATED)
        }
    };

    let response = json!({
        "client_id": client_id,
        "client_secret": client_secret,
        "client_secret_expires_at": 0,
        "client_id_issued_at": crate::store::now_unix(),
        "client_name": client_name,
        "redirect_uris": body.redirect_uris,
        "grant_types": ["authorization_code"],
        "response_types": ["code"],
        "token_endpoint_auth_method": "client_secret_post",
        "scope": allowed_scopes.join(" "),
    });
    Ok((status, Json(response)).into_response())
}
