//! The authorization endpoint.
//!
//! `GET` returns a structured description of the pending grant for the
//! external consent surface; `POST` (authenticated user) mints the
//! authorization code bound to a delegated session key and hands back the
//! redirect URL for the client to follow.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use super::scope_detail;
use crate::error::GatewayError;
use crate::state::SharedState;
use crate::store::oauth::{NewAuthCode, SessionConfig};
use crate::types::SessionId;

const AUTH_CODE_TTL_SECONDS: i64 = 10 * 60;

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub scope: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub mcp_slug: Option<String>,
}

#[instrument(skip_all, fields(client_id = %query.client_id))]
pub async fn get_authorize(
    State(state): State<SharedState>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Response, GatewayError> {
    if query.response_type != "code" {
        return Err(GatewayError::Validation(
            "response_type must be \"code\"".to_string(),
        ));
    }
    if query.code_challenge_method != "S256" {
        return Err(GatewayError::Validation(
            "code_challenge_method must be \"S256\"".to_string(),
        ));
    }
    if query.code_challenge.is_empty() {
        return Err(GatewayError::Validation(
            "code_challenge is required".to_string(),
        ));
    }

    let client = state
        .db
        .get_oauth_client(&query.client_id)
        .await?
        .filter(|client| client.is_active)
        .ok_or_else(|| GatewayError::Validation("unknown or inactive client".to_string()))?;

    if !client.redirect_uris.contains(&query.redirect_uri) {
        return Err(GatewayError::Validation(
            "redirect_uri is not registered for this client".to_string(),
        ));
    }

    let requested: Vec<&str> = query.scope.split_whitespace().collect();
    if requested.is_empty() {
        return Err(GatewayError::Validation("scope is required".to_string()));
    }
    for scope in &requested {
        if !client.allowed_scopes.iter().any(|s| s == scope) {
            return Err(GatewayError::Forbidden(format!(
                "scope '{scope}' is not allowed for this client"
            )));
        }
    }

    let effective_slug = query.mcp_slug.clone().or_else(|| client.mcp_slug.clone());

    // Aggregate the on-chain targets of every workflow attached to the
    // slug's MCP server, labeled with the originating workflow.
    let workflow_targets = match &effective_slug {
        Some(slug) => state
            .db
            .workflow_targets_for_slug(slug)
            .await?
            .into_iter()
            .map(|(workflow_name, target)| {
                json!({
                    "address": target.address,
                    "name": target.name,
                    "description": target.description,
                    "workflow": workflow_name,
                })
            })
            .collect(),
        None => Vec::new(),
    };

    let scopes: Vec<_> = requested
        .iter()
        .filter_map(|scope| scope_detail(scope))
        .collect();

    Ok(Json(json!({
        "client": {
            "id": client.id,
            "name": client.name,
            "description": client.description,
            "logoUrl": client.logo_url,
        },
        "requestedScopes": scopes,
        "redirectUri": query.redirect_uri,
        "state": query.state,
        "mcpSlug": effective_slug,
        "workflowTargets": workflow_targets,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub approved_scopes: Vec<String>,
    pub session_id: SessionId,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub mcp_slug: Option<String>,
}

#[instrument(skip_all, fields(client_id = %body.client_id))]
pub async fn post_authorize(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<ApproveRequest>,
) -> Result<Response, GatewayError> {
    let wallet = crate::auth::wallet_from_headers(&state.config.session_secret, &headers)?;
    let user = state.db.upsert_user_by_wallet(&wallet).await?;

    let client = state
        .db
        .get_oauth_client(&body.client_id)
        .await?
        .filter(|client| client.is_active)
        .ok_or_else(|| GatewayError::Validation("unknown or inactive client".to_string()))?;

    if !client.redirect_uris.contains(&body.redirect_uri) {
        return Err(GatewayError::Validation(
            "redirect_uri is not registered for this client".to_string(),
        ));
    }
    if body.code_challenge.is_empty() {
        return Err(GatewayError::Validation(
            "code_challenge is required".to_string(),
        ));
    }
    if body.approved_scopes.is_empty() {
        return Err(GatewayError::Validation(
            "approved_scopes must not be empty".to_string(),
        ));
    }
    for scope in &body.approved_scopes {
        if !client.allowed_scopes.contains(scope) {
            return Err(GatewayError::Forbidden(format!(
                "scope '{scope}' is not allowed for this client"
            )));
        }
    }

    let session = state
        .db
        .get_session_key(&user.id, &body.session_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("session not found".to_string()))?;
    if !session.is_active {
        return Err(GatewayError::Forbidden(
            "session is revoked or inactive".to_string(),
        ));
    }

    let effective_slug = body.mcp_slug.clone().or_else(|| client.mcp_slug.clone());
    let code = super::random_b64url(48);
    let expires_at = crate::store::now_unix() + AUTH_CODE_TTL_SECONDS;

    state
        .db
        .insert_auth_code(NewAuthCode {
            code: code.clone(),
            client_id: client.id.clone(),
            user_id: user.id.clone(),
            requested_scopes: body.approved_scopes.clone(),
            approved_scopes: body.approved_scopes.clone(),
            session_config: SessionConfig {
                valid_after: session.valid_after,
                valid_until: session.valid_until,
                scopes: session.scopes.clone(),
                session_id: session.session_id,
                mcp_slug: effective_slug,
            },
            code_challenge: body.code_challenge.clone(),
            redirect_uri: body.redirect_uri.clone(),
            expires_at,
        })
        .await?;

    let mut redirect = url::Url::parse(&body.redirect_uri)
        .map_err(|_| GatewayError::Validation("redirect_uri is not a valid URL".to_string()))?;
    redirect.query_pairs_mut().append_pair("code", &code);
    if let Some(state_param) = &body.state {
        redirect.query_pairs_mut().append_pair("state", state_param);
    }

    tracing::info!(client_id = %client.id, session = %session.session_id, "authorization code issued");

    Ok(Json(json!({ "redirect_url": redirect.to_string() })).into_response())
}
