//! The token endpoint: authorization-code + PKCE exchange.
//!
//! Accepts both `application/x-www-form-urlencoded` and JSON bodies. Every
//! validation step fails with its own RFC 6749 error body; the code is
//! marked used in the same transaction that persists the access token.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use super::{random_b64url, s256_challenge, token_hash};
use crate::error::GatewayError;
use crate::state::SharedState;
use crate::store::RedeemError;

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub code_verifier: Option<String>,
}

fn oauth_error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(json!({ "error": error, "error_description": description })),
    )
        .into_response()
}

fn invalid_grant(description: &str) -> Response {
    oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", description)
}

#[instrument(skip_all)]
pub async fn post_token(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let request: TokenRequest = if content_type.starts_with("application/json") {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(_) => {
                return Ok(oauth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    "request body is not valid JSON",
                ));
            }
        }
    } else {
        match serde_urlencoded::from_bytes(&body) {
            Ok(request) => request,
            Err(_) => {
                return Ok(oauth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    "request body is not valid form encoding",
                ));
            }
        }
    };

    // 1. Grant type.
    match request.grant_type.as_deref() {
        Some("authorization_code") => {}
        _ => {
            return Ok(oauth_error(
                StatusCode::BAD_REQUEST,
                "unsupported_grant_type",
                "only authorization_code is supported",
            ));
        }
    }

    // 2. Required parameters.
    let (Some(code), Some(redirect_uri), Some(client_id), Some(client_secret), Some(code_verifier)) = (
        request.code,
        request.redirect_uri,
        request.client_id,
        request.client_secret,
        request.code_verifier,
    ) else {
        return Ok(oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "code, redirect_uri, client_id, client_secret, and code_verifier are required",
        ));
    };

    // 3. Client authentication.
    let client = match state.db.get_oauth_client(&client_id).await? {
        Some(client) if client.is_active => client,
        _ => {
            return Ok(oauth_error(
                StatusCode::UNAUTHORIZED,
                "invalid_client",
                "unknown or inactive client",
            ));
        }
    };
    let secret_ok =
        bcrypt::verify(&client_secret, &client.secret_hash).unwrap_or(false);
    if !secret_ok {
        return Ok(oauth_error(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "client authentication failed",
        ));
    }

    // 4-7. Code validity, redirect binding, PKCE, and session liveness are
    // checked inside the redemption transaction.
    let computed_challenge = s256_challenge(&code_verifier);
    let raw_token = random_b64url(64);
    let hash = token_hash(&raw_token);

    let redeemed = match state
        .db
        .redeem_auth_code(&code, &client.id, &redirect_uri, &computed_challenge, &hash)
        .await?
    {
        Ok(redeemed) => redeemed,
        Err(reason) => {
            let response = match reason {
                RedeemError::CodeNotFound => invalid_grant("authorization code not found"),
                RedeemError::CodeUsed => invalid_grant("authorization code already used"),
                RedeemError::CodeExpired => invalid_grant("authorization code expired"),
                RedeemError::CodeClientMismatch => {
                    invalid_grant("authorization code was issued to another client")
                }
                RedeemError::RedirectMismatch => {
                    invalid_grant("redirect_uri does not match the authorization request")
                }
                RedeemError::PkceMismatch => invalid_grant("code_verifier does not match"),
                RedeemError::SessionMissing => {
                    invalid_grant("linked session key no longer exists")
                }
                RedeemError::SessionInactive => invalid_grant("linked session key is revoked"),
            };
            return Ok(response);
        }
    };

    let expires_in = (redeemed.expires_at - crate::store::now_unix()).max(0);
    tracing::info!(
        client_id = %client.id,
        session = %redeemed.session_id,
        "access token issued"
    );

    Ok(Json(json!({
        "access_token": raw_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "scope": redeemed.scopes.join(" "),
        "session_id": redeemed.session_id,
        "wallet_address": redeemed.wallet_address,
    }))
    .into_response())
}
