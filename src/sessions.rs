//! HTTP surface of the session-key registry and the signing service.
//!
//! All routes require the authenticated-user capability. `POST /sessions`
//! accepts both the legacy shape (`allowedTargets`/`allowedSelectors`/
//! `approvedContracts`) and the scoped shape (`scopes` + `onChainParams`);
//! the missing half is synthesized and both are persisted.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use crate::auth::wallet_from_headers;
use crate::crypto::HybridEncrypted;
use crate::error::GatewayError;
use crate::scope::{
    ApprovedContract, OnChainParams, SessionScope, flatten_scopes_to_onchain_params,
};
use crate::sign::TransferSignRequest;
use crate::state::SharedState;
use crate::store::session_keys::NewSessionKey;
use crate::store::{RevokeOutcome, User};
use crate::types::{
    EvmAddress, HexEncodedNonce, SessionId, TokenAmount, UnixTimestamp,
};

async fn require_user(state: &SharedState, headers: &HeaderMap) -> Result<User, GatewayError> {
    let wallet = wallet_from_headers(&state.config.session_secret, headers)?;
    state.db.upsert_user_by_wallet(&wallet).await
}

#[instrument(skip_all)]
pub async fn list_sessions(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let user = require_user(&state, &headers).await?;
    let sessions = state.db.list_active_session_keys(&user.id).await?;
    let summaries: Vec<_> = sessions.iter().map(|s| s.summary()).collect();
    Ok(Json(json!({ "sessions": summaries })).into_response())
}

#[instrument(skip_all)]
pub async fn get_session(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(session_id): Path<SessionId>,
) -> Result<Response, GatewayError> {
    let user = require_user(&state, &headers).await?;
    let session = state
        .db
        .get_session_key(&user.id, &session_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("session not found".to_string()))?;
    Ok(Json(session.summary()).into_response())
}

#[instrument(skip_all)]
pub async fn revoke_session(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(session_id): Path<SessionId>,
) -> Result<Response, GatewayError> {
    let user = require_user(&state, &headers).await?;
    match state.db.revoke_session_key(&user.id, &session_id).await? {
        RevokeOutcome::Revoked => {
            tracing::info!(session = %session_id, "session revoked");
            Ok(Json(json!({ "status": "revoked" })).into_response())
        }
        RevokeOutcome::AlreadyRevoked => {
            Ok(Json(json!({ "status": "already_revoked" })).into_response())
        }
        RevokeOutcome::NotFound => Err(GatewayError::NotFound("session not found".to_string())),
    }
}

/// Both accepted creation shapes in one body. The scoped shape wins when
/// both halves are present.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub session_id: SessionId,
    pub session_key_address: EvmAddress,
    pub encrypted_private_key: HybridEncrypted,
    pub valid_after: u64,
    pub valid_until: u64,
    #[serde(default)]
    pub scopes: Option<Vec<SessionScope>>,
    #[serde(default)]
    pub on_chain_params: Option<OnChainParams>,
    // Legacy shape.
    #[serde(default)]
    pub allowed_targets: Option<Vec<EvmAddress>>,
    #[serde(default)]
    pub allowed_selectors: Option<Vec<crate::types::Selector>>,
    #[serde(default)]
    pub approved_contracts: Option<Vec<ApprovedContract>>,
}

#[instrument(skip_all)]
pub async fn create_session(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Response, GatewayError> {
    let user = require_user(&state, &headers).await?;

    // Canonicalize: synthesize scopes from the legacy contract list, or the
    // legacy fields from the scopes, whichever is missing.
    let scopes = match body.scopes {
        Some(scopes) if !scopes.is_empty() => scopes,
        _ => {
            let approved = body.approved_contracts.clone().unwrap_or_default();
            if approved.is_empty() {
                return Err(GatewayError::Validation(
                    "either scopes or approvedContracts are required".to_string(),
                ));
            }
            vec![SessionScope::default_payments_scope(approved)]
        }
    };

    // Legacy callers spell the grant parameters out; scoped callers get
    // them flattened from the scopes.
    let on_chain_params = match body.on_chain_params {
        Some(params) => params,
        None if body.allowed_targets.is_some() || body.allowed_selectors.is_some() => {
            OnChainParams {
                allowed_targets: body.allowed_targets.clone().unwrap_or_default(),
                allowed_selectors: body.allowed_selectors.clone().unwrap_or_default(),
                approved_contracts: flatten_scopes_to_onchain_params(&scopes).approved_contracts,
            }
        }
        None => flatten_scopes_to_onchain_params(&scopes),
    };

    let approved_contracts = body.approved_contracts.unwrap_or_else(|| {
        scopes
            .iter()
            .filter_map(|scope| match scope {
                SessionScope::Eip712(eip712) => Some(eip712.approved_contracts.clone()),
                SessionScope::Execute(_) => None,
            })
            .flatten()
            .collect()
    });

    let record = state
        .db
        .create_session_key(NewSessionKey {
            user_id: user.id,
            session_id: body.session_id,
            session_key_address: body.session_key_address,
            encrypted_private_key: body.encrypted_private_key,
            scopes,
            on_chain_params,
            approved_contracts,
            valid_after: body.valid_after,
            valid_until: body.valid_until,
        })
        .await?;

    tracing::info!(session = %record.session_id, "session key registered");
    Ok((StatusCode::CREATED, Json(record.summary())).into_response())
}

/// `POST /sessions/:sessionId/sign` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequestBody {
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: HexEncodedNonce,
    pub chain_id: u64,
    pub token_address: EvmAddress,
}

#[instrument(skip_all, fields(session = %session_id))]
pub async fn sign_transfer(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(session_id): Path<SessionId>,
    Json(body): Json<SignRequestBody>,
) -> Result<Response, GatewayError> {
    let user = require_user(&state, &headers).await?;
    let session = state
        .db
        .get_session_key(&user.id, &session_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("session not found".to_string()))?;

    let wallet = user.wallet()?;
    let context = session.signing_context(wallet);
    let request = TransferSignRequest {
        from: body.from,
        to: body.to,
        value: body.value,
        valid_after: body.valid_after,
        valid_before: body.valid_before,
        nonce: body.nonce,
        token_address: body.token_address,
        chain_id: body.chain_id,
    };

    let envelope = state.signing.sign_transfer(&context, &request)?;
    Ok(Json(json!({ "signature": envelope.to_hex() })).into_response())
}
