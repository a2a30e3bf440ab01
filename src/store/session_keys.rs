//! The session-key registry: persistent metadata for delegated keys.
//!
//! Private key material only leaves this table inside the hybrid envelope;
//! list and detail reads never include it.

use serde::Serialize;
use sqlx::FromRow;

use super::{Db, new_id, now_unix};
use crate::crypto::HybridEncrypted;
use crate::error::GatewayError;
use crate::scope::{ApprovedContract, OnChainParams, SessionScope};
use crate::sign::SessionSigningContext;
use crate::types::{EvmAddress, SessionId, UnixTimestamp};

#[derive(Debug, Clone, FromRow)]
struct SessionKeyRow {
    id: String,
    user_id: String,
    session_id: String,
    session_key_address: String,
    encrypted_private_key: String,
    scopes: String,
    on_chain_params: String,
    approved_contracts: String,
    valid_after: i64,
    valid_until: i64,
    is_active: bool,
    revoked_at: Option<i64>,
    oauth_client_id: Option<String>,
    created_at: i64,
}

/// A fully materialized session key row.
#[derive(Debug, Clone)]
pub struct SessionKeyRecord {
    pub id: String,
    pub user_id: String,
    pub session_id: SessionId,
    pub session_key_address: EvmAddress,
    pub encrypted_private_key: HybridEncrypted,
    pub scopes: Vec<SessionScope>,
    pub on_chain_params: OnChainParams,
    pub approved_contracts: Vec<ApprovedContract>,
    pub valid_after: u64,
    pub valid_until: u64,
    pub is_active: bool,
    pub revoked_at: Option<i64>,
    pub oauth_client_id: Option<String>,
    pub created_at: i64,
}

/// The shape returned over HTTP: everything except the encrypted key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKeySummary {
    pub id: String,
    pub session_id: SessionId,
    pub session_key_address: EvmAddress,
    pub scopes: Vec<SessionScope>,
    pub on_chain_params: OnChainParams,
    pub approved_contracts: Vec<ApprovedContract>,
    pub valid_after: u64,
    pub valid_until: u64,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth_client_id: Option<String>,
    pub created_at: i64,
}

impl SessionKeyRecord {
    fn from_row(row: SessionKeyRow) -> Result<Self, GatewayError> {
        let parse = |what: &str, raw: &str| -> Result<serde_json::Value, GatewayError> {
            serde_json::from_str(raw).map_err(|_| {
                GatewayError::Internal(format!("stored session key has malformed {what}"))
            })
        };
        Ok(SessionKeyRecord {
            session_id: row
                .session_id
                .parse()
                .map_err(|_| GatewayError::Internal("stored session id is malformed".into()))?,
            session_key_address: row
                .session_key_address
                .parse()
                .map_err(|_| GatewayError::Internal("stored key address is malformed".into()))?,
            encrypted_private_key: serde_json::from_value(parse(
                "encrypted key",
                &row.encrypted_private_key,
            )?)
            .map_err(|_| GatewayError::Internal("stored encrypted key is malformed".into()))?,
            scopes: serde_json::from_value(parse("scopes", &row.scopes)?)
                .map_err(|_| GatewayError::Internal("stored scopes are malformed".into()))?,
            on_chain_params: serde_json::from_value(parse(
                "on-chain params",
                &row.on_chain_params,
            )?)
            .map_err(|_| GatewayError::Internal("stored on-chain params are malformed".into()))?,
            approved_contracts: serde_json::from_value(parse(
                "approved contracts",
                &row.approved_contracts,
            )?)
            .map_err(|_| {
                GatewayError::Internal("stored approved contracts are malformed".into())
            })?,
            valid_after: row.valid_after.max(0) as u64,
            valid_until: row.valid_until.max(0) as u64,
            id: row.id,
            user_id: row.user_id,
            is_active: row.is_active,
            revoked_at: row.revoked_at,
            oauth_client_id: row.oauth_client_id,
            created_at: row.created_at,
        })
    }

    pub fn summary(&self) -> SessionKeySummary {
        SessionKeySummary {
            id: self.id.clone(),
            session_id: self.session_id,
            session_key_address: self.session_key_address,
            scopes: self.scopes.clone(),
            on_chain_params: self.on_chain_params.clone(),
            approved_contracts: self.approved_contracts.clone(),
            valid_after: self.valid_after,
            valid_until: self.valid_until,
            is_active: self.is_active,
            revoked_at: self.revoked_at,
            oauth_client_id: self.oauth_client_id.clone(),
            created_at: self.created_at,
        }
    }

    /// The view the signing service consumes.
    pub fn signing_context(&self, owner_wallet: EvmAddress) -> SessionSigningContext {
        SessionSigningContext {
            session_id: self.session_id,
            session_key_address: self.session_key_address,
            owner_wallet,
            encrypted_private_key: self.encrypted_private_key.clone(),
            scopes: self.scopes.clone(),
            legacy_approved_contracts: self.approved_contracts.clone(),
            valid_after: UnixTimestamp(self.valid_after),
            valid_until: UnixTimestamp(self.valid_until),
            is_active: self.is_active,
        }
    }
}

/// Input for `create_session_key`, already canonicalized to the new shape.
#[derive(Debug, Clone)]
pub struct NewSessionKey {
    pub user_id: String,
    pub session_id: SessionId,
    pub session_key_address: EvmAddress,
    pub encrypted_private_key: HybridEncrypted,
    pub scopes: Vec<SessionScope>,
    pub on_chain_params: OnChainParams,
    pub approved_contracts: Vec<ApprovedContract>,
    pub valid_after: u64,
    pub valid_until: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    AlreadyRevoked,
    NotFound,
}

const SELECT_COLUMNS: &str = "id, user_id, session_id, session_key_address, \
    encrypted_private_key, scopes, on_chain_params, approved_contracts, \
    valid_after, valid_until, is_active, revoked_at, oauth_client_id, created_at";

impl Db {
    /// Persist a new delegated key. Fails with `Conflict` when the session
    /// id is already registered.
    pub async fn create_session_key(
        &self,
        new: NewSessionKey,
    ) -> Result<SessionKeyRecord, GatewayError> {
        if new.valid_after >= new.valid_until {
            return Err(GatewayError::Validation(
                "validAfter must be earlier than validUntil".to_string(),
            ));
        }
        if new.scopes.is_empty() {
            return Err(GatewayError::Validation(
                "at least one scope is required".to_string(),
            ));
        }

        let encrypted = serde_json::to_string(&new.encrypted_private_key)
            .map_err(GatewayError::internal)?;
        let scopes = serde_json::to_string(&new.scopes).map_err(GatewayError::internal)?;
        let on_chain =
            serde_json::to_string(&new.on_chain_params).map_err(GatewayError::internal)?;
        let approved =
            serde_json::to_string(&new.approved_contracts).map_err(GatewayError::internal)?;

        let result = sqlx::query_as::<_, SessionKeyRow>(&format!(
            "INSERT INTO session_keys (id, user_id, session_id, session_key_address, \
             encrypted_private_key, scopes, on_chain_params, approved_contracts, \
             valid_after, valid_until, is_active, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, TRUE, $11)
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(new_id())
        .bind(&new.user_id)
        .bind(new.session_id.as_lower())
        .bind(new.session_key_address.as_lower())
        .bind(&encrypted)
        .bind(&scopes)
        .bind(&on_chain)
        .bind(&approved)
        .bind(new.valid_after as i64)
        .bind(new.valid_until as i64)
        .bind(now_unix())
        .fetch_one(self.pool())
        .await;

        match result {
            Ok(row) => SessionKeyRecord::from_row(row),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                GatewayError::Conflict(format!("session {} already exists", new.session_id)),
            ),
            Err(other) => Err(other.into()),
        }
    }

    /// Active, unexpired sessions for a user, newest first.
    pub async fn list_active_session_keys(
        &self,
        user_id: &str,
    ) -> Result<Vec<SessionKeyRecord>, GatewayError> {
        let rows = sqlx::query_as::<_, SessionKeyRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM session_keys
             WHERE user_id = $1 AND is_active = TRUE AND valid_until > $2
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .bind(now_unix())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(SessionKeyRecord::from_row).collect()
    }

    pub async fn get_session_key(
        &self,
        user_id: &str,
        session_id: &SessionId,
    ) -> Result<Option<SessionKeyRecord>, GatewayError> {
        let row = sqlx::query_as::<_, SessionKeyRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM session_keys
             WHERE user_id = $1 AND session_id = $2"
        ))
        .bind(user_id)
        .bind(session_id.as_lower())
        .fetch_optional(self.pool())
        .await?;
        row.map(SessionKeyRecord::from_row).transpose()
    }

    /// Lookup by primary key, used when resolving a bearer token's linked
    /// session.
    pub async fn get_session_key_by_pk(
        &self,
        id: &str,
    ) -> Result<Option<SessionKeyRecord>, GatewayError> {
        let row = sqlx::query_as::<_, SessionKeyRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM session_keys WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        row.map(SessionKeyRecord::from_row).transpose()
    }

    /// Deactivate a session. Idempotent: revoking an already-revoked session
    /// reports `AlreadyRevoked`.
    pub async fn revoke_session_key(
        &self,
        user_id: &str,
        session_id: &SessionId,
    ) -> Result<RevokeOutcome, GatewayError> {
        let updated = sqlx::query(
            "UPDATE session_keys SET is_active = FALSE, revoked_at = $3
             WHERE user_id = $1 AND session_id = $2 AND is_active = TRUE",
        )
        .bind(user_id)
        .bind(session_id.as_lower())
        .bind(now_unix())
        .execute(self.pool())
        .await?;
        if updated.rows_affected() > 0 {
            return Ok(RevokeOutcome::Revoked);
        }
        let exists: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM session_keys WHERE user_id = $1 AND session_id = $2",
        )
        .bind(user_id)
        .bind(session_id.as_lower())
        .fetch_optional(self.pool())
        .await?;
        Ok(if exists.is_some() {
            RevokeOutcome::AlreadyRevoked
        } else {
            RevokeOutcome::NotFound
        })
    }

    /// Record the OAuth client a session was approved for.
    pub async fn bind_session_to_client(
        &self,
        session_id: &SessionId,
        client_id: &str,
    ) -> Result<(), GatewayError> {
        sqlx::query("UPDATE session_keys SET oauth_client_id = $2 WHERE session_id = $1")
            .bind(session_id.as_lower())
            .bind(client_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
