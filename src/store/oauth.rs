//! OAuth persistence: dynamic clients, authorization codes, access tokens.
//!
//! Code redemption runs in one transaction holding a row lock, so the
//! single-use guarantee is linearizable: for any code, at most one `/token`
//! exchange succeeds. Token lookups read the token and its session in one
//! statement so revocation and expiry are observed on the same snapshot.

use sqlx::FromRow;

use super::session_keys::SessionKeyRecord;
use super::{Db, new_id, now_unix};
use crate::error::GatewayError;
use crate::scope::SessionScope;
use crate::types::SessionId;

#[derive(Debug, Clone, FromRow)]
pub struct OAuthClientRow {
    pub id: String,
    pub secret_hash: String,
    pub name: String,
    pub description: Option<String>,
    pub logo_url: Option<String>,
    pub redirect_uris: String,
    pub allowed_scopes: String,
    pub is_active: bool,
    pub mcp_slug: Option<String>,
}

/// A registered OAuth client.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub id: String,
    pub secret_hash: String,
    pub name: String,
    pub description: Option<String>,
    pub logo_url: Option<String>,
    pub redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub is_active: bool,
    pub mcp_slug: Option<String>,
}

impl OAuthClient {
    fn from_row(row: OAuthClientRow) -> Result<Self, GatewayError> {
        Ok(OAuthClient {
            redirect_uris: serde_json::from_str(&row.redirect_uris)
                .map_err(|_| GatewayError::Internal("stored redirect uris malformed".into()))?,
            allowed_scopes: serde_json::from_str(&row.allowed_scopes)
                .map_err(|_| GatewayError::Internal("stored scopes malformed".into()))?,
            id: row.id,
            secret_hash: row.secret_hash,
            name: row.name,
            description: row.description,
            logo_url: row.logo_url,
            is_active: row.is_active,
            mcp_slug: row.mcp_slug,
        })
    }
}

/// Lowercase and sort the redirect set; equality of this string is the
/// registration dedup key.
pub fn normalize_redirect_uris(uris: &[String]) -> String {
    let mut normalized: Vec<String> = uris.iter().map(|u| u.to_lowercase()).collect();
    normalized.sort();
    normalized.dedup();
    normalized.join("\n")
}

/// Session parameters snapshotted into an authorization code.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub valid_after: u64,
    pub valid_until: u64,
    pub scopes: Vec<SessionScope>,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_slug: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAuthCode {
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub requested_scopes: Vec<String>,
    pub approved_scopes: Vec<String>,
    pub session_config: SessionConfig,
    pub code_challenge: String,
    pub redirect_uri: String,
    pub expires_at: i64,
}

/// Why a code redemption failed. Every kind maps to its own
/// `invalid_grant` description at the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemError {
    CodeNotFound,
    CodeUsed,
    CodeExpired,
    CodeClientMismatch,
    RedirectMismatch,
    PkceMismatch,
    SessionMissing,
    SessionInactive,
}

/// A successful redemption: the persisted access token plus everything the
/// token response echoes.
#[derive(Debug, Clone)]
pub struct RedeemedToken {
    pub user_id: String,
    pub wallet_address: String,
    pub session_id: SessionId,
    pub session_key_id: String,
    pub scopes: Vec<String>,
    pub mcp_slug: Option<String>,
    pub expires_at: i64,
}

/// A bearer token resolved to its principal and live session.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    pub user_id: String,
    pub wallet_address: String,
    pub client_id: String,
    pub session: SessionKeyRecord,
    pub scopes: Vec<String>,
    pub mcp_slug: Option<String>,
}

#[derive(Debug, FromRow)]
struct AuthCodeRow {
    client_id: String,
    user_id: String,
    approved_scopes: String,
    session_config: String,
    code_challenge: String,
    redirect_uri: String,
    expires_at: i64,
    used_at: Option<i64>,
}

impl Db {
    pub async fn get_oauth_client(
        &self,
        client_id: &str,
    ) -> Result<Option<OAuthClient>, GatewayError> {
        let row = sqlx::query_as::<_, OAuthClientRow>(
            "SELECT id, secret_hash, name, description, logo_url, redirect_uris, \
             allowed_scopes, is_active, mcp_slug FROM oauth_clients WHERE id = $1",
        )
        .bind(client_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(OAuthClient::from_row).transpose()
    }

    /// Find a client by its normalized redirect set (the dedup key).
    pub async fn find_client_by_redirect_set(
        &self,
        normalized: &str,
    ) -> Result<Option<OAuthClient>, GatewayError> {
        let row = sqlx::query_as::<_, OAuthClientRow>(
            "SELECT id, secret_hash, name, description, logo_url, redirect_uris, \
             allowed_scopes, is_active, mcp_slug FROM oauth_clients \
             WHERE normalized_redirect_uris = $1",
        )
        .bind(normalized)
        .fetch_optional(self.pool())
        .await?;
        row.map(OAuthClient::from_row).transpose()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_oauth_client(
        &self,
        id: &str,
        secret_hash: &str,
        name: &str,
        description: Option<&str>,
        logo_url: Option<&str>,
        redirect_uris: &[String],
        allowed_scopes: &[String],
        mcp_slug: Option<&str>,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO oauth_clients (id, secret_hash, name, description, logo_url, \
             redirect_uris, normalized_redirect_uris, allowed_scopes, is_active, mcp_slug, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, $9, $10)",
        )
        .bind(id)
        .bind(secret_hash)
        .bind(name)
        .bind(description)
        .bind(logo_url)
        .bind(serde_json::to_string(redirect_uris).map_err(GatewayError::internal)?)
        .bind(normalize_redirect_uris(redirect_uris))
        .bind(serde_json::to_string(allowed_scopes).map_err(GatewayError::internal)?)
        .bind(mcp_slug)
        .bind(now_unix())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Rotate a deduplicated client's secret and refresh its metadata.
    pub async fn rotate_oauth_client(
        &self,
        client_id: &str,
        secret_hash: &str,
        name: &str,
        mcp_slug: Option<&str>,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            "UPDATE oauth_clients SET secret_hash = $2, name = $3, \
             mcp_slug = COALESCE($4, mcp_slug), is_active = TRUE WHERE id = $1",
        )
        .bind(client_id)
        .bind(secret_hash)
        .bind(name)
        .bind(mcp_slug)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Upsert the first-party platform client at startup.
    pub async fn seed_platform_client(
        &self,
        client_id: &str,
        secret_hash: &str,
        app_url: &str,
        allowed_scopes: &[String],
    ) -> Result<(), GatewayError> {
        let redirect = vec![format!("{app_url}/oauth/callback")];
        sqlx::query(
            "INSERT INTO oauth_clients (id, secret_hash, name, description, logo_url, \
             redirect_uris, normalized_redirect_uris, allowed_scopes, is_active, mcp_slug, created_at)
             VALUES ($1, $2, $3, $4, NULL, $5, $6, $7, TRUE, NULL, $8)
             ON CONFLICT (id) DO UPDATE SET secret_hash = EXCLUDED.secret_hash, \
             allowed_scopes = EXCLUDED.allowed_scopes, is_active = TRUE",
        )
        .bind(client_id)
        .bind(secret_hash)
        .bind("Platform")
        .bind("First-party platform client")
        .bind(serde_json::to_string(&redirect).map_err(GatewayError::internal)?)
        .bind(format!("platform:{client_id}"))
        .bind(serde_json::to_string(allowed_scopes).map_err(GatewayError::internal)?)
        .bind(now_unix())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Insert an authorization code and bind its session to the client, in
    /// one transaction.
    pub async fn insert_auth_code(&self, new: NewAuthCode) -> Result<(), GatewayError> {
        let mut tx = self.pool().begin().await.map_err(GatewayError::from)?;
        sqlx::query(
            "INSERT INTO oauth_codes (code, client_id, user_id, requested_scopes, \
             approved_scopes, session_config, code_challenge, code_challenge_method, \
             redirect_uri, expires_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'S256', $8, $9, $10)",
        )
        .bind(&new.code)
        .bind(&new.client_id)
        .bind(&new.user_id)
        .bind(serde_json::to_string(&new.requested_scopes).map_err(GatewayError::internal)?)
        .bind(serde_json::to_string(&new.approved_scopes).map_err(GatewayError::internal)?)
        .bind(serde_json::to_string(&new.session_config).map_err(GatewayError::internal)?)
        .bind(&new.code_challenge)
        .bind(&new.redirect_uri)
        .bind(new.expires_at)
        .bind(now_unix())
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE session_keys SET oauth_client_id = $2 WHERE session_id = $1")
            .bind(new.session_config.session_id.as_lower())
            .bind(&new.client_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await.map_err(GatewayError::from)?;
        Ok(())
    }

    /// Redeem an authorization code for an access token.
    ///
    /// The code row is locked for the duration: validation, `used_at`, and
    /// the token insert commit together or not at all.
    pub async fn redeem_auth_code(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        computed_challenge: &str,
        token_hash: &str,
    ) -> Result<Result<RedeemedToken, RedeemError>, GatewayError> {
        let mut tx = self.pool().begin().await.map_err(GatewayError::from)?;
        let now = now_unix();

        let row = sqlx::query_as::<_, AuthCodeRow>(
            "SELECT client_id, user_id, approved_scopes, session_config, code_challenge, \
             redirect_uri, expires_at, used_at FROM oauth_codes WHERE code = $1 FOR UPDATE",
        )
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(Err(RedeemError::CodeNotFound));
        };
        if row.used_at.is_some() {
            return Ok(Err(RedeemError::CodeUsed));
        }
        if row.expires_at <= now {
            return Ok(Err(RedeemError::CodeExpired));
        }
        if row.client_id != client_id {
            return Ok(Err(RedeemError::CodeClientMismatch));
        }
        if row.redirect_uri != redirect_uri {
            return Ok(Err(RedeemError::RedirectMismatch));
        }
        if row.code_challenge != computed_challenge {
            return Ok(Err(RedeemError::PkceMismatch));
        }

        let session_config: SessionConfig = serde_json::from_str(&row.session_config)
            .map_err(|_| GatewayError::Internal("stored session config malformed".into()))?;
        let approved_scopes: Vec<String> = serde_json::from_str(&row.approved_scopes)
            .map_err(|_| GatewayError::Internal("stored approved scopes malformed".into()))?;

        let session: Option<(String, i64, bool, String, String)> = sqlx::query_as(
            "SELECT sk.id, sk.valid_until, sk.is_active, sk.user_id, u.wallet_address
             FROM session_keys sk JOIN users u ON u.id = sk.user_id
             WHERE sk.session_id = $1",
        )
        .bind(session_config.session_id.as_lower())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((session_key_id, valid_until, is_active, session_user, wallet_address)) = session
        else {
            return Ok(Err(RedeemError::SessionMissing));
        };
        if session_user != row.user_id {
            return Ok(Err(RedeemError::SessionMissing));
        }
        if !is_active {
            return Ok(Err(RedeemError::SessionInactive));
        }

        sqlx::query("UPDATE oauth_codes SET used_at = $2 WHERE code = $1")
            .bind(code)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO oauth_tokens (token_hash, client_id, user_id, session_key_id, \
             scopes, mcp_slug, expires_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(token_hash)
        .bind(client_id)
        .bind(&row.user_id)
        .bind(&session_key_id)
        .bind(serde_json::to_string(&approved_scopes).map_err(GatewayError::internal)?)
        .bind(&session_config.mcp_slug)
        .bind(valid_until)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(GatewayError::from)?;

        Ok(Ok(RedeemedToken {
            user_id: row.user_id,
            wallet_address,
            session_id: session_config.session_id,
            session_key_id,
            scopes: approved_scopes,
            mcp_slug: session_config.mcp_slug,
            expires_at: valid_until,
        }))
    }

    /// Resolve a bearer token hash to its principal. Returns `None` for
    /// unknown, revoked, or expired tokens and for inactive sessions.
    pub async fn validate_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<ValidatedToken>, GatewayError> {
        #[derive(FromRow)]
        struct TokenRow {
            client_id: String,
            user_id: String,
            session_key_id: String,
            scopes: String,
            mcp_slug: Option<String>,
            wallet_address: String,
        }

        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT t.client_id, t.user_id, t.session_key_id, t.scopes, t.mcp_slug, \
             u.wallet_address
             FROM oauth_tokens t JOIN users u ON u.id = t.user_id
             WHERE t.token_hash = $1 AND t.revoked_at IS NULL AND t.expires_at > $2",
        )
        .bind(token_hash)
        .bind(now_unix())
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Some(session) = self.get_session_key_by_pk(&row.session_key_id).await? else {
            return Ok(None);
        };
        if !session.is_active {
            return Ok(None);
        }
        let scopes: Vec<String> = serde_json::from_str(&row.scopes)
            .map_err(|_| GatewayError::Internal("stored token scopes malformed".into()))?;
        Ok(Some(ValidatedToken {
            user_id: row.user_id,
            wallet_address: row.wallet_address,
            client_id: row.client_id,
            session,
            scopes,
            mcp_slug: row.mcp_slug,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_normalization_lowercases_sorts_and_dedupes() {
        let a = normalize_redirect_uris(&[
            "https://B.example/cb".to_string(),
            "https://a.example/CB".to_string(),
        ]);
        let b = normalize_redirect_uris(&[
            "https://a.example/cb".to_string(),
            "https://b.example/cb".to_string(),
            "https://B.EXAMPLE/cb".to_string(),
        ]);
        assert_eq!(a, b);
        assert_eq!(a, "https://a.example/cb\nhttps://b.example/cb");
    }

    #[test]
    fn session_config_round_trips() {
        let config = SessionConfig {
            valid_after: 1,
            valid_until: 2,
            scopes: vec![],
            session_id: format!("0x{}", "11".repeat(32)).parse().unwrap(),
            mcp_slug: Some("demo".to_string()),
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, config.session_id);
        assert_eq!(back.mcp_slug.as_deref(), Some("demo"));
    }
}
