//! SQL persistence.
//!
//! One `PgPool` is shared across the process. The schema is bootstrapped at
//! startup with idempotent DDL; every address and id column is lowercased on
//! write. JSON-valued columns hold canonical JSON text and are parsed into
//! typed structs at the edge of this module.

pub mod catalog;
pub mod oauth;
pub mod session_keys;
pub mod users;

pub use catalog::{ApiProxy, McpServerRecord, ProxyToolBinding, WorkflowTemplate, WorkflowToolBinding};
pub use oauth::{OAuthClient, RedeemError, RedeemedToken, SessionConfig, ValidatedToken};
pub use session_keys::{RevokeOutcome, SessionKeyRecord};
pub use users::User;

use sqlx::postgres::{PgPool, PgPoolOptions};

#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests use a lazy pool that never connects).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create missing tables. Safe to run on every startup.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

static SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        wallet_address TEXT NOT NULL UNIQUE,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS session_keys (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id),
        session_id TEXT NOT NULL UNIQUE,
        session_key_address TEXT NOT NULL,
        encrypted_private_key TEXT NOT NULL,
        scopes TEXT NOT NULL,
        on_chain_params TEXT NOT NULL,
        approved_contracts TEXT NOT NULL,
        valid_after BIGINT NOT NULL,
        valid_until BIGINT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        revoked_at BIGINT,
        oauth_client_id TEXT,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS oauth_clients (
        id TEXT PRIMARY KEY,
        secret_hash TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        logo_url TEXT,
        redirect_uris TEXT NOT NULL,
        normalized_redirect_uris TEXT NOT NULL UNIQUE,
        allowed_scopes TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        mcp_slug TEXT,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS oauth_codes (
        code TEXT PRIMARY KEY,
        client_id TEXT NOT NULL REFERENCES oauth_clients(id),
        user_id TEXT NOT NULL REFERENCES users(id),
        requested_scopes TEXT NOT NULL,
        approved_scopes TEXT NOT NULL,
        session_config TEXT NOT NULL,
        code_challenge TEXT NOT NULL,
        code_challenge_method TEXT NOT NULL DEFAULT 'S256',
        redirect_uri TEXT NOT NULL,
        expires_at BIGINT NOT NULL,
        used_at BIGINT,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS oauth_tokens (
        token_hash TEXT PRIMARY KEY,
        client_id TEXT NOT NULL REFERENCES oauth_clients(id),
        user_id TEXT NOT NULL REFERENCES users(id),
        session_key_id TEXT NOT NULL REFERENCES session_keys(id),
        scopes TEXT NOT NULL,
        mcp_slug TEXT,
        expires_at BIGINT NOT NULL,
        revoked_at BIGINT,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS api_proxies (
        id TEXT PRIMARY KEY,
        slug TEXT,
        owner_user_id TEXT NOT NULL REFERENCES users(id),
        name TEXT NOT NULL,
        target_url TEXT NOT NULL,
        http_method TEXT NOT NULL,
        encrypted_headers TEXT,
        price_per_request TEXT NOT NULL,
        payment_address TEXT NOT NULL,
        variables_schema TEXT NOT NULL DEFAULT '[]',
        request_body_template TEXT,
        query_params_template TEXT,
        content_type TEXT NOT NULL DEFAULT 'application/json',
        is_public BOOLEAN NOT NULL DEFAULT FALSE,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS workflow_templates (
        id TEXT PRIMARY KEY,
        slug TEXT NOT NULL,
        user_id TEXT NOT NULL REFERENCES users(id),
        name TEXT NOT NULL,
        description TEXT,
        input_schema TEXT NOT NULL DEFAULT '[]',
        workflow_definition TEXT NOT NULL,
        is_public BOOLEAN NOT NULL DEFAULT FALSE,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS mcp_servers (
        id TEXT PRIMARY KEY,
        slug TEXT NOT NULL UNIQUE,
        user_id TEXT NOT NULL REFERENCES users(id),
        name TEXT NOT NULL,
        description TEXT,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS mcp_server_tools (
        id TEXT PRIMARY KEY,
        server_id TEXT NOT NULL REFERENCES mcp_servers(id),
        proxy_id TEXT NOT NULL REFERENCES api_proxies(id),
        tool_name TEXT,
        tool_description TEXT,
        display_order BIGINT NOT NULL DEFAULT 0,
        enabled BOOLEAN NOT NULL DEFAULT TRUE
    )",
    "CREATE TABLE IF NOT EXISTS mcp_server_workflows (
        id TEXT PRIMARY KEY,
        server_id TEXT NOT NULL REFERENCES mcp_servers(id),
        workflow_id TEXT NOT NULL REFERENCES workflow_templates(id),
        tool_name TEXT,
        tool_description TEXT,
        display_order BIGINT NOT NULL DEFAULT 0,
        enabled BOOLEAN NOT NULL DEFAULT TRUE
    )",
    "CREATE TABLE IF NOT EXISTS request_logs (
        id TEXT PRIMARY KEY,
        user_id TEXT,
        proxy_id TEXT,
        slug TEXT,
        status BIGINT NOT NULL,
        price_charged TEXT,
        created_at BIGINT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_session_keys_user ON session_keys(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_oauth_tokens_session ON oauth_tokens(session_key_id)",
    "CREATE INDEX IF NOT EXISTS idx_mcp_server_tools_server ON mcp_server_tools(server_id)",
    "CREATE INDEX IF NOT EXISTS idx_mcp_server_workflows_server ON mcp_server_workflows(server_id)",
];
