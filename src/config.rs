//! Configuration for the gateway server.
//!
//! All settings come from environment variables (or equivalent CLI flags),
//! loaded after `.env` processing. Missing required values fail startup with
//! a distinct error; the process exits 1 before binding any socket.

use clap::Parser;
use std::net::IpAddr;

/// CLI/environment arguments for the gateway server.
#[derive(Parser, Debug, Clone)]
#[command(name = "x402-mcp-gateway")]
#[command(about = "Agent-access gateway HTTP server")]
struct CliArgs {
    /// SQL store connection string.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Redis connection string for the nonce store.
    #[arg(long, env = "REDIS_URL")]
    redis_url: String,

    /// Issuer origin for OAuth metadata (the dapp's public URL).
    #[arg(long, env = "NEXT_APP_URL")]
    app_url: String,

    /// Public origin of this gateway, used as the protected-resource base.
    #[arg(long, env = "MCP_PUBLIC_URL")]
    mcp_public_url: String,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 3001)]
    port: u16,

    /// EIP-155 chain id the delegator contracts live on.
    #[arg(long, env = "CHAIN_ID")]
    chain_id: u64,

    /// PKCS#8 PEM private key for hybrid decryption of stored secrets.
    #[arg(long, env = "SERVER_PRIVATE_KEY", hide_env_values = true)]
    server_private_key: String,

    /// SPKI PEM public key matching `SERVER_PRIVATE_KEY`.
    #[arg(long, env = "SERVER_PUBLIC_KEY", hide_env_values = true)]
    server_public_key: String,

    /// OAuth client id of the first-party platform client.
    #[arg(long, env = "MCP_CLIENT_ID", default_value = "x402-mcp-platform")]
    mcp_client_id: String,

    #[arg(long, env = "MCP_CLIENT_SECRET", hide_env_values = true)]
    mcp_client_secret: String,

    /// HMAC key for the authenticated-user cookie capability.
    #[arg(long, env = "SESSION_SECRET", hide_env_values = true)]
    session_secret: String,

    /// Relayer endpoint for on-chain workflow executions. Defaults to the
    /// dapp's relayer route.
    #[arg(long, env = "RELAYER_URL")]
    relayer_url: Option<String>,
}

/// Validated server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    /// Issuer origin, no trailing slash.
    pub app_url: String,
    /// Protected-resource origin, no trailing slash.
    pub mcp_public_url: String,
    pub host: IpAddr,
    pub port: u16,
    pub chain_id: u64,
    pub server_private_key_pem: String,
    pub server_public_key_pem: String,
    pub mcp_client_id: String,
    pub mcp_client_secret: String,
    pub session_secret: String,
    pub relayer_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid url in {0}: {1}")]
    InvalidUrl(&'static str, url::ParseError),
    #[error("SESSION_SECRET must be at least 32 bytes")]
    SessionSecretTooShort,
    #[error("CHAIN_ID must be non-zero")]
    ZeroChainId,
}

fn normalized_origin(name: &'static str, raw: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(name, e))?;
    let mut s = parsed.to_string();
    while s.ends_with('/') {
        s.pop();
    }
    Ok(s)
}

impl Config {
    /// Parse and validate configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let args = CliArgs::parse();
        Self::from_args(args)
    }

    fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if args.session_secret.len() < 32 {
            return Err(ConfigError::SessionSecretTooShort);
        }
        if args.chain_id == 0 {
            return Err(ConfigError::ZeroChainId);
        }
        let app_url = normalized_origin("NEXT_APP_URL", &args.app_url)?;
        let mcp_public_url = normalized_origin("MCP_PUBLIC_URL", &args.mcp_public_url)?;
        let relayer_url = match args.relayer_url {
            Some(raw) => normalized_origin("RELAYER_URL", &raw)?,
            None => format!("{app_url}/api/relayer/execute"),
        };
        Ok(Config {
            database_url: args.database_url,
            redis_url: args.redis_url,
            app_url,
            mcp_public_url,
            host: args.host,
            port: args.port,
            chain_id: args.chain_id,
            server_private_key_pem: args.server_private_key,
            server_public_key_pem: args.server_public_key,
            mcp_client_id: args.mcp_client_id,
            mcp_client_secret: args.mcp_client_secret,
            session_secret: args.session_secret,
            relayer_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> CliArgs {
        CliArgs {
            database_url: "postgres://localhost/gateway".to_string(),
            redis_url: "redis://localhost".to_string(),
            app_url: "https://app.example/".to_string(),
            mcp_public_url: "https://mcp.example".to_string(),
            host: "0.0.0.0".parse().unwrap(),
            port: 3001,
            chain_id: 25,
            server_private_key: "pem".to_string(),
            server_public_key: "pem".to_string(),
            mcp_client_id: "x402-mcp-platform".to_string(),
            mcp_client_secret: "secret".to_string(),
            session_secret: "0123456789abcdef0123456789abcdef".to_string(),
            relayer_url: None,
        }
    }

    #[test]
    fn origins_lose_trailing_slash_and_relayer_defaults() {
        let config = Config::from_args(args()).unwrap();
        assert_eq!(config.app_url, "https://app.example");
        assert_eq!(config.relayer_url, "https://app.example/api/relayer/execute");
    }

    #[test]
    fn short_session_secret_is_fatal() {
        let mut bad = args();
        bad.session_secret = "short".to_string();
        assert!(matches!(
            Config::from_args(bad),
            Err(ConfigError::SessionSecretTooShort)
        ));
    }
}
