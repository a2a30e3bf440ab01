//! Gateway HTTP entrypoint.
//!
//! Startup order matters: configuration and the RSA keyring are validated
//! first (a failure exits 1 before any socket is bound), then the SQL pool,
//! schema, Redis nonce store, and the shared services. SIGTERM/SIGINT
//! drain MCP sessions and the listener within a 10-second deadline.

use std::net::SocketAddr;
use std::sync::Arc;

use dotenvy::dotenv;

use x402_mcp_gateway::config::Config;
use x402_mcp_gateway::crypto::ServerKeyring;
use x402_mcp_gateway::gateway;
use x402_mcp_gateway::mcp::McpSessionManager;
use x402_mcp_gateway::nonce::{NonceStore, RedisNonceStore};
use x402_mcp_gateway::oauth::SCOPES_SUPPORTED;
use x402_mcp_gateway::proxy::PayGate;
use x402_mcp_gateway::registry::ToolRegistry;
use x402_mcp_gateway::sig_down::SigDown;
use x402_mcp_gateway::sign::SigningService;
use x402_mcp_gateway::state::AppState;
use x402_mcp_gateway::store::Db;
use x402_mcp_gateway::workflow::WorkflowEngine;
use x402_mcp_gateway::telemetry;

#[tokio::main]
async fn main() {
    dotenv().ok();
    telemetry::init();

    if let Err(error) = run().await {
        tracing::error!(error = %error, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let keyring = Arc::new(ServerKeyring::from_pems(
        &config.server_private_key_pem,
        &config.server_public_key_pem,
    )?);

    let db = Db::connect(&config.database_url).await?;
    db.migrate().await?;

    // First-party platform client, so the dapp can complete the code flow
    // without dynamic registration.
    let platform_secret_hash = bcrypt::hash(&config.mcp_client_secret, bcrypt::DEFAULT_COST)?;
    let platform_scopes: Vec<String> = SCOPES_SUPPORTED.iter().map(|s| s.to_string()).collect();
    db.seed_platform_client(
        &config.mcp_client_id,
        &platform_secret_hash,
        &config.app_url,
        &platform_scopes,
    )
    .await
    .map_err(|e| format!("failed to seed platform client: {e}"))?;

    let nonces: Arc<dyn NonceStore> = Arc::new(RedisNonceStore::connect(&config.redis_url).await?);

    let signing = SigningService::new(keyring.clone(), config.chain_id);
    let paygate = PayGate::new(signing.clone(), keyring.clone(), nonces.clone());
    let engine = WorkflowEngine::new(
        db.clone(),
        paygate.clone(),
        signing.clone(),
        config.relayer_url.clone(),
    );
    let registry = ToolRegistry::new(db.clone());
    let mcp_sessions = Arc::new(McpSessionManager::new());

    // A registry refresh re-materializes the slug's tool surface into every
    // live session, then pushes tools/list_changed down their streams.
    {
        let sessions = Arc::downgrade(&mcp_sessions);
        let registry_handle = Arc::downgrade(&registry);
        registry.subscribe(Arc::new(move |slug: &str| {
            let Some(sessions) = sessions.upgrade() else {
                return;
            };
            let Some(registry) = registry_handle.upgrade() else {
                return;
            };
            let slug = slug.to_string();
            tokio::spawn(async move {
                if let Ok(Some(config)) = registry.load_tools_for_slug(&slug).await {
                    for session in sessions.sessions_for_slug(&slug) {
                        session.replace_config(config.clone());
                    }
                }
                sessions.notify_slug(&slug);
            });
        }));
    }

    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        keyring,
        signing,
        paygate,
        engine,
        registry,
        nonces,
        mcp_sessions: mcp_sessions.clone(),
    });

    let app = gateway::routes(state);

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!(%addr, "starting gateway");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let sig_down = SigDown::try_new()?;
    sig_down.arm_deadline();
    let shutdown_token = sig_down.cancellation_token();
    let graceful = async move { shutdown_token.cancelled().await };

    axum::serve(listener, app)
        .with_graceful_shutdown(graceful)
        .await?;

    mcp_sessions.close_all();
    tracing::info!("shutdown complete");
    Ok(())
}
