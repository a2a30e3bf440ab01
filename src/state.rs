//! Process-wide state shared by all request handlers.
//!
//! Everything here is initialized once at startup; a failure during init is
//! fatal. Handlers receive `SharedState` through axum's `State` extractor.

use std::sync::Arc;

use crate::config::Config;
use crate::crypto::ServerKeyring;
use crate::mcp::McpSessionManager;
use crate::nonce::NonceStore;
use crate::proxy::PayGate;
use crate::registry::ToolRegistry;
use crate::sign::SigningService;
use crate::store::Db;
use crate::workflow::WorkflowEngine;

pub struct AppState {
    pub config: Config,
    pub db: Db,
    pub keyring: Arc<ServerKeyring>,
    pub signing: SigningService,
    pub paygate: PayGate,
    pub engine: WorkflowEngine,
    pub registry: Arc<ToolRegistry>,
    pub nonces: Arc<dyn NonceStore>,
    pub mcp_sessions: Arc<McpSessionManager>,
}

pub type SharedState = Arc<AppState>;
