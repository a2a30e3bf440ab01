//! Per-client MCP sessions over streamable HTTP.
//!
//! A session is created on the first `POST /mcp/:slug` (an `initialize`
//! request without a session-id header), binds to exactly one slug and one
//! bearer principal, and lives in process memory until `DELETE` or
//! transport close. Requests within a session are serialized; across
//! sessions there is no ordering.

use axum::Json;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use futures_util::stream::Stream;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::protocol::{self, JsonRpcMessage, ToolDescriptor};
use super::tools;
use crate::error::GatewayError;
use crate::oauth::bearer;
use crate::registry::ToolConfig;
use crate::state::SharedState;
use crate::store::ValidatedToken;

/// Runtime state of one MCP session.
pub struct McpSession {
    pub id: String,
    pub slug: String,
    /// Auth context snapshot taken at handshake.
    pub principal: ValidatedToken,
    config: RwLock<Arc<ToolConfig>>,
    pub notifications: broadcast::Sender<Value>,
    pub cancel: CancellationToken,
    /// Serializes message processing within the session.
    serial: tokio::sync::Mutex<()>,
}

impl McpSession {
    pub fn config(&self) -> Arc<ToolConfig> {
        self.config.read().expect("config lock").clone()
    }

    pub fn replace_config(&self, config: Arc<ToolConfig>) {
        *self.config.write().expect("config lock") = config;
    }
}

/// Process-wide session map. Insertion and removal are atomic with the
/// transport hand-off: a session id in the map always has a live channel.
pub struct McpSessionManager {
    sessions: DashMap<String, Arc<McpSession>>,
}

impl Default for McpSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl McpSessionManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<McpSession>> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Remove and cancel a session. Idempotent: both `DELETE` and transport
    /// close funnel here.
    pub fn remove(&self, session_id: &str) -> bool {
        if let Some((_, session)) = self.sessions.remove(session_id) {
            session.cancel.cancel();
            tracing::info!(session = %session_id, slug = %session.slug, "mcp session closed");
            true
        } else {
            false
        }
    }

    pub fn insert(&self, session: Arc<McpSession>) {
        self.sessions.insert(session.id.clone(), session);
    }

    /// Push `notifications/tools/list_changed` to every session on a slug.
    pub fn notify_slug(&self, slug: &str) {
        for entry in self.sessions.iter() {
            if entry.slug == slug {
                let _ = entry
                    .notifications
                    .send(protocol::tools_list_changed_notification());
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions_for_slug(&self, slug: &str) -> Vec<Arc<McpSession>> {
        self.sessions
            .iter()
            .filter(|entry| entry.slug == slug)
            .map(|entry| entry.clone())
            .collect()
    }

    /// Cancel and drop every session (graceful shutdown).
    pub fn close_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.id.clone()).collect();
        for id in ids {
            self.remove(&id);
        }
    }
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(protocol::SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
}

fn tool_descriptors(config: &ToolConfig) -> Vec<ToolDescriptor> {
    let mut descriptors = Vec::new();
    for tool in &config.proxy_tools {
        descriptors.push(ToolDescriptor {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema(),
        });
    }
    for tool in &config.workflow_tools {
        descriptors.push(ToolDescriptor {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema(),
        });
    }
    descriptors
}

/// `POST /mcp/:slug` — handshake or message dispatch.
#[instrument(skip_all, fields(slug = %slug))]
pub async fn handle_post(
    state: SharedState,
    slug: String,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let message: JsonRpcMessage = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(_) => {
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(protocol::error_response(
                    None,
                    protocol::PARSE_ERROR,
                    "request body is not a JSON-RPC message",
                )),
            )
                .into_response());
        }
    };

    match session_header(&headers) {
        None => handshake(state, slug, headers, message).await,
        Some(session_id) => dispatch(state, slug, session_id, message).await,
    }
}

async fn handshake(
    state: SharedState,
    slug: String,
    headers: HeaderMap,
    message: JsonRpcMessage,
) -> Result<Response, GatewayError> {
    if message.method != "initialize" {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(protocol::error_response(
                message.id.as_ref(),
                protocol::INVALID_REQUEST,
                "expected initialize request to open a session",
            )),
        )
            .into_response());
    }

    let principal = bearer::validate_bearer_for_slug(&state, &headers, &slug).await?;
    let Some(config) = state.registry.load_tools_for_slug(&slug).await? else {
        return Err(GatewayError::NotFound(format!(
            "no MCP server is registered for slug \"{slug}\""
        )));
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let (notifications, _) = broadcast::channel(32);
    let session = Arc::new(McpSession {
        id: session_id.clone(),
        slug: slug.clone(),
        principal,
        config: RwLock::new(config.clone()),
        notifications,
        cancel: CancellationToken::new(),
        serial: tokio::sync::Mutex::new(()),
    });
    state.mcp_sessions.insert(session.clone());
    tracing::info!(session = %session_id, slug = %slug, "mcp session opened");

    let result =
        protocol::initialize_result(&config.server.name, config.server.description.as_deref());
    let id = message.id.unwrap_or(Value::Null);
    let mut response = Json(protocol::response(&id, result)).into_response();
    if let Ok(value) = header::HeaderValue::from_str(&session_id) {
        response
            .headers_mut()
            .insert(protocol::SESSION_ID_HEADER, value);
    }
    Ok(response)
}

async fn dispatch(
    state: SharedState,
    slug: String,
    session_id: String,
    message: JsonRpcMessage,
) -> Result<Response, GatewayError> {
    let Some(session) = state.mcp_sessions.get(&session_id) else {
        return Err(GatewayError::NotFound("unknown mcp session".to_string()));
    };
    if session.slug != slug {
        return Err(GatewayError::Forbidden(format!(
            "session belongs to slug \"{}\", not \"{slug}\"",
            session.slug
        )));
    }

    // Requests within a session are processed in arrival order.
    let _serial = session.serial.lock().await;

    if message.is_notification() {
        // notifications/initialized and friends are accepted and otherwise
        // ignored.
        return Ok(StatusCode::ACCEPTED.into_response());
    }
    let id = message.id.clone().unwrap_or(Value::Null);

    let config = session.config();
    let payload = match message.method.as_str() {
        "initialize" => protocol::response(
            &id,
            protocol::initialize_result(
                &config.server.name,
                config.server.description.as_deref(),
            ),
        ),
        "ping" => protocol::response(&id, serde_json::json!({})),
        "tools/list" => {
            protocol::response(&id, protocol::tools_list_result(tool_descriptors(&config)))
        }
        "tools/call" => {
            let outcome =
                tools::handle_tool_call(&state, &session, &config, message.params.as_ref()).await;
            match outcome {
                Ok(result) => protocol::response(&id, result),
                Err(tools::ToolCallError::UnknownTool(name)) => protocol::error_response(
                    Some(&id),
                    protocol::INVALID_PARAMS,
                    &format!("unknown tool: {name}"),
                ),
                Err(tools::ToolCallError::BadParams(details)) => {
                    protocol::error_response(Some(&id), protocol::INVALID_PARAMS, &details)
                }
                Err(tools::ToolCallError::Internal(details)) => {
                    tracing::error!(error = %details, "tool call failed");
                    protocol::error_response(
                        Some(&id),
                        protocol::INTERNAL_ERROR,
                        "tool execution failed",
                    )
                }
            }
        }
        _ => protocol::error_response(
            Some(&id),
            protocol::METHOD_NOT_FOUND,
            &format!("method not supported: {}", message.method),
        ),
    };

    Ok(Json(payload).into_response())
}

/// `GET /mcp/:slug` — server-to-client notification stream for an active
/// session.
#[instrument(skip_all, fields(slug = %slug))]
pub async fn handle_get(
    state: SharedState,
    slug: String,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let Some(session_id) = session_header(&headers) else {
        return Err(GatewayError::Validation(
            "mcp-session-id header is required".to_string(),
        ));
    };
    let Some(session) = state.mcp_sessions.get(&session_id) else {
        return Err(GatewayError::NotFound("unknown mcp session".to_string()));
    };
    if session.slug != slug {
        return Err(GatewayError::Forbidden(format!(
            "session belongs to slug \"{}\", not \"{slug}\"",
            session.slug
        )));
    }

    let receiver = session.notifications.subscribe();
    let cancel = session.cancel.clone();
    Ok(Sse::new(notification_stream(receiver, cancel))
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn notification_stream(
    receiver: broadcast::Receiver<Value>,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    futures_util::stream::unfold((receiver, cancel), |(mut receiver, cancel)| async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                received = receiver.recv() => match received {
                    Ok(value) => {
                        let event = Event::default().event("message").data(value.to_string());
                        return Some((Ok(event), (receiver, cancel)));
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    })
}

/// `DELETE /mcp/:slug` — explicit session teardown.
#[instrument(skip_all, fields(slug = %slug))]
pub async fn handle_delete(
    state: SharedState,
    slug: String,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let Some(session_id) = session_header(&headers) else {
        return Err(GatewayError::Validation(
            "mcp-session-id header is required".to_string(),
        ));
    };
    if let Some(session) = state.mcp_sessions.get(&session_id) {
        if session.slug != slug {
            return Err(GatewayError::Forbidden(format!(
                "session belongs to slug \"{}\", not \"{slug}\"",
                session.slug
            )));
        }
    }
    state.mcp_sessions.remove(&session_id);
    Ok(StatusCode::NO_CONTENT.into_response())
}
