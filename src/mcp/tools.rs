//! MCP tool dispatch.
//!
//! A tool call resolves to either a single pay-gated proxy request or a
//! full workflow run. Execution failures come back as tool results with
//! `isError` set; only malformed requests or broken invariants surface as
//! JSON-RPC errors.

use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::instrument;

use super::protocol::tool_result;
use super::session::McpSession;
use crate::proxy::{ProxyCallError, apply_template};
use crate::registry::{ProxyTool, ToolConfig, WorkflowTool};
use crate::sign::SessionSigningContext;
use crate::state::SharedState;
use crate::types::EvmAddress;
use crate::workflow::WorkflowRunContext;
use crate::workflow::model::validate_arguments;

/// Upper bound for one live workflow run behind a tool call.
const WORKFLOW_DEADLINE: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub enum ToolCallError {
    UnknownTool(String),
    BadParams(String),
    Internal(String),
}

fn signing_context(session: &McpSession) -> Result<SessionSigningContext, ToolCallError> {
    let wallet: EvmAddress = session
        .principal
        .wallet_address
        .parse()
        .map_err(|_| ToolCallError::Internal("stored wallet address is malformed".to_string()))?;
    Ok(session.principal.session.signing_context(wallet))
}

#[instrument(skip_all)]
pub async fn handle_tool_call(
    state: &SharedState,
    session: &McpSession,
    config: &ToolConfig,
    params: Option<&Value>,
) -> Result<Value, ToolCallError> {
    let params = params.ok_or_else(|| ToolCallError::BadParams("params are required".into()))?;
    let name = params
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolCallError::BadParams("params.name is required".into()))?;
    let arguments = params
        .get("arguments")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    if let Some(tool) = config.proxy_tools.iter().find(|t| t.name == name) {
        return invoke_proxy_tool(state, session, tool, arguments).await;
    }
    if let Some(tool) = config.workflow_tools.iter().find(|t| t.name == name) {
        return invoke_workflow_tool(state, session, tool, arguments).await;
    }
    Err(ToolCallError::UnknownTool(name.to_string()))
}

async fn invoke_proxy_tool(
    state: &SharedState,
    session: &McpSession,
    tool: &ProxyTool,
    arguments: Map<String, Value>,
) -> Result<Value, ToolCallError> {
    let arguments = match validate_arguments(tool.variables(), &arguments) {
        Ok(arguments) => arguments,
        Err(message) => return Ok(tool_result(message, true)),
    };

    let signing = signing_context(session)?;
    let proxy = &tool.proxy;

    let body = match &proxy.request_body_template {
        Some(template) => Some(apply_template(template, &arguments)),
        None if proxy.http_method.eq_ignore_ascii_case("get") => None,
        None if arguments.is_empty() => None,
        None => Some(Value::Object(arguments.clone())),
    };
    let query = proxy
        .query_params_template
        .as_ref()
        .map(|template| apply_template(template, &arguments))
        .and_then(|v| v.as_object().cloned());

    let outcome = state
        .paygate
        .call_proxy(
            proxy,
            &signing,
            body,
            query.as_ref(),
            None,
            &session.cancel,
        )
        .await;

    match outcome {
        Ok(result) => {
            state
                .db
                .log_request(
                    Some(&session.principal.user_id),
                    Some(&proxy.id),
                    Some(&session.slug),
                    result.status,
                    result.paid.as_ref(),
                )
                .await;
            let text = serde_json::to_string_pretty(&result.body)
                .unwrap_or_else(|_| result.body.to_string());
            Ok(tool_result(text, false))
        }
        Err(ProxyCallError::Upstream { status, body }) => {
            state
                .db
                .log_request(
                    Some(&session.principal.user_id),
                    Some(&proxy.id),
                    Some(&session.slug),
                    status,
                    None,
                )
                .await;
            Ok(tool_result(
                format!("Upstream request failed with status {status}: {body}"),
                true,
            ))
        }
        Err(ProxyCallError::Sign(sign)) => Ok(tool_result(
            format!("Payment authorization failed: {sign}"),
            true,
        )),
        Err(ProxyCallError::Timeout) => Ok(tool_result("Upstream request timed out".into(), true)),
        Err(ProxyCallError::Canceled) => {
            Ok(tool_result("Request canceled".into(), true))
        }
        Err(other) => Err(ToolCallError::Internal(other.to_string())),
    }
}

async fn invoke_workflow_tool(
    state: &SharedState,
    session: &McpSession,
    tool: &WorkflowTool,
    arguments: Map<String, Value>,
) -> Result<Value, ToolCallError> {
    let arguments = match validate_arguments(tool.variables(), &arguments) {
        Ok(arguments) => arguments,
        Err(message) => return Ok(tool_result(message, true)),
    };

    let signing = signing_context(session)?;
    let run = WorkflowRunContext {
        wallet: signing.owner_wallet,
        chain_id: state.config.chain_id,
        session: Some(signing),
        cancel: session.cancel.child_token(),
        deadline: Some(tokio::time::Instant::now() + WORKFLOW_DEADLINE),
        dry_run: false,
    };

    let outcome = state
        .engine
        .run(&tool.workflow.workflow_definition, arguments, &run)
        .await;

    let is_error = !outcome.success;
    let text = serde_json::to_string_pretty(&json!(outcome))
        .unwrap_or_else(|_| "workflow produced unserializable output".to_string());
    Ok(tool_result(text, is_error))
}
