//! JSON-RPC 2.0 message shapes for the MCP streamable-HTTP transport.
//!
//! Only the server side of the 2025-06-18 revision is implemented: session
//! handshake, tool listing and invocation, ping, and the tools
//! `list_changed` notification.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// The protocol revision this server speaks.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Transport headers.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// An incoming JSON-RPC message. Requests carry an id; notifications do
/// not.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcMessage {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcMessage {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A successful JSON-RPC response.
pub fn response(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// A JSON-RPC error response.
pub fn error_response(id: Option<&Value>, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

/// The `initialize` result advertising the tool capability.
pub fn initialize_result(server_name: &str, instructions: Option<&str>) -> Value {
    let mut result = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": { "listChanged": true } },
        "serverInfo": {
            "name": server_name,
            "version": env!("CARGO_PKG_VERSION"),
        },
    });
    if let Some(instructions) = instructions {
        result["instructions"] = json!(instructions);
    }
    result
}

/// One entry of a `tools/list` result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

pub fn tools_list_result(tools: Vec<ToolDescriptor>) -> Value {
    json!({ "tools": tools })
}

/// A `tools/call` result: text content plus the error flag.
pub fn tool_result(text: String, is_error: bool) -> Value {
    let mut result = json!({
        "content": [ { "type": "text", "text": text } ],
    });
    if is_error {
        result["isError"] = json!(true);
    }
    result
}

/// The notification pushed when a slug's tool surface is refreshed.
pub fn tools_list_changed_notification() -> Value {
    json!({ "jsonrpc": "2.0", "method": "notifications/tools/list_changed" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_requests_and_notifications() {
        let request: JsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/list"
        }))
        .unwrap();
        assert!(!request.is_notification());

        let notification: JsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0", "method": "notifications/initialized"
        }))
        .unwrap();
        assert!(notification.is_notification());
    }

    #[test]
    fn initialize_result_advertises_list_changed() {
        let result = initialize_result("demo", None);
        assert_eq!(result["protocolVersion"], json!(PROTOCOL_VERSION));
        assert_eq!(result["capabilities"]["tools"]["listChanged"], json!(true));
        assert!(result.get("instructions").is_none());
    }

    #[test]
    fn tool_results_flag_errors() {
        let ok = tool_result("fine".to_string(), false);
        assert!(ok.get("isError").is_none());
        assert_eq!(ok["content"][0]["type"], json!("text"));

        let failed = tool_result("boom".to_string(), true);
        assert_eq!(failed["isError"], json!(true));
    }
}
