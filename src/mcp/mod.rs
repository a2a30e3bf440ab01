//! The MCP session runtime: streamable-HTTP transport, per-session tool
//! surfaces, and tool dispatch.

pub mod protocol;
pub mod session;
pub mod tools;

pub use session::{McpSession, McpSessionManager};
