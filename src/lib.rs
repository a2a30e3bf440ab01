//! Agent-access gateway: a pay-per-call API and workflow runtime brokering
//! access between MCP clients and pay-gated HTTP APIs or on-chain
//! workflows, authorized through user-delegated session keys.
//!
//! # Overview
//!
//! Autonomous agents authenticate with OAuth 2.1 access tokens that carry
//! more than API access: each token is bound to a **session key**, a
//! short-lived keypair the user delegated on-chain (EIP-7702) with typed,
//! time-bounded scopes. Tool invocations either proxy pay-gated HTTP calls
//! (x402: `402` → signed EIP-3009 authorization → retry) or run multi-step
//! workflows that interleave HTTP with relayed on-chain executions.
//!
//! # Modules
//!
//! - [`auth`] — the opaque authenticated-user capability (HMAC cookie).
//! - [`config`] — environment-driven configuration.
//! - [`crypto`] — hybrid RSA-OAEP + AES-256-GCM encryption of stored secrets.
//! - [`error`] — error kinds and their HTTP mapping.
//! - [`gateway`] — the HTTP route surface.
//! - [`known`] — network name ↔ chain id registry.
//! - [`mcp`] — streamable-HTTP MCP sessions and tool dispatch.
//! - [`nonce`] — single-use TTL-bounded tokens (login, payment replay).
//! - [`oauth`] — discovery, registration, authorization, token, bearer.
//! - [`proxy`] — pay-gated outbound HTTP with `X-PAYMENT` retries.
//! - [`registry`] — slug → tool-surface cache with change notifications.
//! - [`scope`] — typed session scopes and on-chain flattening.
//! - [`sessions`] — session-key registry and signing HTTP surface.
//! - [`sign`] — EIP-712 builder, 149-byte envelope, signing service.
//! - [`store`] — SQL persistence.
//! - [`workflow`] — the step interpreter with JSONPath-style binding.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod known;
pub mod mcp;
pub mod nonce;
pub mod oauth;
pub mod proxy;
pub mod registry;
pub mod scope;
pub mod sessions;
pub mod sig_down;
pub mod sign;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod workflow;
