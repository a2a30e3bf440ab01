//! Gateway-wide error kinds and their HTTP mapping.
//!
//! Deep layers return these kinds through `Result`; only the HTTP boundary
//! turns them into responses. Cryptographic failures are deliberately
//! collapsed into `Unauthorized` or `Internal` so that tag-check or
//! unpadding details never reach a client.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// The error kinds the gateway surfaces over HTTP.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed input: failed regex, missing required field, enum violation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid bearer token or user capability.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Missing bearer on an MCP path. Carries the slug-aware discovery
    /// pointers required by RFC 9470.
    #[error("unauthorized: {message}")]
    UnauthorizedMcp {
        message: String,
        resource_metadata: String,
        authorization_url: String,
    },

    /// Valid principal, disallowed operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate session id, duplicate slug, or similar.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Signing was requested for a contract outside the session's scopes.
    #[error("contract not approved: {contract}")]
    ContractNotApproved {
        contract: String,
        approved_contracts: Vec<String>,
        available_scopes: Vec<String>,
    },

    /// The decrypted session key does not match the stored address. An
    /// invariant violation, logged with high severity and never detailed to
    /// the caller.
    #[error("session key mismatch")]
    SessionKeyMismatch,

    #[error("request deadline exceeded")]
    Timeout,

    #[error("request canceled")]
    Canceled,

    /// Anything unexpected. The message is logged, never echoed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn internal<E: std::fmt::Display>(error: E) -> Self {
        GatewayError::Internal(error.to_string())
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => GatewayError::NotFound("record not found".to_string()),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "validation_error", "message": message })),
            )
                .into_response(),
            GatewayError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "unauthorized", "message": message })),
            )
                .into_response(),
            GatewayError::UnauthorizedMcp {
                message,
                resource_metadata,
                authorization_url,
            } => {
                let www = format!("Bearer resource_metadata=\"{resource_metadata}\"");
                let body = Json(json!({
                    "error": "unauthorized",
                    "message": message,
                    "authorization_url": authorization_url,
                }));
                let mut response =
                    (StatusCode::UNAUTHORIZED, body).into_response();
                if let Ok(value) = HeaderValue::from_str(&www) {
                    response
                        .headers_mut()
                        .insert(header::WWW_AUTHENTICATE, value);
                }
                response
            }
            GatewayError::Forbidden(message) => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "forbidden", "message": message })),
            )
                .into_response(),
            GatewayError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "not_found", "message": message })),
            )
                .into_response(),
            GatewayError::Conflict(message) => (
                StatusCode::CONFLICT,
                Json(json!({ "error": "conflict", "message": message })),
            )
                .into_response(),
            GatewayError::ContractNotApproved {
                contract,
                approved_contracts,
                available_scopes,
            } => (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "error": "contract_not_approved",
                    "message": format!("Contract {contract} is not approved for this session"),
                    "approvedContracts": approved_contracts,
                    "availableScopes": available_scopes,
                })),
            )
                .into_response(),
            GatewayError::SessionKeyMismatch => {
                tracing::error!("session key mismatch: decrypted key does not match stored address");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal_error", "message": "Internal server error" })),
                )
                    .into_response()
            }
            GatewayError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({ "error": "timeout", "message": "Request deadline exceeded" })),
            )
                .into_response(),
            GatewayError::Canceled => (
                StatusCode::REQUEST_TIMEOUT,
                Json(json!({ "error": "canceled", "message": "Request canceled" })),
            )
                .into_response(),
            GatewayError::Internal(message) => {
                tracing::error!(error = %message, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal_error", "message": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_mcp_carries_resource_metadata_header() {
        let error = GatewayError::UnauthorizedMcp {
            message: "Missing bearer token".to_string(),
            resource_metadata: "https://mcp.example/mcp/demo/.well-known/oauth-protected-resource"
                .to_string(),
            authorization_url: "https://app.example/oauth/demo/authorize".to_string(),
        };
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let www = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(www.starts_with("Bearer resource_metadata="));
    }

    #[test]
    fn internal_error_does_not_echo_details() {
        let response = GatewayError::Internal("secret detail".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
