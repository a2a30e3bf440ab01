//! Bearer validation and slug binding for protected MCP routes.

use axum::http::HeaderMap;

use super::token_hash;
use crate::error::GatewayError;
use crate::state::SharedState;
use crate::store::ValidatedToken;

/// Pull the raw bearer token from the `Authorization` header.
pub fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// The 401 payload for an MCP path, carrying the slug-aware discovery
/// pointers mandated by RFC 9470.
pub fn unauthorized_for_slug(state: &SharedState, slug: &str, message: &str) -> GatewayError {
    GatewayError::UnauthorizedMcp {
        message: message.to_string(),
        resource_metadata: format!(
            "{}/mcp/{}/.well-known/oauth-protected-resource",
            state.config.mcp_public_url, slug
        ),
        authorization_url: format!("{}/oauth/authorize?mcp_slug={}", state.config.app_url, slug),
    }
}

/// Validate the bearer on an MCP route and enforce its slug binding.
pub async fn validate_bearer_for_slug(
    state: &SharedState,
    headers: &HeaderMap,
    slug: &str,
) -> Result<ValidatedToken, GatewayError> {
    let Some(raw) = bearer_from_headers(headers) else {
        return Err(unauthorized_for_slug(state, slug, "Missing bearer token"));
    };
    let validated = state
        .db
        .validate_token_hash(&token_hash(&raw))
        .await?
        .ok_or_else(|| unauthorized_for_slug(state, slug, "Invalid or expired access token"))?;

    if let Some(bound_slug) = &validated.mcp_slug {
        if bound_slug != slug {
            return Err(GatewayError::Forbidden(format!(
                "Token is scoped to slug \"{bound_slug}\", not \"{slug}\""
            )));
        }
    }
    Ok(validated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer abc123".parse().unwrap(),
        );
        assert_eq!(bearer_from_headers(&headers).as_deref(), Some("abc123"));

        headers.insert(axum::http::header::AUTHORIZATION, "Basic xyz".parse().unwrap());
        assert!(bearer_from_headers(&headers).is_none());

        headers.insert(axum::http::header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert!(bearer_from_headers(&headers).is_none());
    }
}
