//! The authenticated-user capability.
//!
//! Wallet connection and SIWE live outside this service; what arrives here
//! is an HMAC-sealed session cookie binding a wallet address to an expiry.
//! This module verifies the seal and maps the wallet to a user row. It
//! never interprets anything else about the login flow.

use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as b64url;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::GatewayError;
use crate::types::EvmAddress;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "session";

/// Seal `wallet|expiry` under the session secret. The dapp issues these;
/// the gateway only needs it for tests and local tooling.
pub fn issue_user_cookie(secret: &str, wallet: &EvmAddress, expires_at: u64) -> String {
    let payload = format!("{}|{}", wallet.as_lower(), expires_at);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(payload.as_bytes());
    let tag = mac.finalize().into_bytes();
    format!("{}.{}", b64url.encode(payload.as_bytes()), hex::encode(tag))
}

/// Verify a sealed cookie value and return the wallet it binds.
pub fn verify_user_cookie(secret: &str, value: &str) -> Result<EvmAddress, GatewayError> {
    let unauthorized = || GatewayError::Unauthorized("Invalid or expired session".to_string());

    let (payload_b64, tag_hex) = value.split_once('.').ok_or_else(unauthorized)?;
    let payload = b64url.decode(payload_b64).map_err(|_| unauthorized())?;
    let expected_tag = hex::decode(tag_hex).map_err(|_| unauthorized())?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(&payload);
    mac.verify_slice(&expected_tag).map_err(|_| unauthorized())?;

    let payload = String::from_utf8(payload).map_err(|_| unauthorized())?;
    let (wallet, expiry) = payload.split_once('|').ok_or_else(unauthorized)?;
    let expiry: u64 = expiry.parse().map_err(|_| unauthorized())?;
    let now = crate::types::UnixTimestamp::try_now()
        .map_err(|_| GatewayError::Internal("system clock unavailable".to_string()))?;
    if expiry <= now.0 {
        return Err(unauthorized());
    }
    wallet.parse().map_err(|_| unauthorized())
}

/// Extract the wallet from the request's session cookie.
pub fn wallet_from_headers(secret: &str, headers: &HeaderMap) -> Result<EvmAddress, GatewayError> {
    let cookies = headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GatewayError::Unauthorized("Missing session cookie".to_string()))?;
    for pair in cookies.split(';') {
        let pair = pair.trim();
        if let Some(value) = pair.strip_prefix(&format!("{SESSION_COOKIE}=")) {
            return verify_user_cookie(secret, value);
        }
    }
    Err(GatewayError::Unauthorized(
        "Missing session cookie".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UnixTimestamp;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn wallet() -> EvmAddress {
        "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".parse().unwrap()
    }

    #[test]
    fn round_trips_a_valid_cookie() {
        let expiry = UnixTimestamp::try_now().unwrap().0 + 3600;
        let cookie = issue_user_cookie(SECRET, &wallet(), expiry);
        assert_eq!(verify_user_cookie(SECRET, &cookie).unwrap(), wallet());
    }

    #[test]
    fn rejects_expired_and_tampered_cookies() {
        let now = UnixTimestamp::try_now().unwrap().0;
        let expired = issue_user_cookie(SECRET, &wallet(), now.saturating_sub(10));
        assert!(verify_user_cookie(SECRET, &expired).is_err());

        let valid = issue_user_cookie(SECRET, &wallet(), now + 3600);
        let mut tampered = valid.clone();
        tampered.pop();
        tampered.push('0');
        assert!(verify_user_cookie(SECRET, &tampered).is_err());

        assert!(verify_user_cookie("another-secret-another-secret!!", &valid).is_err());
    }

    #[test]
    fn extracts_from_cookie_header() {
        let expiry = UnixTimestamp::try_now().unwrap().0 + 3600;
        let cookie = issue_user_cookie(SECRET, &wallet(), expiry);
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            format!("other=1; session={cookie}").parse().unwrap(),
        );
        assert_eq!(wallet_from_headers(SECRET, &headers).unwrap(), wallet());

        let empty = HeaderMap::new();
        assert!(wallet_from_headers(SECRET, &empty).is_err());
    }
}
