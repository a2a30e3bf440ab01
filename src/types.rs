//! Core wire types shared across the gateway.
//!
//! These are the validated newtypes that appear on every protocol surface:
//! EVM addresses and selectors, delegated session ids, EIP-3009 authorization
//! fields, and the x402 payment payload carried in the `X-PAYMENT` header.
//!
//! Hex-encoded values are validated on deserialization and always written
//! back lowercased, matching what the persistence layer stores.

use alloy_primitives::U256;
use alloy_sol_types::sol;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use std::time::{SystemTime, SystemTimeError};

/// Matches a 20-byte EVM address, `0x` + 40 hex chars, any case.
pub static ADDRESS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("invalid address regex"));

/// Matches a 32-byte value, `0x` + 64 hex chars, any case.
pub static BYTES32_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("invalid bytes32 regex"));

/// Matches a 4-byte function selector, `0x` + 8 hex chars.
pub static SELECTOR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{8}$").expect("invalid selector regex"));

/// Wrapper around `alloy_primitives::Address` that serializes lowercased.
///
/// The on-disk and on-wire representation is always `0x` + 40 lowercase hex
/// characters; deserialization accepts any case.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvmAddress(pub alloy_primitives::Address);

impl EvmAddress {
    pub fn as_lower(&self) -> String {
        format!("0x{}", hex::encode(self.0.as_slice()))
    }
}

impl Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_lower())
    }
}

impl From<alloy_primitives::Address> for EvmAddress {
    fn from(address: alloy_primitives::Address) -> Self {
        EvmAddress(address)
    }
}

impl From<EvmAddress> for alloy_primitives::Address {
    fn from(address: EvmAddress) -> Self {
        address.0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid EVM address: {0}")]
pub struct EvmAddressError(String);

impl FromStr for EvmAddress {
    type Err = EvmAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !ADDRESS_REGEX.is_match(s) {
            return Err(EvmAddressError(s.to_string()));
        }
        alloy_primitives::Address::from_str(s)
            .map(EvmAddress)
            .map_err(|_| EvmAddressError(s.to_string()))
    }
}

impl Serialize for EvmAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_lower())
    }
}

impl<'de> Deserialize<'de> for EvmAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(Error::custom)
    }
}

/// A delegated session identifier: 32 random bytes, `0x` + 64 hex chars.
///
/// Generated when the user signs `grantSession`, globally unique across the
/// session-key registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub [u8; 32]);

impl SessionId {
    pub fn as_lower(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_lower())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid session id: {0}")]
pub struct SessionIdError(String);

impl FromStr for SessionId {
    type Err = SessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !BYTES32_REGEX.is_match(s) {
            return Err(SessionIdError(s.to_string()));
        }
        let bytes = hex::decode(&s[2..]).map_err(|_| SessionIdError(s.to_string()))?;
        let array: [u8; 32] = bytes.try_into().map_err(|_| SessionIdError(s.to_string()))?;
        Ok(SessionId(array))
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_lower())
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(Error::custom)
    }
}

/// A 4-byte function selector, `0x` + 8 hex chars.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Selector(pub [u8; 4]);

impl Selector {
    pub fn as_lower(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_lower())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid selector: {0}")]
pub struct SelectorError(String);

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !SELECTOR_REGEX.is_match(s) {
            return Err(SelectorError(s.to_string()));
        }
        let bytes = hex::decode(&s[2..]).map_err(|_| SelectorError(s.to_string()))?;
        let array: [u8; 4] = bytes.try_into().map_err(|_| SelectorError(s.to_string()))?;
        Ok(Selector(array))
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_lower())
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(Error::custom)
    }
}

/// A 32-byte anti-replay nonce, hex-encoded with 0x prefix.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HexEncodedNonce(pub [u8; 32]);

impl HexEncodedNonce {
    pub fn random() -> Self {
        use rand::Rng;
        HexEncodedNonce(rand::rng().random())
    }
}

impl Display for HexEncodedNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid nonce: {0}")]
pub struct HexEncodedNonceError(String);

impl FromStr for HexEncodedNonce {
    type Err = HexEncodedNonceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !BYTES32_REGEX.is_match(s) {
            return Err(HexEncodedNonceError(s.to_string()));
        }
        let bytes = hex::decode(&s[2..]).map_err(|_| HexEncodedNonceError(s.to_string()))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| HexEncodedNonceError(s.to_string()))?;
        Ok(HexEncodedNonce(array))
    }
}

impl Serialize for HexEncodedNonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for HexEncodedNonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if !BYTES32_REGEX.is_match(&s) {
            return Err(Error::custom("Invalid nonce format"));
        }
        let bytes = hex::decode(&s[2..]).map_err(|_| Error::custom("Invalid hex in nonce"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::custom("Invalid length for nonce"))?;
        Ok(HexEncodedNonce(array))
    }
}

/// A 65-byte ECDSA signature, serialized as 0x-prefixed hex with 130 chars.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EvmSignature(pub [u8; 65]);

impl Display for EvmSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for EvmSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for EvmSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        static SIG_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^0x[0-9a-fA-F]{130}$").expect("invalid regex for EVM signature")
        });
        if !SIG_REGEX.is_match(&s) {
            return Err(Error::custom(
                "Invalid EVM signature format: must be 0x-prefixed and 130 hex chars",
            ));
        }
        let bytes = hex::decode(&s[2..])
            .map_err(|_| Error::custom("Failed to decode EVM signature hex string"))?;
        let array: [u8; 65] = bytes
            .try_into()
            .map_err(|_| Error::custom("Signature must be exactly 65 bytes"))?;
        Ok(EvmSignature(array))
    }
}

/// A Unix timestamp in seconds, serialized as a stringified integer to avoid
/// loss of precision in JSON. Used for the `validAfter`/`validBefore` window
/// of ERC-3009 authorizations and for session validity bounds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq)]
pub struct UnixTimestamp(pub u64);

impl UnixTimestamp {
    pub fn try_now() -> Result<Self, SystemTimeError> {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_secs();
        Ok(Self(now))
    }

    pub fn seconds_since_epoch(&self) -> u64 {
        self.0
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Accepts both a stringified integer and a bare JSON number.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Str(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(UnixTimestamp(n)),
            Raw::Str(s) => s
                .parse::<u64>()
                .map(UnixTimestamp)
                .map_err(|_| Error::custom("timestamp must be a non-negative integer")),
        }
    }
}

impl From<UnixTimestamp> for U256 {
    fn from(value: UnixTimestamp) -> Self {
        U256::from(value.0)
    }
}

impl std::ops::Add<u64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        UnixTimestamp(self.0 + rhs)
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A token amount in the smallest unit, parsed from a decimal string to
/// prevent accidental precision loss in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TokenAmount(pub U256);

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_str_radix(&s, 10)
            .map(TokenAmount)
            .map_err(|_| Error::custom("amount must be a non-negative decimal integer"))
    }
}

/// x402 protocol version. Only version 1 is in use.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum X402Version {
    V1,
}

impl Serialize for X402Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(1)
    }
}

impl<'de> Deserialize<'de> for X402Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let num = u8::deserialize(deserializer)?;
        match num {
            1 => Ok(X402Version::V1),
            other => Err(Error::custom(format!("Unsupported x402Version: {other}"))),
        }
    }
}

/// x402 payment scheme. Only "exact" is supported: the transferred amount
/// must match the quoted amount exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Exact => write!(f, "exact"),
        }
    }
}

/// Payment requirements read from a pay-gated upstream's `402` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    /// Network name, e.g. "cronos" or "cronos-testnet".
    pub network: String,
    pub pay_to: EvmAddress,
    pub asset: EvmAddress,
    pub max_amount_required: TokenAmount,
    pub max_timeout_seconds: u64,
}

/// The `402` response body shape. Upstreams either nest a single
/// `paymentRequirements` object or advertise an x402 `accepts` list; the
/// first entry wins in the latter case.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredBody {
    #[serde(default)]
    pub payment_requirements: Option<PaymentRequirements>,
    #[serde(default)]
    pub accepts: Option<Vec<PaymentRequirements>>,
}

impl PaymentRequiredBody {
    pub fn into_requirements(self) -> Option<PaymentRequirements> {
        self.payment_requirements.or_else(|| {
            self.accepts.and_then(|mut a| {
                if a.is_empty() {
                    None
                } else {
                    Some(a.remove(0))
                }
            })
        })
    }
}

/// The signed authorization carried in the `X-PAYMENT` header payload.
///
/// `signature` is the hex encoding of the 149-byte session-signature
/// envelope, which lets the delegator contract reconstruct the EIP-712
/// preimage on-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactPaymentPayload {
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: HexEncodedNonce,
    pub asset: EvmAddress,
    pub signature: String,
}

/// The canonical JSON object base64-encoded into the `X-PAYMENT` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: String,
    pub payload: ExactPaymentPayload,
}

sol!(
    /// ERC-3009 `transferWithAuthorization` message, as hashed into the
    /// EIP-712 struct hash that the session key countersigns.
    #[derive(Serialize, Deserialize)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parses_and_lowercases() {
        let addr: EvmAddress = "0xF39FD6E51AAD88F6F4CE6AB8827279CFFFB92266"
            .parse()
            .unwrap();
        assert_eq!(
            addr.as_lower(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert!("0x1234".parse::<EvmAddress>().is_err());
        assert!(
            "f39fd6e51aad88f6f4ce6ab8827279cfffb92266"
                .parse::<EvmAddress>()
                .is_err()
        );
    }

    #[test]
    fn session_id_round_trips() {
        let raw = format!("0x{}", "ab".repeat(32));
        let id: SessionId = raw.parse().unwrap();
        assert_eq!(id.as_lower(), raw);
        assert!("0xabcd".parse::<SessionId>().is_err());
    }

    #[test]
    fn selector_round_trips() {
        let sel: Selector = "0xa9059cbb".parse().unwrap();
        assert_eq!(sel.as_lower(), "0xa9059cbb");
        assert!("0xa9059c".parse::<Selector>().is_err());
    }

    #[test]
    fn token_amount_is_decimal_string_on_the_wire() {
        let amount: TokenAmount = serde_json::from_str("\"1000000\"").unwrap();
        assert_eq!(amount, TokenAmount::from(1_000_000u64));
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"1000000\"");
        assert!(serde_json::from_str::<TokenAmount>("\"1.5\"").is_err());
    }

    #[test]
    fn timestamp_accepts_string_and_number() {
        let a: UnixTimestamp = serde_json::from_str("\"1700000000\"").unwrap();
        let b: UnixTimestamp = serde_json::from_str("1700000000").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"1700000000\"");
    }

    #[test]
    fn payment_required_body_prefers_explicit_requirements() {
        let body: PaymentRequiredBody = serde_json::from_value(serde_json::json!({
            "paymentRequirements": {
                "scheme": "exact",
                "network": "cronos",
                "payTo": "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266",
                "asset": "0xc21223249ca28397b4b6541dffaecc539bff0c59",
                "maxAmountRequired": "1000000",
                "maxTimeoutSeconds": 300
            }
        }))
        .unwrap();
        let requirements = body.into_requirements().unwrap();
        assert_eq!(requirements.network, "cronos");
        assert_eq!(
            requirements.max_amount_required,
            TokenAmount::from(1_000_000u64)
        );
    }

    #[test]
    fn payment_required_body_falls_back_to_accepts() {
        let body: PaymentRequiredBody = serde_json::from_value(serde_json::json!({
            "accepts": [{
                "scheme": "exact",
                "network": "cronos-testnet",
                "payTo": "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266",
                "asset": "0xc21223249ca28397b4b6541dffaecc539bff0c59",
                "maxAmountRequired": "42",
                "maxTimeoutSeconds": 60
            }]
        }))
        .unwrap();
        assert_eq!(body.into_requirements().unwrap().network, "cronos-testnet");
    }
}
