//! The 149-byte session-signature envelope.
//!
//! Layout: `sessionId(32) ‖ verifyingContract(20) ‖ structHash(32) ‖
//! ecdsa(65)`. The delegator contract parses this to reconstruct the
//! EIP-712 preimage and recover the session key, so builder and parser must
//! be exact inverses.

use alloy_primitives::B256;

use crate::types::{EvmAddress, EvmSignature, SessionId};

/// Exact byte length of a packed session signature.
pub const ENVELOPE_LEN: usize = 32 + 20 + 32 + 65;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("session signature must be {ENVELOPE_LEN} bytes, got {0}")]
    WrongLength(usize),
    #[error("session signature hex is malformed")]
    BadHex,
}

/// A parsed (or to-be-packed) session signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSignatureEnvelope {
    pub session_id: SessionId,
    pub verifying_contract: EvmAddress,
    pub struct_hash: B256,
    pub signature: EvmSignature,
}

impl SessionSignatureEnvelope {
    /// Pack into the canonical 149-byte layout.
    pub fn pack(&self) -> [u8; ENVELOPE_LEN] {
        let mut out = [0u8; ENVELOPE_LEN];
        out[..32].copy_from_slice(&self.session_id.0);
        out[32..52].copy_from_slice(self.verifying_contract.0.as_slice());
        out[52..84].copy_from_slice(self.struct_hash.as_slice());
        out[84..].copy_from_slice(&self.signature.0);
        out
    }

    /// Hex encoding with 0x prefix: 298 hex chars.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.pack()))
    }

    /// Parse the canonical layout. Length mismatches are kind-distinct from
    /// hex failures.
    pub fn parse(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        if bytes.len() != ENVELOPE_LEN {
            return Err(EnvelopeError::WrongLength(bytes.len()));
        }
        let mut session_id = [0u8; 32];
        session_id.copy_from_slice(&bytes[..32]);
        let verifying_contract =
            alloy_primitives::Address::from_slice(&bytes[32..52]);
        let struct_hash = B256::from_slice(&bytes[52..84]);
        let mut signature = [0u8; 65];
        signature.copy_from_slice(&bytes[84..]);
        Ok(Self {
            session_id: SessionId(session_id),
            verifying_contract: EvmAddress(verifying_contract),
            struct_hash,
            signature: EvmSignature(signature),
        })
    }

    pub fn from_hex(s: &str) -> Result<Self, EnvelopeError> {
        let stripped = s.strip_prefix("0x").ok_or(EnvelopeError::BadHex)?;
        let bytes = hex::decode(stripped).map_err(|_| EnvelopeError::BadHex)?;
        Self::parse(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionSignatureEnvelope {
        SessionSignatureEnvelope {
            session_id: SessionId([0xab; 32]),
            verifying_contract: EvmAddress(alloy_primitives::Address::repeat_byte(0xcd)),
            struct_hash: B256::repeat_byte(0xef),
            signature: EvmSignature([0x11; 65]),
        }
    }

    #[test]
    fn pack_parse_round_trip() {
        let envelope = sample();
        let packed = envelope.pack();
        assert_eq!(packed.len(), 149);
        assert_eq!(SessionSignatureEnvelope::parse(&packed).unwrap(), envelope);
    }

    #[test]
    fn hex_round_trip_is_298_chars_plus_prefix() {
        let envelope = sample();
        let hex = envelope.to_hex();
        assert_eq!(hex.len(), 2 + 298);
        assert_eq!(SessionSignatureEnvelope::from_hex(&hex).unwrap(), envelope);
    }

    #[test]
    fn wrong_length_is_kind_distinct() {
        assert_eq!(
            SessionSignatureEnvelope::parse(&[0u8; 148]),
            Err(EnvelopeError::WrongLength(148))
        );
        assert_eq!(
            SessionSignatureEnvelope::parse(&[0u8; 150]),
            Err(EnvelopeError::WrongLength(150))
        );
        assert_eq!(
            SessionSignatureEnvelope::from_hex("0xzz"),
            Err(EnvelopeError::BadHex)
        );
        assert_eq!(
            SessionSignatureEnvelope::from_hex("abcd"),
            Err(EnvelopeError::BadHex)
        );
    }

    #[test]
    fn fields_land_at_documented_offsets() {
        let packed = sample().pack();
        assert!(packed[..32].iter().all(|b| *b == 0xab));
        assert!(packed[32..52].iter().all(|b| *b == 0xcd));
        assert!(packed[52..84].iter().all(|b| *b == 0xef));
        assert!(packed[84..].iter().all(|b| *b == 0x11));
    }
}
