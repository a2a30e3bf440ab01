//! The hybrid envelope: AES-256-GCM content encryption, RSA-OAEP(SHA-256)
//! key wrapping.
//!
//! Every field of the envelope is standard base64. The GCM tag is kept
//! separate from the ciphertext on the wire; decryption re-joins them and
//! fails closed when the tag does not authenticate.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

const GCM_TAG_LEN: usize = 16;
const GCM_IV_LEN: usize = 12;

/// An encrypted record: RSA-wrapped AES key, GCM IV, ciphertext, GCM tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HybridEncrypted {
    pub encrypted_key: String,
    pub iv: String,
    pub ciphertext: String,
    pub tag: String,
}

/// Failures of the hybrid envelope. Deliberately coarse: callers map these
/// to `Unauthorized` or `Internal`, and none of them carry key material.
#[derive(Debug, thiserror::Error)]
pub enum HybridCryptoError {
    #[error("hybrid encryption failed")]
    Encrypt,
    #[error("encrypted envelope is malformed")]
    Malformed,
    #[error("failed to unwrap content key")]
    KeyUnwrap,
    #[error("ciphertext failed to authenticate")]
    Open,
    #[error("decrypted payload is not valid JSON")]
    PlaintextParse,
}

pub(super) fn encrypt(
    public: &RsaPublicKey,
    plaintext: &[u8],
) -> Result<HybridEncrypted, HybridCryptoError> {
    let key = Aes256Gcm::generate_key(&mut OsRng);
    let cipher = Aes256Gcm::new(&key);
    let iv = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&iv, plaintext)
        .map_err(|_| HybridCryptoError::Encrypt)?;
    // `encrypt` appends the 16-byte tag to the ciphertext.
    let split_at = sealed
        .len()
        .checked_sub(GCM_TAG_LEN)
        .ok_or(HybridCryptoError::Encrypt)?;
    let (ciphertext, tag) = sealed.split_at(split_at);

    let padding = Oaep::new::<Sha256>();
    let encrypted_key = public
        .encrypt(&mut OsRng, padding, key.as_slice())
        .map_err(|_| HybridCryptoError::Encrypt)?;

    Ok(HybridEncrypted {
        encrypted_key: b64.encode(encrypted_key),
        iv: b64.encode(iv),
        ciphertext: b64.encode(ciphertext),
        tag: b64.encode(tag),
    })
}

pub(super) fn decrypt(
    private: &RsaPrivateKey,
    envelope: &HybridEncrypted,
) -> Result<Vec<u8>, HybridCryptoError> {
    let encrypted_key = b64
        .decode(&envelope.encrypted_key)
        .map_err(|_| HybridCryptoError::Malformed)?;
    let iv = b64
        .decode(&envelope.iv)
        .map_err(|_| HybridCryptoError::Malformed)?;
    let ciphertext = b64
        .decode(&envelope.ciphertext)
        .map_err(|_| HybridCryptoError::Malformed)?;
    let tag = b64
        .decode(&envelope.tag)
        .map_err(|_| HybridCryptoError::Malformed)?;
    if iv.len() != GCM_IV_LEN || tag.len() != GCM_TAG_LEN {
        return Err(HybridCryptoError::Malformed);
    }

    let padding = Oaep::new::<Sha256>();
    let key = private
        .decrypt(padding, &encrypted_key)
        .map_err(|_| HybridCryptoError::KeyUnwrap)?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| HybridCryptoError::KeyUnwrap)?;

    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);
    cipher
        .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
        .map_err(|_| HybridCryptoError::Open)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::test_keyring;
    use super::*;

    fn flip_base64_bit(encoded: &str) -> String {
        let mut bytes = b64.decode(encoded).unwrap();
        bytes[0] ^= 0x01;
        b64.encode(bytes)
    }

    #[test]
    fn bit_flip_in_ciphertext_fails_closed() {
        let keyring = test_keyring();
        let mut envelope = keyring.encrypt(b"payload").unwrap();
        envelope.ciphertext = flip_base64_bit(&envelope.ciphertext);
        assert!(matches!(
            keyring.decrypt(&envelope),
            Err(HybridCryptoError::Open)
        ));
    }

    #[test]
    fn bit_flip_in_tag_fails_closed() {
        let keyring = test_keyring();
        let mut envelope = keyring.encrypt(b"payload").unwrap();
        envelope.tag = flip_base64_bit(&envelope.tag);
        assert!(matches!(
            keyring.decrypt(&envelope),
            Err(HybridCryptoError::Open)
        ));
    }

    #[test]
    fn tampered_wrapped_key_fails_closed() {
        let keyring = test_keyring();
        let mut envelope = keyring.encrypt(b"payload").unwrap();
        envelope.encrypted_key = flip_base64_bit(&envelope.encrypted_key);
        assert!(matches!(
            keyring.decrypt(&envelope),
            Err(HybridCryptoError::KeyUnwrap)
        ));
    }

    #[test]
    fn truncated_iv_is_malformed() {
        let keyring = test_keyring();
        let mut envelope = keyring.encrypt(b"payload").unwrap();
        envelope.iv = b64.encode([0u8; 4]);
        assert!(matches!(
            keyring.decrypt(&envelope),
            Err(HybridCryptoError::Malformed)
        ));
    }
}
