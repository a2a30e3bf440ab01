//! Encryption of secret material at rest.
//!
//! Proxy headers and session private keys are stored under a hybrid
//! envelope: a fresh AES-256-GCM key per record, wrapped with the server's
//! RSA-OAEP(SHA-256) public key. The RSA private key is loaded once at
//! startup and shared read-only; a parse failure is fatal.

mod hybrid;

pub use hybrid::{HybridCryptoError, HybridEncrypted};

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum KeyringError {
    #[error("failed to parse server private key PEM")]
    PrivateKeyParse(#[source] rsa::pkcs8::Error),
    #[error("failed to parse server public key PEM")]
    PublicKeyParse(#[source] rsa::pkcs8::spki::Error),
}

/// The server's RSA keypair, held in process memory for the whole lifetime.
pub struct ServerKeyring {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl std::fmt::Debug for ServerKeyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material must never appear in logs.
        f.debug_struct("ServerKeyring").finish_non_exhaustive()
    }
}

impl ServerKeyring {
    /// Parse the keypair from PKCS#8 (private) and SPKI (public) PEMs.
    pub fn from_pems(private_pem: &str, public_pem: &str) -> Result<Self, KeyringError> {
        let private =
            RsaPrivateKey::from_pkcs8_pem(private_pem).map_err(KeyringError::PrivateKeyParse)?;
        let public =
            RsaPublicKey::from_public_key_pem(public_pem).map_err(KeyringError::PublicKeyParse)?;
        Ok(Self { private, public })
    }

    /// Encrypt a plaintext into a hybrid envelope.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<HybridEncrypted, HybridCryptoError> {
        hybrid::encrypt(&self.public, plaintext)
    }

    /// Decrypt a hybrid envelope. Fails closed on any tampering.
    pub fn decrypt(&self, envelope: &HybridEncrypted) -> Result<Vec<u8>, HybridCryptoError> {
        hybrid::decrypt(&self.private, envelope)
    }

    /// Decrypt and JSON-parse a hybrid envelope.
    pub fn decrypt_json<T: DeserializeOwned>(
        &self,
        envelope: &HybridEncrypted,
    ) -> Result<T, HybridCryptoError> {
        let plaintext = self.decrypt(envelope)?;
        serde_json::from_slice(&plaintext).map_err(|_| HybridCryptoError::PlaintextParse)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
    use std::sync::Arc;

    /// A freshly generated keyring for tests. RSA keygen is slow, so tests
    /// share one via `once_cell`.
    pub fn test_keyring() -> Arc<ServerKeyring> {
        use once_cell::sync::Lazy;
        static KEYRING: Lazy<Arc<ServerKeyring>> = Lazy::new(|| {
            let mut rng = aes_gcm::aead::OsRng;
            let private = RsaPrivateKey::new(&mut rng, 2048).expect("rsa keygen");
            let public = RsaPublicKey::from(&private);
            let private_pem = private
                .to_pkcs8_pem(LineEnding::LF)
                .expect("private pem")
                .to_string();
            let public_pem = public
                .to_public_key_pem(LineEnding::LF)
                .expect("public pem");
            Arc::new(ServerKeyring::from_pems(&private_pem, &public_pem).expect("keyring"))
        });
        KEYRING.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_keyring;

    #[test]
    fn round_trips_arbitrary_plaintext() {
        let keyring = test_keyring();
        let plaintext = b"0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
        let envelope = keyring.encrypt(plaintext).unwrap();
        assert_eq!(keyring.decrypt(&envelope).unwrap(), plaintext);
    }

    #[test]
    fn decrypt_json_parses_typed_payloads() {
        let keyring = test_keyring();
        let envelope = keyring
            .encrypt(br#"{"x-api-key":"sekrit"}"#)
            .unwrap();
        let headers: std::collections::HashMap<String, String> =
            keyring.decrypt_json(&envelope).unwrap();
        assert_eq!(headers["x-api-key"], "sekrit");
    }
}
