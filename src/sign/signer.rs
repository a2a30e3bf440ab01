//! The signing service: scope checks, key decryption, and EIP-712 signing
//! on behalf of a delegated session key.
//!
//! Every signature request is checked against the session's scopes and
//! validity window before the private key is ever decrypted. The decrypted
//! key must re-derive the stored session key address; a mismatch is an
//! invariant violation and aborts without producing a signature.

use alloy_primitives::{B256, Bytes};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use std::sync::Arc;

use crate::crypto::{HybridEncrypted, ServerKeyring};
use crate::error::GatewayError;
use crate::scope::{self, ApprovedContract, SessionScope};
use crate::sign::eip712::{self, ExecuteWithSession, SessionSignature};
use crate::sign::envelope::SessionSignatureEnvelope;
use crate::types::{
    EvmAddress, EvmSignature, HexEncodedNonce, SessionId, TokenAmount, TransferWithAuthorization,
    UnixTimestamp,
};

/// Everything the signer needs to know about one delegated session.
#[derive(Debug, Clone)]
pub struct SessionSigningContext {
    pub session_id: SessionId,
    pub session_key_address: EvmAddress,
    pub owner_wallet: EvmAddress,
    pub encrypted_private_key: HybridEncrypted,
    pub scopes: Vec<SessionScope>,
    /// Contracts registered before typed scopes existed. Checked after
    /// `scopes` when deciding approval.
    pub legacy_approved_contracts: Vec<ApprovedContract>,
    pub valid_after: UnixTimestamp,
    pub valid_until: UnixTimestamp,
    pub is_active: bool,
}

/// An EIP-3009 transfer to countersign with the session key.
#[derive(Debug, Clone)]
pub struct TransferSignRequest {
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: HexEncodedNonce,
    pub token_address: EvmAddress,
    /// Chain the delegator contract lives on for this payment.
    pub chain_id: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("contract {contract} is not approved for this session")]
    ContractNotApproved {
        contract: String,
        approved_contracts: Vec<String>,
        available_scopes: Vec<String>,
    },
    #[error("session is revoked or inactive")]
    SessionInactive,
    #[error("current time is outside the session validity window")]
    OutsideValidityWindow,
    #[error("from address does not match the session owner")]
    FromMismatch,
    #[error("failed to decrypt session private key")]
    KeyDecrypt,
    #[error("decrypted session private key is malformed")]
    KeyParse,
    #[error("decrypted session key does not match the stored address")]
    SessionKeyMismatch,
    #[error("system clock unavailable")]
    Clock,
    #[error("signing failed")]
    Signing(#[source] alloy_signer::Error),
}

impl From<SignError> for GatewayError {
    fn from(error: SignError) -> Self {
        match error {
            SignError::ContractNotApproved {
                contract,
                approved_contracts,
                available_scopes,
            } => GatewayError::ContractNotApproved {
                contract,
                approved_contracts,
                available_scopes,
            },
            SignError::SessionInactive => {
                GatewayError::Forbidden("Session is revoked or inactive".to_string())
            }
            SignError::OutsideValidityWindow => {
                GatewayError::Forbidden("Session validity window has not started or has expired".to_string())
            }
            SignError::FromMismatch => GatewayError::Forbidden(
                "from address does not match the session owner wallet".to_string(),
            ),
            SignError::SessionKeyMismatch => GatewayError::SessionKeyMismatch,
            SignError::KeyDecrypt | SignError::KeyParse => {
                GatewayError::Internal("session key material unavailable".to_string())
            }
            SignError::Clock => GatewayError::Internal("system clock unavailable".to_string()),
            SignError::Signing(e) => GatewayError::Internal(e.to_string()),
        }
    }
}

/// Signs EIP-3009 transfers and session executions with delegated keys.
#[derive(Clone)]
pub struct SigningService {
    keyring: Arc<ServerKeyring>,
    chain_id: u64,
}

impl SigningService {
    pub fn new(keyring: Arc<ServerKeyring>, chain_id: u64) -> Self {
        Self { keyring, chain_id }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Produce the 149-byte session-signature envelope for an EIP-3009
    /// `transferWithAuthorization`.
    ///
    /// Scope admissibility is checked before any key material is touched.
    pub fn sign_transfer(
        &self,
        session: &SessionSigningContext,
        request: &TransferSignRequest,
    ) -> Result<SessionSignatureEnvelope, SignError> {
        self.assert_token_approved(session, &request.token_address)?;
        self.assert_session_window(session)?;
        if request.from != session.owner_wallet {
            return Err(SignError::FromMismatch);
        }

        let signer = self.session_signer(session)?;

        let transfer = TransferWithAuthorization {
            from: request.from.into(),
            to: request.to.into(),
            value: request.value.into(),
            validAfter: request.valid_after.into(),
            validBefore: request.valid_before.into(),
            nonce: B256::new(request.nonce.0),
        };
        let struct_hash = eip712::transfer_struct_hash(&transfer);

        let signature = self.sign_session_struct(
            &signer,
            session,
            request.token_address,
            struct_hash,
            request.chain_id,
        )?;

        Ok(SessionSignatureEnvelope {
            session_id: session.session_id,
            verifying_contract: request.token_address,
            struct_hash,
            signature,
        })
    }

    /// Sign an `ExecuteWithSession` message, returning the raw 65-byte
    /// signature the relayer forwards on-chain.
    pub fn sign_execution(
        &self,
        session: &SessionSigningContext,
        mode: B256,
        execution_data: &Bytes,
    ) -> Result<EvmSignature, SignError> {
        self.assert_session_window(session)?;
        let signer = self.session_signer(session)?;
        let message = ExecuteWithSession {
            sessionId: B256::new(session.session_id.0),
            mode,
            executionData: execution_data.clone(),
        };
        let domain = eip712::agent_delegator_domain(session.owner_wallet, self.chain_id);
        let hash = alloy_sol_types::SolStruct::eip712_signing_hash(&message, &domain);
        let signature = signer.sign_hash_sync(&hash).map_err(SignError::Signing)?;
        Ok(EvmSignature(signature.as_bytes()))
    }

    fn sign_session_struct(
        &self,
        signer: &PrivateKeySigner,
        session: &SessionSigningContext,
        verifying_contract: EvmAddress,
        struct_hash: B256,
        chain_id: u64,
    ) -> Result<EvmSignature, SignError> {
        let message = SessionSignature {
            sessionId: B256::new(session.session_id.0),
            verifyingContract: verifying_contract.into(),
            structHash: struct_hash,
        };
        let domain = eip712::agent_delegator_domain(session.owner_wallet, chain_id);
        let hash = alloy_sol_types::SolStruct::eip712_signing_hash(&message, &domain);
        let signature = signer.sign_hash_sync(&hash).map_err(SignError::Signing)?;
        Ok(EvmSignature(signature.as_bytes()))
    }

    fn assert_token_approved(
        &self,
        session: &SessionSigningContext,
        token: &EvmAddress,
    ) -> Result<(), SignError> {
        if scope::is_contract_approved(&session.scopes, token) {
            return Ok(());
        }
        if session
            .legacy_approved_contracts
            .iter()
            .any(|contract| contract.address == *token)
        {
            return Ok(());
        }
        let mut approved = scope::approved_contract_addresses(&session.scopes);
        for contract in &session.legacy_approved_contracts {
            let lower = contract.address.as_lower();
            if !approved.contains(&lower) {
                approved.push(lower);
            }
        }
        Err(SignError::ContractNotApproved {
            contract: token.as_lower(),
            approved_contracts: approved,
            available_scopes: session
                .scopes
                .iter()
                .map(|s| s.id().to_string())
                .collect(),
        })
    }

    fn assert_session_window(&self, session: &SessionSigningContext) -> Result<(), SignError> {
        if !session.is_active {
            return Err(SignError::SessionInactive);
        }
        let now = UnixTimestamp::try_now().map_err(|_| SignError::Clock)?;
        if now < session.valid_after || now > session.valid_until {
            return Err(SignError::OutsideValidityWindow);
        }
        Ok(())
    }

    fn session_signer(
        &self,
        session: &SessionSigningContext,
    ) -> Result<PrivateKeySigner, SignError> {
        let plaintext = self
            .keyring
            .decrypt(&session.encrypted_private_key)
            .map_err(|_| SignError::KeyDecrypt)?;
        let hex_key = String::from_utf8(plaintext).map_err(|_| SignError::KeyParse)?;
        let signer: PrivateKeySigner =
            hex_key.trim().parse().map_err(|_| SignError::KeyParse)?;
        if EvmAddress(signer.address()) != session.session_key_address {
            return Err(SignError::SessionKeyMismatch);
        }
        Ok(signer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_support::test_keyring;
    use crate::scope::{Eip712DomainParams, Eip712Scope};
    use crate::sign::envelope::{ENVELOPE_LEN, SessionSignatureEnvelope};
    use alloy_sol_types::SolStruct;
    use std::str::FromStr;

    // Well-known hardhat test key; never used outside tests.
    const TEST_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    fn test_token() -> EvmAddress {
        EvmAddress::from_str("0xf951ec2800000000000000000000000000005f77c0").unwrap()
    }

    fn owner() -> EvmAddress {
        EvmAddress::from_str("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266").unwrap()
    }

    fn session_context(keyring: &ServerKeyring) -> SessionSigningContext {
        let signer = PrivateKeySigner::from_str(TEST_KEY).unwrap();
        let now = UnixTimestamp::try_now().unwrap();
        SessionSigningContext {
            session_id: SessionId([0x42; 32]),
            session_key_address: EvmAddress(signer.address()),
            owner_wallet: owner(),
            encrypted_private_key: keyring.encrypt(TEST_KEY.as_bytes()).unwrap(),
            scopes: vec![SessionScope::Eip712(Eip712Scope {
                id: "x402:payments".to_string(),
                name: "Payments".to_string(),
                description: String::new(),
                budget_enforceable: false,
                approved_contracts: vec![ApprovedContract {
                    address: test_token(),
                    name: "USDC.e".to_string(),
                    domain: Eip712DomainParams {
                        name: "USD Coin".to_string(),
                        version: "2".to_string(),
                    },
                    supported_types: vec!["TransferWithAuthorization".to_string()],
                }],
            })],
            legacy_approved_contracts: vec![],
            valid_after: UnixTimestamp(now.0 - 60),
            valid_until: now + 3600,
            is_active: true,
        }
    }

    fn transfer_request() -> TransferSignRequest {
        let now = UnixTimestamp::try_now().unwrap();
        TransferSignRequest {
            from: owner(),
            to: EvmAddress::from_str("0x70997970c51812dc3a010c7d01b50e0d17dc79c8").unwrap(),
            value: TokenAmount::from(1_000_000u64),
            valid_after: UnixTimestamp(0),
            valid_before: now + 300,
            nonce: HexEncodedNonce([0x07; 32]),
            token_address: test_token(),
            chain_id: 25,
        }
    }

    #[test]
    fn happy_path_envelope_decodes_and_matches_recomputation() {
        let keyring = test_keyring();
        let signing = SigningService::new(keyring.clone(), 25);
        let session = session_context(&keyring);
        let request = transfer_request();

        let envelope = signing.sign_transfer(&session, &request).unwrap();
        let packed = envelope.pack();
        assert_eq!(packed.len(), ENVELOPE_LEN);

        let parsed = SessionSignatureEnvelope::parse(&packed).unwrap();
        assert_eq!(parsed.verifying_contract, request.token_address);
        assert_eq!(parsed.session_id, session.session_id);

        let transfer = TransferWithAuthorization {
            from: request.from.into(),
            to: request.to.into(),
            value: request.value.into(),
            validAfter: request.valid_after.into(),
            validBefore: request.valid_before.into(),
            nonce: B256::new(request.nonce.0),
        };
        assert_eq!(parsed.struct_hash, eip712::transfer_struct_hash(&transfer));

        // ECDSA over secp256k1 is deterministic (RFC 6979): re-signing the
        // expected preimage must reproduce the envelope signature exactly.
        let signer = PrivateKeySigner::from_str(TEST_KEY).unwrap();
        let message = SessionSignature {
            sessionId: B256::new(session.session_id.0),
            verifyingContract: request.token_address.into(),
            structHash: parsed.struct_hash,
        };
        let domain = eip712::agent_delegator_domain(session.owner_wallet, 25);
        let expected = signer
            .sign_hash_sync(&message.eip712_signing_hash(&domain))
            .unwrap();
        assert_eq!(parsed.signature.0, expected.as_bytes());
    }

    #[test]
    fn disallowed_token_reports_approved_set() {
        let keyring = test_keyring();
        let signing = SigningService::new(keyring.clone(), 25);
        let session = session_context(&keyring);
        let mut request = transfer_request();
        request.token_address =
            EvmAddress::from_str("0xdead00000000000000000000000000000000dead").unwrap();

        match signing.sign_transfer(&session, &request) {
            Err(SignError::ContractNotApproved {
                approved_contracts,
                available_scopes,
                ..
            }) => {
                assert_eq!(approved_contracts, vec![test_token().as_lower()]);
                assert_eq!(available_scopes, vec!["x402:payments".to_string()]);
            }
            other => panic!("expected ContractNotApproved, got {other:?}"),
        }
    }

    #[test]
    fn legacy_approved_contracts_are_honored() {
        let keyring = test_keyring();
        let signing = SigningService::new(keyring.clone(), 25);
        let mut session = session_context(&keyring);
        let legacy_token =
            EvmAddress::from_str("0xbeef00000000000000000000000000000000beef").unwrap();
        session.legacy_approved_contracts = vec![ApprovedContract {
            address: legacy_token,
            name: "Legacy".to_string(),
            domain: Eip712DomainParams {
                name: "Legacy".to_string(),
                version: "1".to_string(),
            },
            supported_types: vec![],
        }];
        let mut request = transfer_request();
        request.token_address = legacy_token;
        assert!(signing.sign_transfer(&session, &request).is_ok());
    }

    #[test]
    fn from_mismatch_is_rejected() {
        let keyring = test_keyring();
        let signing = SigningService::new(keyring.clone(), 25);
        let session = session_context(&keyring);
        let mut request = transfer_request();
        request.from =
            EvmAddress::from_str("0x70997970c51812dc3a010c7d01b50e0d17dc79c8").unwrap();
        assert!(matches!(
            signing.sign_transfer(&session, &request),
            Err(SignError::FromMismatch)
        ));
    }

    #[test]
    fn expired_session_is_rejected_before_key_use() {
        let keyring = test_keyring();
        let signing = SigningService::new(keyring.clone(), 25);
        let mut session = session_context(&keyring);
        session.valid_until = UnixTimestamp(1);
        assert!(matches!(
            signing.sign_transfer(&session, &transfer_request()),
            Err(SignError::OutsideValidityWindow)
        ));
        session.is_active = false;
        assert!(matches!(
            signing.sign_transfer(&session, &transfer_request()),
            Err(SignError::SessionInactive)
        ));
    }

    #[test]
    fn stored_address_mismatch_is_an_invariant_violation() {
        let keyring = test_keyring();
        let signing = SigningService::new(keyring.clone(), 25);
        let mut session = session_context(&keyring);
        session.session_key_address =
            EvmAddress::from_str("0x0000000000000000000000000000000000000001").unwrap();
        assert!(matches!(
            signing.sign_transfer(&session, &transfer_request()),
            Err(SignError::SessionKeyMismatch)
        ));
    }

    #[test]
    fn execution_signature_is_65_bytes() {
        let keyring = test_keyring();
        let signing = SigningService::new(keyring.clone(), 25);
        let session = session_context(&keyring);
        let data = eip712::encode_single_execution(
            test_token().into(),
            alloy_primitives::U256::ZERO,
            &[0xa9, 0x05, 0x9c, 0xbb],
        );
        let signature = signing
            .sign_execution(&session, eip712::mode_single(), &data)
            .unwrap();
        assert_eq!(signature.0.len(), 65);
    }
}
