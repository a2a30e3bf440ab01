//! EIP-712 domains and typed structs for session-key signing.
//!
//! Two domains are in play. The delegator domain (`AgentDelegator`, version
//! `1`) is anchored at the user's wallet, which is also the EIP-7702
//! delegated account; all session-key signatures verify under it. Token
//! domains for EIP-3009 transfers are only ever used as struct-hash inputs:
//! the delegator contract reconstructs the token digest on-chain from the
//! stored `(nameHash, versionHash)` of the approved contract.

use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_sol_types::{Eip712Domain, SolStruct, SolValue, eip712_domain, sol};

use crate::scope::Eip712DomainParams;
use crate::types::{EvmAddress, TransferWithAuthorization};

sol!(
    /// The struct whose EIP-712 digest the session key actually signs for
    /// pay-gated transfers. Packing `(sessionId, verifyingContract,
    /// structHash)` lets the contract rebuild the token-domain preimage.
    struct SessionSignature {
        bytes32 sessionId;
        address verifyingContract;
        bytes32 structHash;
    }
);

sol!(
    /// Typed message authorizing a (batched) execution through the
    /// delegated account.
    struct ExecuteWithSession {
        bytes32 sessionId;
        bytes32 mode;
        bytes executionData;
    }
);

sol!(
    /// One call of a batched execution.
    struct Execution {
        address target;
        uint256 value;
        bytes callData;
    }
);

/// The domain every session-key signature verifies under.
pub fn agent_delegator_domain(owner_wallet: EvmAddress, chain_id: u64) -> Eip712Domain {
    eip712_domain! {
        name: "AgentDelegator",
        version: "1",
        chain_id: chain_id,
        verifying_contract: owner_wallet.0,
    }
}

/// The signing domain of an approved token contract, from its registered
/// domain parameters.
pub fn token_domain(
    params: &Eip712DomainParams,
    chain_id: u64,
    token_address: EvmAddress,
) -> Eip712Domain {
    eip712_domain! {
        name: params.name.clone(),
        version: params.version.clone(),
        chain_id: chain_id,
        verifying_contract: token_address.0,
    }
}

/// `keccak256(abi.encode(TYPEHASH, from, to, value, validAfter, validBefore, nonce))`.
pub fn transfer_struct_hash(transfer: &TransferWithAuthorization) -> B256 {
    transfer.eip712_hash_struct()
}

/// ERC-7579-style call-type identifier for a single call.
pub fn mode_single() -> B256 {
    B256::ZERO
}

/// ERC-7579-style call-type identifier for a batch: `0x01` in the first byte.
pub fn mode_batch() -> B256 {
    let mut bytes = [0u8; 32];
    bytes[0] = 0x01;
    B256::new(bytes)
}

/// Single-call execution data: `packed(target ‖ value ‖ calldata)`.
pub fn encode_single_execution(target: Address, value: U256, calldata: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(20 + 32 + calldata.len());
    out.extend_from_slice(target.as_slice());
    out.extend_from_slice(&value.to_be_bytes::<32>());
    out.extend_from_slice(calldata);
    Bytes::from(out)
}

/// Batch execution data: `abi.encode(Execution[])`.
pub fn encode_batch_execution(executions: &[Execution]) -> Bytes {
    Bytes::from(executions.abi_encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;
    use std::str::FromStr;

    fn address(n: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        Address::from(bytes)
    }

    #[test]
    fn transfer_typehash_preimage_matches_eip3009() {
        assert_eq!(
            TransferWithAuthorization::eip712_encode_type(),
            "TransferWithAuthorization(address from,address to,uint256 value,uint256 validAfter,uint256 validBefore,bytes32 nonce)",
        );
    }

    #[test]
    fn session_signature_type_packs_envelope_fields() {
        assert_eq!(
            SessionSignature::eip712_encode_type(),
            "SessionSignature(bytes32 sessionId,address verifyingContract,bytes32 structHash)",
        );
        let _ = keccak256(SessionSignature::eip712_encode_type().as_bytes());
    }

    #[test]
    fn delegator_domain_is_anchored_at_the_wallet() {
        let wallet = EvmAddress::from_str("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266").unwrap();
        let domain = agent_delegator_domain(wallet, 25);
        assert_eq!(domain.name.as_deref(), Some("AgentDelegator"));
        assert_eq!(domain.version.as_deref(), Some("1"));
        assert_eq!(domain.chain_id, Some(U256::from(25u64)));
        assert_eq!(domain.verifying_contract, Some(wallet.0));
    }

    #[test]
    fn token_domain_separator_matches_eip3009_recomputation() {
        // USDC.e registers domain ("USD Coin", "2"); the separator must
        // equal keccak256(abi.encode(EIP712Domain typehash, fields)) so the
        // delegator contract's on-chain reconstruction agrees with ours.
        let params = Eip712DomainParams {
            name: "USD Coin".to_string(),
            version: "2".to_string(),
        };
        let token =
            EvmAddress::from_str("0xc21223249ca28397b4b6541dffaecc539bff0c59").unwrap();
        let domain = token_domain(&params, 25, token);

        let typehash = keccak256(
            "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
        );
        let mut preimage = Vec::with_capacity(5 * 32);
        preimage.extend_from_slice(typehash.as_slice());
        preimage.extend_from_slice(keccak256("USD Coin".as_bytes()).as_slice());
        preimage.extend_from_slice(keccak256("2".as_bytes()).as_slice());
        preimage.extend_from_slice(&U256::from(25u64).to_be_bytes::<32>());
        let mut contract_word = [0u8; 32];
        contract_word[12..].copy_from_slice(token.0.as_slice());
        preimage.extend_from_slice(&contract_word);

        assert_eq!(domain.separator(), keccak256(&preimage));
    }

    #[test]
    fn struct_hash_is_stable_for_identical_inputs() {
        let transfer = TransferWithAuthorization {
            from: address(1),
            to: address(2),
            value: U256::from(1_000_000u64),
            validAfter: U256::ZERO,
            validBefore: U256::from(1_800_000_000u64),
            nonce: B256::repeat_byte(0xab),
        };
        assert_eq!(transfer_struct_hash(&transfer), transfer_struct_hash(&transfer));
    }

    #[test]
    fn mode_identifiers_differ_in_the_call_type_byte() {
        assert_eq!(mode_single()[0], 0x00);
        assert_eq!(mode_batch()[0], 0x01);
        assert_ne!(mode_single(), mode_batch());
    }

    #[test]
    fn single_execution_is_packed() {
        let calldata = vec![0xa9, 0x05, 0x9c, 0xbb];
        let encoded = encode_single_execution(address(7), U256::from(5u64), &calldata);
        assert_eq!(encoded.len(), 20 + 32 + 4);
        assert_eq!(&encoded[..20], address(7).as_slice());
        assert_eq!(&encoded[52..], calldata.as_slice());
    }

    #[test]
    fn batch_execution_is_abi_encoded() {
        let executions = vec![
            Execution {
                target: address(1),
                value: U256::ZERO,
                callData: Bytes::from(vec![0x01]),
            },
            Execution {
                target: address(2),
                value: U256::from(1u64),
                callData: Bytes::new(),
            },
        ];
        let encoded = encode_batch_execution(&executions);
        // Dynamic array encoding: offset word, then length word.
        assert_eq!(U256::from_be_slice(&encoded[..32]), U256::from(32u64));
        assert_eq!(U256::from_be_slice(&encoded[32..64]), U256::from(2u64));
    }
}
