//! Typed session scopes and their on-chain flattening.
//!
//! A delegated session key carries either execute-style authority (contract
//! + selector allow-lists, budget enforceable on-chain) or EIP-712-style
//! authority (approved contracts with their signing domains, no budget
//! enforcement possible). The delegator contract consumes a flattened
//! `(allowedTargets, allowedSelectors, approvedContracts)` triple.

use alloy_primitives::{B256, keccak256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{EvmAddress, Selector};

/// EIP-712 domain parameters of an approved contract, as registered when the
/// session was granted. Token signing domains are always taken from here,
/// never hardcoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eip712DomainParams {
    pub name: String,
    pub version: String,
}

/// A contract a session may produce EIP-712 signatures for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedContract {
    pub address: EvmAddress,
    pub name: String,
    pub domain: Eip712DomainParams,
    #[serde(default)]
    pub supported_types: Vec<String>,
}

/// A selector entry under an execute-scope target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorInfo {
    pub selector: Selector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A contract an execute scope may call. An empty `selectors` list means
/// "any selector on this target".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteTarget {
    pub address: EvmAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub selectors: Vec<SelectorInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteScope {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub budget_enforceable: bool,
    pub targets: Vec<ExecuteTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip712Scope {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_false")]
    pub budget_enforceable: bool,
    pub approved_contracts: Vec<ApprovedContract>,
}

fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}

/// A session scope: execute-style or EIP-712-style, discriminated by `kind`
/// on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionScope {
    Execute(ExecuteScope),
    Eip712(Eip712Scope),
}

impl SessionScope {
    pub fn id(&self) -> &str {
        match self {
            SessionScope::Execute(scope) => &scope.id,
            SessionScope::Eip712(scope) => &scope.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SessionScope::Execute(scope) => &scope.name,
            SessionScope::Eip712(scope) => &scope.name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            SessionScope::Execute(scope) => &scope.description,
            SessionScope::Eip712(scope) => &scope.description,
        }
    }

    /// Whether on-chain value limits can be enforced for this scope. EIP-712
    /// scopes cannot express them; surfaces must label them "not enforceable".
    pub fn budget_enforceable(&self) -> bool {
        match self {
            SessionScope::Execute(scope) => scope.budget_enforceable,
            SessionScope::Eip712(_) => false,
        }
    }

    /// The default scope synthesized for legacy session-creation payloads
    /// that only carried `approvedContracts`.
    pub fn default_payments_scope(approved_contracts: Vec<ApprovedContract>) -> Self {
        SessionScope::Eip712(Eip712Scope {
            id: "x402:payments".to_string(),
            name: "x402 payments".to_string(),
            description: "Sign transferWithAuthorization payments for approved tokens"
                .to_string(),
            budget_enforceable: false,
            approved_contracts,
        })
    }

    /// Display-oriented summary used by the OAuth consent surface.
    pub fn descriptor(&self) -> ScopeDescriptor {
        ScopeDescriptor {
            id: self.id().to_string(),
            name: self.name().to_string(),
            description: self.description().to_string(),
            kind: match self {
                SessionScope::Execute(_) => "execute",
                SessionScope::Eip712(_) => "eip712",
            },
            budget_enforceable: self.budget_enforceable(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub budget_enforceable: bool,
}

/// An approved contract flattened to what the delegator contract stores:
/// address plus keccak hashes of the domain name and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedContractParams {
    pub address: EvmAddress,
    pub name_hash: B256,
    pub version_hash: B256,
}

/// The `(allowedTargets, allowedSelectors, approvedContracts)` triple
/// consumed by `grantSession`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainParams {
    pub allowed_targets: Vec<EvmAddress>,
    pub allowed_selectors: Vec<Selector>,
    pub approved_contracts: Vec<ApprovedContractParams>,
}

/// Flatten session scopes to on-chain grant parameters.
///
/// The contract enforces selectors globally, not per-target: if any execute
/// target lists no selectors, the flattened `allowedSelectors` is empty,
/// which the contract reads as "allow any selector". Output ordering is
/// deterministic (sorted) and duplicates collapse by lowercased address.
pub fn flatten_scopes_to_onchain_params(scopes: &[SessionScope]) -> OnChainParams {
    let mut targets: BTreeSet<EvmAddress> = BTreeSet::new();
    let mut selectors: BTreeSet<Selector> = BTreeSet::new();
    let mut any_target_without_selectors = false;
    let mut approved: Vec<ApprovedContractParams> = Vec::new();
    let mut approved_seen: BTreeSet<EvmAddress> = BTreeSet::new();

    for scope in scopes {
        match scope {
            SessionScope::Execute(execute) => {
                for target in &execute.targets {
                    targets.insert(target.address);
                    if target.selectors.is_empty() {
                        any_target_without_selectors = true;
                    }
                    for info in &target.selectors {
                        selectors.insert(info.selector);
                    }
                }
            }
            SessionScope::Eip712(eip712) => {
                for contract in &eip712.approved_contracts {
                    if approved_seen.insert(contract.address) {
                        approved.push(ApprovedContractParams {
                            address: contract.address,
                            name_hash: keccak256(contract.domain.name.as_bytes()),
                            version_hash: keccak256(contract.domain.version.as_bytes()),
                        });
                    }
                }
            }
        }
    }

    let allowed_selectors = if any_target_without_selectors {
        Vec::new()
    } else {
        selectors.into_iter().collect()
    };
    approved.sort_by_key(|c| c.address);

    OnChainParams {
        allowed_targets: targets.into_iter().collect(),
        allowed_selectors,
        approved_contracts: approved,
    }
}

/// Whether `address` may receive EIP-712 signatures under these scopes.
pub fn is_contract_approved(scopes: &[SessionScope], address: &EvmAddress) -> bool {
    scopes.iter().any(|scope| match scope {
        SessionScope::Eip712(eip712) => eip712
            .approved_contracts
            .iter()
            .any(|contract| contract.address == *address),
        SessionScope::Execute(_) => false,
    })
}

/// Whether an execute call against `target` (with an optional selector) is
/// admissible. A target with no listed selectors admits any selector.
pub fn is_execution_allowed(
    scopes: &[SessionScope],
    target: &EvmAddress,
    selector: Option<&Selector>,
) -> bool {
    scopes.iter().any(|scope| match scope {
        SessionScope::Execute(execute) => execute.targets.iter().any(|t| {
            if t.address != *target {
                return false;
            }
            if t.selectors.is_empty() {
                return true;
            }
            match selector {
                Some(selector) => t.selectors.iter().any(|info| info.selector == *selector),
                None => false,
            }
        }),
        SessionScope::Eip712(_) => false,
    })
}

/// All contract addresses approved for EIP-712 signing, lowercased.
pub fn approved_contract_addresses(scopes: &[SessionScope]) -> Vec<String> {
    let mut addresses: BTreeSet<EvmAddress> = BTreeSet::new();
    for scope in scopes {
        if let SessionScope::Eip712(eip712) = scope {
            for contract in &eip712.approved_contracts {
                addresses.insert(contract.address);
            }
        }
    }
    addresses.into_iter().map(|a| a.as_lower()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> EvmAddress {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        EvmAddress(alloy_primitives::Address::from(bytes))
    }

    fn sel(n: u8) -> Selector {
        Selector([0, 0, 0, n])
    }

    fn execute_scope(targets: Vec<ExecuteTarget>) -> SessionScope {
        SessionScope::Execute(ExecuteScope {
            id: "defi:swap".to_string(),
            name: "Swap".to_string(),
            description: String::new(),
            budget_enforceable: true,
            targets,
        })
    }

    fn eip712_scope(contracts: Vec<ApprovedContract>) -> SessionScope {
        SessionScope::Eip712(Eip712Scope {
            id: "x402:payments".to_string(),
            name: "Payments".to_string(),
            description: String::new(),
            budget_enforceable: false,
            approved_contracts: contracts,
        })
    }

    fn usdc(address: EvmAddress) -> ApprovedContract {
        ApprovedContract {
            address,
            name: "USD Coin".to_string(),
            domain: Eip712DomainParams {
                name: "USD Coin".to_string(),
                version: "2".to_string(),
            },
            supported_types: vec!["TransferWithAuthorization".to_string()],
        }
    }

    #[test]
    fn flatten_collects_targets_and_selectors() {
        let scopes = vec![execute_scope(vec![ExecuteTarget {
            address: addr(1),
            name: None,
            selectors: vec![
                SelectorInfo {
                    selector: sel(2),
                    name: None,
                    description: None,
                },
                SelectorInfo {
                    selector: sel(1),
                    name: None,
                    description: None,
                },
            ],
        }])];
        let params = flatten_scopes_to_onchain_params(&scopes);
        assert_eq!(params.allowed_targets, vec![addr(1)]);
        assert_eq!(params.allowed_selectors, vec![sel(1), sel(2)]);
    }

    #[test]
    fn any_target_without_selectors_empties_the_global_list() {
        // Selectors are enforced globally by the contract: one open target
        // means every selector is allowed everywhere.
        let scopes = vec![execute_scope(vec![
            ExecuteTarget {
                address: addr(1),
                name: None,
                selectors: vec![SelectorInfo {
                    selector: sel(1),
                    name: None,
                    description: None,
                }],
            },
            ExecuteTarget {
                address: addr(2),
                name: None,
                selectors: vec![],
            },
        ])];
        let params = flatten_scopes_to_onchain_params(&scopes);
        assert_eq!(params.allowed_targets.len(), 2);
        assert!(params.allowed_selectors.is_empty());
    }

    #[test]
    fn flatten_is_order_independent() {
        let a = execute_scope(vec![ExecuteTarget {
            address: addr(2),
            name: None,
            selectors: vec![SelectorInfo {
                selector: sel(2),
                name: None,
                description: None,
            }],
        }]);
        let b = execute_scope(vec![ExecuteTarget {
            address: addr(1),
            name: None,
            selectors: vec![SelectorInfo {
                selector: sel(1),
                name: None,
                description: None,
            }],
        }]);
        let forward = flatten_scopes_to_onchain_params(&[a.clone(), b.clone()]);
        let reverse = flatten_scopes_to_onchain_params(&[b, a]);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn approved_contracts_dedupe_by_address() {
        let scopes = vec![
            eip712_scope(vec![usdc(addr(9))]),
            eip712_scope(vec![usdc(addr(9)), usdc(addr(8))]),
        ];
        let params = flatten_scopes_to_onchain_params(&scopes);
        assert_eq!(params.approved_contracts.len(), 2);
        assert_eq!(
            params.approved_contracts[0].name_hash,
            keccak256("USD Coin".as_bytes())
        );
    }

    #[test]
    fn empty_scopes_allow_nothing() {
        let params = flatten_scopes_to_onchain_params(&[]);
        assert!(params.allowed_targets.is_empty());
        assert!(params.approved_contracts.is_empty());
        assert!(!is_contract_approved(&[], &addr(1)));
        assert!(!is_execution_allowed(&[], &addr(1), None));
    }

    #[test]
    fn execution_checks_respect_selector_lists() {
        let scopes = vec![execute_scope(vec![ExecuteTarget {
            address: addr(1),
            name: None,
            selectors: vec![SelectorInfo {
                selector: sel(7),
                name: None,
                description: None,
            }],
        }])];
        assert!(is_execution_allowed(&scopes, &addr(1), Some(&sel(7))));
        assert!(!is_execution_allowed(&scopes, &addr(1), Some(&sel(8))));
        assert!(!is_execution_allowed(&scopes, &addr(1), None));
        assert!(!is_execution_allowed(&scopes, &addr(2), Some(&sel(7))));
    }

    #[test]
    fn open_target_admits_any_selector() {
        let scopes = vec![execute_scope(vec![ExecuteTarget {
            address: addr(1),
            name: None,
            selectors: vec![],
        }])];
        assert!(is_execution_allowed(&scopes, &addr(1), Some(&sel(1))));
        assert!(is_execution_allowed(&scopes, &addr(1), None));
    }

    #[test]
    fn scope_wire_format_uses_kind_discriminator() {
        let scope = SessionScope::default_payments_scope(vec![usdc(addr(3))]);
        let json = serde_json::to_value(&scope).unwrap();
        assert_eq!(json["kind"], "eip712");
        assert_eq!(json["id"], "x402:payments");
        let back: SessionScope = serde_json::from_value(json).unwrap();
        assert_eq!(back, scope);
        assert!(!back.budget_enforceable());
    }
}
