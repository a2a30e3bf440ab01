use once_cell::sync::Lazy;
use std::collections::HashMap;

/// A known EVM network with its chain id and the name used by the x402
/// `network` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Human-readable network name (e.g., "cronos", "base-sepolia")
    pub name: &'static str,
    /// EIP-155 chain id
    pub chain_id: u64,
}

static KNOWN_NETWORKS: &[NetworkInfo] = &[
    // Cronos
    NetworkInfo {
        name: "cronos",
        chain_id: 25,
    },
    NetworkInfo {
        name: "cronos-testnet",
        chain_id: 338,
    },
    // Ethereum
    NetworkInfo {
        name: "ethereum",
        chain_id: 1,
    },
    NetworkInfo {
        name: "sepolia",
        chain_id: 11155111,
    },
    // Base
    NetworkInfo {
        name: "base",
        chain_id: 8453,
    },
    NetworkInfo {
        name: "base-sepolia",
        chain_id: 84532,
    },
    // Polygon
    NetworkInfo {
        name: "polygon",
        chain_id: 137,
    },
    NetworkInfo {
        name: "polygon-amoy",
        chain_id: 80002,
    },
];

static NAME_TO_CHAIN_ID: Lazy<HashMap<&'static str, u64>> = Lazy::new(|| {
    KNOWN_NETWORKS
        .iter()
        .map(|n| (n.name, n.chain_id))
        .collect()
});

static CHAIN_ID_TO_NAME: Lazy<HashMap<u64, &'static str>> = Lazy::new(|| {
    KNOWN_NETWORKS
        .iter()
        .map(|n| (n.chain_id, n.name))
        .collect()
});

pub fn chain_id_by_network_name(name: &str) -> Option<u64> {
    NAME_TO_CHAIN_ID.get(name).copied()
}

pub fn network_name_by_chain_id(chain_id: u64) -> Option<&'static str> {
    CHAIN_ID_TO_NAME.get(&chain_id).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_networks_by_name() {
        assert_eq!(chain_id_by_network_name("cronos"), Some(25));
        assert_eq!(chain_id_by_network_name("cronos-testnet"), Some(338));
        assert_eq!(chain_id_by_network_name("base"), Some(8453));
        assert!(chain_id_by_network_name("unknown-network").is_none());
    }

    #[test]
    fn test_known_networks_by_chain_id() {
        assert_eq!(network_name_by_chain_id(25), Some("cronos"));
        assert_eq!(network_name_by_chain_id(338), Some("cronos-testnet"));
        assert!(network_name_by_chain_id(999999).is_none());
    }
}
