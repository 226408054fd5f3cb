//! Static metadata for every chain the gateway knows about.
//!
//! This mirrors the source implementation's `BLOCKCHAINS` table: a small,
//! fixed list keyed by chain id, used both to answer `GetBlockchains` and to
//! populate the registry fields (`name`, `is_mainnet`, `network`,
//! `confirmations_until_final`, `native_currency_id`) that every provider
//! adapter copies into its `Blockchain` result.

use crate::native_currency_id;

/// Static registry metadata for one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainRegistryEntry {
    /// Stable routing key, e.g. `"bitcoin-mainnet"`.
    pub id: &'static str,
    /// Human-readable display name, e.g. `"Bitcoin"`.
    pub name: &'static str,
    /// Whether this is the chain's production network.
    pub is_mainnet: bool,
    /// Short network tag shared by a chain's mainnet/testnet pair, e.g.
    /// `"bitcoin"`.
    pub network: &'static str,
    /// Number of confirmations after which a block is considered final.
    pub confirmations_until_final: u32,
}

impl ChainRegistryEntry {
    /// `<chain-id>:__native__`.
    pub fn native_currency_id(&self) -> String {
        native_currency_id(self.id)
    }
}

/// The fixed table of every chain this gateway can serve. Order matches
/// `GetBlockchains`' enumeration order.
pub const CHAIN_REGISTRY: &[ChainRegistryEntry] = &[
    ChainRegistryEntry {
        id: "bitcoin-mainnet",
        name: "Bitcoin",
        is_mainnet: true,
        network: "bitcoin",
        confirmations_until_final: 4,
    },
    ChainRegistryEntry {
        id: "bitcoin-testnet",
        name: "Bitcoin Testnet",
        is_mainnet: false,
        network: "bitcoin",
        confirmations_until_final: 4,
    },
    ChainRegistryEntry {
        id: "bitcoincash-mainnet",
        name: "Bitcoin Cash",
        is_mainnet: true,
        network: "bitcoincash",
        confirmations_until_final: 4,
    },
    ChainRegistryEntry {
        id: "litecoin-mainnet",
        name: "Litecoin",
        is_mainnet: true,
        network: "litecoin",
        confirmations_until_final: 6,
    },
    ChainRegistryEntry {
        id: "dogecoin-mainnet",
        name: "Dogecoin",
        is_mainnet: true,
        network: "dogecoin",
        confirmations_until_final: 20,
    },
    ChainRegistryEntry {
        id: "ethereum-mainnet",
        name: "Ethereum",
        is_mainnet: true,
        network: "ethereum",
        confirmations_until_final: 20,
    },
    ChainRegistryEntry {
        id: "ripple-mainnet",
        name: "Ripple",
        is_mainnet: true,
        network: "ripple",
        confirmations_until_final: 1,
    },
    ChainRegistryEntry {
        id: "tezos-mainnet",
        name: "Tezos",
        is_mainnet: true,
        network: "tezos",
        confirmations_until_final: 2,
    },
];

/// Look up a chain's static registry entry by id.
pub fn lookup_chain(chain_id: &str) -> Option<&'static ChainRegistryEntry> {
    CHAIN_REGISTRY.iter().find(|c| c.id == chain_id)
}

/// Enumerate registered chains filtered by the mainnet/testnet flag, in
/// registry order. Used by `GetBlockchains(testnet)`.
pub fn chains_for(testnet: bool) -> impl Iterator<Item = &'static ChainRegistryEntry> {
    CHAIN_REGISTRY.iter().filter(move |c| c.is_mainnet != testnet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_known_chain() {
        let entry = lookup_chain("ethereum-mainnet").expect("registered");
        assert_eq!(entry.name, "Ethereum");
        assert_eq!(entry.native_currency_id(), "ethereum-mainnet:__native__");
    }

    #[test]
    fn lookup_rejects_unknown_chain() {
        assert!(lookup_chain("nonexistent-chain").is_none());
    }

    #[test]
    fn chains_for_testnet_flag_is_exact_partition() {
        let mainnets: Vec<_> = chains_for(false).map(|c| c.id).collect();
        let testnets: Vec<_> = chains_for(true).map(|c| c.id).collect();
        assert!(mainnets.contains(&"ethereum-mainnet"));
        assert!(!mainnets.contains(&"bitcoin-testnet"));
        assert!(testnets.contains(&"bitcoin-testnet"));
        assert_eq!(mainnets.len() + testnets.len(), CHAIN_REGISTRY.len());
    }
}
