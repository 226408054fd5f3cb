use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A non-negative integer amount denominated in a chain's smallest unit
/// (satoshis, wei, drops, mutez), tagged with the currency it is in.
///
/// `currency_id` has the shape `<chain-id>:<token>`, where `<token>` is
/// [`crate::NATIVE_TOKEN`] for the chain's base asset or a chain-specific
/// token identifier (e.g. an Ethereum contract address). Amounts are never
/// negative; direction is carried by the enclosing [`Transfer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    /// Decimal integer string in the currency's smallest unit.
    pub amount: String,
    /// `<chain-id>:<token>`.
    pub currency_id: String,
}

impl Amount {
    /// Construct an amount from any non-negative integer.
    pub fn from_u128(currency_id: impl Into<String>, amount: u128) -> Self {
        Self {
            amount: amount.to_string(),
            currency_id: currency_id.into(),
        }
    }

    /// Construct an amount from an already-formatted decimal integer string,
    /// trusting the caller that it is non-negative.
    pub fn new(currency_id: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            currency_id: currency_id.into(),
        }
    }

    /// `true` iff `amount` parses as a non-negative decimal integer, per the
    /// invariant in the spec's testable properties.
    pub fn is_well_formed(&self) -> bool {
        !self.amount.is_empty() && self.amount.bytes().all(|b| b.is_ascii_digit())
    }
}

/// One fee/confirmation-time tradeoff point, as reported by an upstream fee
/// oracle. `tier` is a short human label such as `"10m"`; the list is
/// ordered cheapest-slowest to most-expensive-fastest when the upstream
/// provides tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    /// The fee amount for this tier.
    pub fee: Amount,
    /// Short human label, e.g. `"10m"`.
    pub tier: String,
    /// Estimated time to confirmation, in milliseconds.
    pub estimated_confirmation_in: i64,
}

/// A single value movement within a [`Transaction`].
///
/// `transfer_id` is always `<chain-id>:<tx-hash>:<index>`; `index` is dense
/// and ascending within the enclosing transaction. Either address may be
/// [`crate::UNKNOWN_ADDRESS`] (an upstream could not attribute that side,
/// common for UTXO inputs/outputs) or [`crate::FEE_SINK_ADDRESS`] (the
/// fee-consuming pseudo-sink used by account-model chains).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// `<chain-id>:<tx-hash>:<index>`.
    pub transfer_id: String,
    /// The chain this transfer occurred on.
    pub blockchain_id: String,
    /// Source address, `"unknown"`, or empty when the upstream omits it.
    pub from_address: String,
    /// Destination address, `"unknown"`, `"__fee__"`, or empty.
    pub to_address: String,
    /// Dense, ascending position within the enclosing transaction's transfer
    /// list.
    pub index: u32,
    /// Equal to the enclosing transaction's `transaction_id`.
    pub transaction_id: String,
    /// The amount moved.
    pub amount: Amount,
    /// Provider-specific annotations, e.g. Tezos operation status.
    pub meta: HashMap<String, String>,
}

/// Status of a materialized transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// The transaction is included in a block and did not revert/fail.
    Confirmed,
    /// The transaction is included in a block but reverted, errored, or was
    /// backtracked.
    Failed,
}

/// Transfers embedded in a [`Transaction`], matching the upstream API's
/// `_embedded` hypermedia convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedTransfers {
    /// The transfers that make up this transaction, in dense ascending
    /// `index` order.
    pub transfers: Vec<Transfer>,
}

/// A single normalized transaction, collapsed from whatever shape the
/// upstream explorer returned (UTXO in/out lists, or an account-model
/// normal/internal/token-transfer trio) into one canonical shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// `<chain-id>:<hash>`.
    pub transaction_id: String,
    /// The upstream's raw identifier for this transaction (usually equal to
    /// `hash`).
    pub identifier: String,
    /// The upstream's raw transaction hash.
    pub hash: String,
    /// The chain this transaction occurred on.
    pub blockchain_id: String,
    /// ISO-8601 UTC timestamp, millisecond precision.
    pub timestamp: String,
    /// The transfers this transaction is made of.
    #[serde(rename = "_embedded")]
    pub embedded: EmbeddedTransfers,
    /// The fee paid, denominated in the chain's native currency.
    pub fee: Amount,
    /// Current chain tip height minus `block_height`, clamped at zero.
    pub confirmations: i64,
    /// Size of the transaction in bytes, when known (Ethereum proxies this
    /// with `gasUsed`).
    pub size: i64,
    /// Position of this transaction within its block, when the upstream
    /// exposes one.
    pub index: i64,
    /// Hash of the including block.
    pub block_hash: String,
    /// Height of the including block.
    pub block_height: i64,
    /// Whether the transaction is confirmed or failed/reverted.
    pub status: TransactionStatus,
    /// Provider-specific annotations (gas fields, DestinationTag, ...).
    pub meta: HashMap<String, String>,
    /// Base64-encoded serialized transaction, when an upstream can supply
    /// it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl Transaction {
    /// `true` iff every invariant from the spec's testable properties holds:
    /// dense ascending transfer indices, consistent ids, non-negative
    /// confirmations, and a native-currency fee.
    pub fn is_well_formed(&self) -> bool {
        if self.transaction_id != format!("{}:{}", self.blockchain_id, self.hash) {
            return false;
        }
        if self.fee.currency_id != crate::native_currency_id(&self.blockchain_id) {
            return false;
        }
        if self.confirmations < 0 {
            return false;
        }
        for (i, t) in self.embedded.transfers.iter().enumerate() {
            if t.index as usize != i {
                return false;
            }
            if t.transaction_id != self.transaction_id {
                return false;
            }
        }
        true
    }
}

/// A chain's current tip, fee estimates, and static registry metadata,
/// assembled by a provider adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blockchain {
    /// Human-readable display name, e.g. `"Bitcoin"`.
    pub name: String,
    /// Stable routing key, e.g. `"bitcoin-mainnet"`.
    pub id: String,
    /// Whether this is the chain's production network.
    pub is_mainnet: bool,
    /// Short network tag, e.g. `"bitcoin"`.
    pub network: String,
    /// Number of confirmations after which a block is considered final.
    pub confirmations_until_final: u32,
    /// `<chain-id>:__native__`.
    pub native_currency_id: String,
    /// Current fee tiers, cheapest-slowest to most-expensive-fastest.
    pub fee_estimates: Vec<FeeEstimate>,
    /// When `fee_estimates` was produced.
    pub fee_estimates_timestamp: String,
    /// Most recent block height the provider has seen. May equal
    /// `verified_height`.
    pub block_height: i64,
    /// Highest block height the provider was able to confirm.
    pub verified_height: i64,
    /// Hash of the block at `verified_height`.
    pub verified_block_hash: String,
}

/// A page of height-ordered results, with an optional cursor for the next
/// page expressed as a height window.
///
/// When `has_more` is `true`, at least one of `next_start_height` /
/// `next_end_height` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightPaginatedResponse<T> {
    /// The page's contents.
    pub contents: Vec<T>,
    /// Whether a follow-up call would return additional results.
    pub has_more: bool,
    /// Start of the next unfetched height window, when `has_more`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_start_height: Option<i64>,
    /// End of the next unfetched height window, when `has_more`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_end_height: Option<i64>,
}

impl<T> HeightPaginatedResponse<T> {
    /// A response with no more pages.
    pub fn done(contents: Vec<T>) -> Self {
        Self {
            contents,
            has_more: false,
            next_start_height: None,
            next_end_height: None,
        }
    }
}

/// A hypermedia link, matching the `_links` envelope convention used by the
/// (out-of-scope) HTTP front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// The link target.
    pub href: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_transfer(chain: &str, hash: &str, index: u32) -> Transfer {
        Transfer {
            transfer_id: format!("{chain}:{hash}:{index}"),
            blockchain_id: chain.into(),
            from_address: "a".into(),
            to_address: "b".into(),
            index,
            transaction_id: format!("{chain}:{hash}"),
            amount: Amount::from_u128(crate::native_currency_id(chain), 10),
            meta: HashMap::new(),
        }
    }

    #[test]
    fn amount_well_formed_rejects_negative_and_garbage() {
        assert!(Amount::from_u128("bitcoin-mainnet:__native__", 0).is_well_formed());
        assert!(!Amount::new("x:y", "-1").is_well_formed());
        assert!(!Amount::new("x:y", "").is_well_formed());
        assert!(!Amount::new("x:y", "12a").is_well_formed());
    }

    #[test]
    fn transaction_well_formed_checks_dense_indices() {
        let chain = "bitcoin-mainnet";
        let hash = "deadbeef";
        let mut tx = Transaction {
            transaction_id: format!("{chain}:{hash}"),
            identifier: hash.into(),
            hash: hash.into(),
            blockchain_id: chain.into(),
            timestamp: "2021-04-01T12:34:56.000+00:00".into(),
            embedded: EmbeddedTransfers {
                transfers: vec![sample_transfer(chain, hash, 0), sample_transfer(chain, hash, 1)],
            },
            fee: Amount::from_u128(crate::native_currency_id(chain), 1),
            confirmations: 3,
            size: 200,
            index: 0,
            block_hash: "blk".into(),
            block_height: 100,
            status: TransactionStatus::Confirmed,
            meta: HashMap::new(),
            raw: None,
        };
        assert!(tx.is_well_formed());

        tx.embedded.transfers[1].index = 5;
        assert!(!tx.is_well_formed());
    }

    #[test]
    fn height_paginated_response_done_has_no_cursor() {
        let resp: HeightPaginatedResponse<i32> = HeightPaginatedResponse::done(vec![1, 2]);
        assert!(!resp.has_more);
        assert!(resp.next_start_height.is_none());
    }
}
