//! BlockCypher chain-data adapter for the four UTXO chains it serves:
//! Bitcoin mainnet/testnet, Litecoin mainnet, Dogecoin mainnet.
//!
//! Pagination is via `before`/`after` height bounds on the address-history
//! call. Per the design notes, `next_start_height` stays pinned at the
//! window's original `start_height` while `next_end_height` lowers to the
//! oldest block height seen in the page just fetched -- BlockCypher's own
//! `hasMore` flag is the only page-boundary signal it gives us.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use gateway_core::{
    lookup_chain, Amount, Blockchain, ChainProvider, EmbeddedTransfers, FeeProvider, GatewayError,
    GatewayResult, HeightPaginatedResponse, Transaction, TransactionStatus, Transfer,
    UNKNOWN_ADDRESS,
};

use crate::http::{Gate, RetryingHttpClient};
use crate::timefmt;

const BASE_URL: &str = "https://api.blockcypher.com/v1";

fn blockcypher_path(chain_id: &str) -> GatewayResult<&'static str> {
    Ok(match chain_id {
        "bitcoin-mainnet" => "btc/main",
        "bitcoin-testnet" => "btc/test3",
        "litecoin-mainnet" => "ltc/main",
        "dogecoin-mainnet" => "doge/main",
        other => return Err(GatewayError::UnsupportedChain(other.to_string())),
    })
}

#[derive(Debug, Deserialize)]
struct ChainResponse {
    height: i64,
    hash: String,
}

#[derive(Debug, Deserialize)]
struct AddressFullResponse {
    #[serde(default)]
    txs: Vec<TxResponse>,
    #[serde(default, rename = "hasMore")]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    hash: String,
    #[serde(default)]
    inputs: Vec<InputResponse>,
    #[serde(default)]
    outputs: Vec<OutputResponse>,
    fees: u64,
    received: String,
    confirmations: i64,
    block_hash: String,
    block_height: i64,
    hex: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InputResponse {
    #[serde(default)]
    addresses: Vec<String>,
    #[serde(default)]
    output_value: u64,
}

#[derive(Debug, Deserialize)]
struct OutputResponse {
    #[serde(default)]
    addresses: Vec<String>,
    #[serde(default)]
    value: u64,
}

/// Reads BlockCypher's v1 REST API. Holds its own rate-limit gate
/// (`BLOCKCYPHER_RATE_LIMIT`, default 5) and delegates fee estimation to a
/// [`FeeProvider`] (BitGo in practice, since BlockCypher does not supply its
/// own fee oracle).
pub struct BlockCypherProvider {
    http: RetryingHttpClient,
    gate: Gate,
    token: String,
    fees: Arc<dyn FeeProvider>,
}

impl BlockCypherProvider {
    /// Construct a provider reading `BLOCKCYPHER_TOKEN` and
    /// `BLOCKCYPHER_RATE_LIMIT` from the environment, warning (not failing)
    /// when the token is absent as anonymous BlockCypher access is far more
    /// rate-limited.
    pub fn new(fees: Arc<dyn FeeProvider>) -> Self {
        let token = std::env::var("BLOCKCYPHER_TOKEN").unwrap_or_default();
        if token.is_empty() {
            warn!("BLOCKCYPHER_TOKEN not set in environment; requests will be heavily rate-limited");
        }
        let rate_limit: usize = std::env::var("BLOCKCYPHER_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        Self {
            http: RetryingHttpClient::new(),
            gate: Gate::new(Some(rate_limit)),
            token,
            fees,
        }
    }

    fn auth_query<'a>(&'a self, extra: &[(&'a str, String)]) -> Vec<(&'a str, &'a str)> {
        let mut out: Vec<(&str, &str)> = extra.iter().map(|(k, v)| (*k, v.as_str())).collect();
        if !self.token.is_empty() {
            out.push(("token", self.token.as_str()));
        }
        out
    }
}

#[async_trait]
impl ChainProvider for BlockCypherProvider {
    async fn get_blockchain_data(&self, chain_id: &str) -> GatewayResult<Blockchain> {
        let path = blockcypher_path(chain_id)?;
        let entry = lookup_chain(chain_id)
            .ok_or_else(|| GatewayError::UnsupportedChain(chain_id.to_string()))?;

        let url = format!("{BASE_URL}/{path}");
        let query = self.auth_query(&[]);
        let chain: ChainResponse = self
            .gate
            .run(self.http.get_json(&url, &query))
            .await?;
        let fees = self.fees.get_fees(chain_id).await?;

        Ok(Blockchain {
            name: entry.name.to_string(),
            id: entry.id.to_string(),
            is_mainnet: entry.is_mainnet,
            network: entry.network.to_string(),
            confirmations_until_final: entry.confirmations_until_final,
            native_currency_id: entry.native_currency_id(),
            fee_estimates: fees,
            fee_estimates_timestamp: timefmt::now_iso_millis(),
            block_height: chain.height,
            verified_height: chain.height,
            verified_block_hash: chain.hash,
        })
    }

    async fn get_address_transactions(
        &self,
        chain_id: &str,
        address: &str,
        start_height: i64,
        end_height: i64,
    ) -> GatewayResult<HeightPaginatedResponse<Transaction>> {
        let path = blockcypher_path(chain_id)?;
        let url = format!("{BASE_URL}/{path}/addrs/{address}/full");
        let query = self.auth_query(&[
            ("includeHex", "true".to_string()),
            ("limit", "50".to_string()),
            ("before", end_height.to_string()),
            ("after", start_height.to_string()),
        ]);

        let body: AddressFullResponse = self.gate.run(self.http.get_json(&url, &query)).await?;

        let mut contents = Vec::with_capacity(body.txs.len());
        let mut last_block_height = start_height;
        for tx in &body.txs {
            contents.push(to_transaction(chain_id, tx)?);
            last_block_height = tx.block_height;
        }

        if !body.has_more {
            return Ok(HeightPaginatedResponse::done(contents));
        }
        Ok(HeightPaginatedResponse {
            contents,
            has_more: true,
            next_start_height: Some(start_height),
            next_end_height: Some(last_block_height),
        })
    }
}

fn to_transaction(chain_id: &str, tx: &TxResponse) -> GatewayResult<Transaction> {
    let transaction_id = format!("{chain_id}:{}", tx.hash);
    let mut transfers = Vec::with_capacity(tx.inputs.len() + tx.outputs.len());
    let mut index = 0u32;
    for input in &tx.inputs {
        transfers.push(Transfer {
            transfer_id: format!("{transaction_id}:{index}"),
            blockchain_id: chain_id.to_string(),
            from_address: input.addresses.first().cloned().unwrap_or_default(),
            to_address: UNKNOWN_ADDRESS.to_string(),
            index,
            transaction_id: transaction_id.clone(),
            amount: Amount::from_u128(
                gateway_core::native_currency_id(chain_id),
                input.output_value as u128,
            ),
            meta: HashMap::new(),
        });
        index += 1;
    }
    for output in &tx.outputs {
        transfers.push(Transfer {
            transfer_id: format!("{transaction_id}:{index}"),
            blockchain_id: chain_id.to_string(),
            from_address: UNKNOWN_ADDRESS.to_string(),
            to_address: output.addresses.first().cloned().unwrap_or_default(),
            index,
            transaction_id: transaction_id.clone(),
            amount: Amount::from_u128(
                gateway_core::native_currency_id(chain_id),
                output.value as u128,
            ),
            meta: HashMap::new(),
        });
        index += 1;
    }
    Ok(Transaction {
        transaction_id: transaction_id.clone(),
        identifier: tx.hash.clone(),
        hash: tx.hash.clone(),
        blockchain_id: chain_id.to_string(),
        timestamp: timefmt::parse_rfc3339(&tx.received)?,
        embedded: EmbeddedTransfers { transfers },
        fee: Amount::from_u128(gateway_core::native_currency_id(chain_id), tx.fees as u128),
        confirmations: tx.confirmations.max(0),
        size: tx.hex.as_ref().map(|h| (h.len() / 2) as i64).unwrap_or(0),
        index: 0,
        block_hash: tx.block_hash.clone(),
        block_height: tx.block_height,
        status: TransactionStatus::Confirmed,
        meta: HashMap::new(),
        raw: tx.hex.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_chain_is_rejected_before_any_network_call() {
        assert!(matches!(
            blockcypher_path("solana-mainnet"),
            Err(GatewayError::UnsupportedChain(_))
        ));
    }

    #[test]
    fn transaction_assembles_inputs_before_outputs_with_dense_indices() {
        let tx = TxResponse {
            hash: "deadbeef".into(),
            inputs: vec![InputResponse {
                addresses: vec!["addr-in".into()],
                output_value: 500,
            }],
            outputs: vec![
                OutputResponse {
                    addresses: vec!["addr-out".into()],
                    value: 400,
                },
                OutputResponse {
                    addresses: vec![],
                    value: 90,
                },
            ],
            fees: 10,
            received: "2021-04-01T12:34:56Z".into(),
            confirmations: 3,
            block_hash: "blk".into(),
            block_height: 100,
            hex: Some("deadbeef".into()),
        };
        let transaction = to_transaction("bitcoin-mainnet", &tx).unwrap();
        assert!(transaction.is_well_formed());
        assert_eq!(transaction.embedded.transfers.len(), 3);
        assert_eq!(transaction.embedded.transfers[0].from_address, "addr-in");
        assert_eq!(transaction.embedded.transfers[0].to_address, UNKNOWN_ADDRESS);
        assert_eq!(transaction.embedded.transfers[2].to_address, "");
    }

    #[test]
    fn pagination_pins_start_and_lowers_end() {
        let body = AddressFullResponse {
            txs: vec![
                TxResponse {
                    hash: "a".into(),
                    inputs: vec![],
                    outputs: vec![],
                    fees: 0,
                    received: "2021-04-01T12:34:56Z".into(),
                    confirmations: 10,
                    block_hash: "blk1".into(),
                    block_height: 500,
                    hex: None,
                },
                TxResponse {
                    hash: "b".into(),
                    inputs: vec![],
                    outputs: vec![],
                    fees: 0,
                    received: "2021-04-01T12:34:56Z".into(),
                    confirmations: 10,
                    block_hash: "blk2".into(),
                    block_height: 480,
                    hex: None,
                },
            ],
            has_more: true,
        };
        let mut last_block_height = 1000i64;
        for tx in &body.txs {
            last_block_height = tx.block_height;
        }
        assert_eq!(last_block_height, 480);
    }
}
