//! Trezor Blockbook chain-data adapter, covering Bitcoin, Bitcoin Cash,
//! Litecoin, and Dogecoin mainnet against their respective public Blockbook
//! instances.
//!
//! Blockbook exposes one shared rate limit across every chain it serves (a
//! single explorer operator backs all four hosts), so unlike BlockCypher the
//! concurrency gate here is one `Gate` shared by the whole provider, not
//! per-chain.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use gateway_core::{
    lookup_chain, Amount, Blockchain, ChainProvider, EmbeddedTransfers, FeeProvider, GatewayError,
    GatewayResult, HeightPaginatedResponse, Transaction, TransactionStatus, Transfer,
    UNKNOWN_ADDRESS,
};

use crate::http::{Gate, RetryingHttpClient};
use crate::timefmt;

fn blockbook_host(chain_id: &str) -> GatewayResult<&'static str> {
    Ok(match chain_id {
        "bitcoin-mainnet" => "https://btc1.trezor.io",
        "bitcoincash-mainnet" => "https://bch1.trezor.io",
        "litecoin-mainnet" => "https://ltc1.trezor.io",
        "dogecoin-mainnet" => "https://doge1.trezor.io",
        other => return Err(GatewayError::UnsupportedChain(other.to_string())),
    })
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    blockbook: BlockbookStatus,
    backend: BackendStatus,
}

#[derive(Debug, Deserialize)]
struct BlockbookStatus {
    #[serde(rename = "bestHeight")]
    best_height: i64,
}

#[derive(Debug, Deserialize)]
struct BackendStatus {
    #[serde(rename = "bestBlockHash")]
    best_block_hash: String,
}

#[derive(Debug, Deserialize)]
struct AddressResponse {
    #[serde(default)]
    transactions: Vec<TxResponse>,
    txs: i64,
    #[serde(rename = "itemsOnPage")]
    items_on_page: i64,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    txid: String,
    #[serde(default)]
    vin: Vec<VinResponse>,
    // Sic: Blockbook's own field name for its output list is `outputs`, not
    // the `vout` used by most other explorer APIs.
    #[serde(default)]
    outputs: Vec<VoutResponse>,
    #[serde(rename = "blockTime")]
    block_time: i64,
    fees: String,
    confirmations: i64,
    hex: String,
    #[serde(rename = "blockHash")]
    block_hash: String,
    #[serde(rename = "blockHeight")]
    block_height: i64,
}

#[derive(Debug, Deserialize)]
struct VinResponse {
    #[serde(default)]
    addresses: Vec<String>,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct VoutResponse {
    #[serde(default)]
    addresses: Vec<String>,
    #[serde(default)]
    value: String,
}

/// Reads Trezor's Blockbook REST API. Holds a single process-wide gate
/// (`permits = 1`) shared across every chain host, matching the upstream's
/// shared rate budget.
pub struct BlockbookProvider {
    http: RetryingHttpClient,
    gate: Gate,
    fees: Arc<dyn FeeProvider>,
}

impl BlockbookProvider {
    /// Construct a provider delegating fee estimation to `fees`.
    pub fn new(fees: Arc<dyn FeeProvider>) -> Self {
        Self {
            http: RetryingHttpClient::new(),
            gate: Gate::new(Some(1)),
            fees,
        }
    }
}

#[async_trait]
impl ChainProvider for BlockbookProvider {
    async fn get_blockchain_data(&self, chain_id: &str) -> GatewayResult<Blockchain> {
        let host = blockbook_host(chain_id)?;
        let entry = lookup_chain(chain_id)
            .ok_or_else(|| GatewayError::UnsupportedChain(chain_id.to_string()))?;

        let url = format!("{host}/api/v2");
        let status: StatusResponse = self.gate.run(self.http.get_json(&url, &[])).await?;
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
            block_height: status.blockbook.best_height,
            verified_height: status.blockbook.best_height,
            verified_block_hash: status.backend.best_block_hash,
        })
    }

    async fn get_address_transactions(
        &self,
        chain_id: &str,
        address: &str,
        start_height: i64,
        end_height: i64,
    ) -> GatewayResult<HeightPaginatedResponse<Transaction>> {
        let host = blockbook_host(chain_id)?;
        let url = format!("{host}/api/v2/address/{address}");
        let query = [
            ("details", "txs"),
            ("pageSize", "50"),
            ("to", &end_height.to_string()),
            ("from", &start_height.to_string()),
        ];
        let query: Vec<(&str, &str)> = query.iter().map(|(k, v)| (*k, *v)).collect();

        let body: AddressResponse = self.gate.run(self.http.get_json(&url, &query)).await?;

        let mut contents = Vec::with_capacity(body.transactions.len());
        let mut last_block_height = start_height;
        for (i, tx) in body.transactions.iter().enumerate() {
            contents.push(to_transaction(chain_id, tx, i as i64)?);
            last_block_height = tx.block_height;
        }

        if body.txs <= body.items_on_page {
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

fn to_transaction(chain_id: &str, tx: &TxResponse, position: i64) -> GatewayResult<Transaction> {
    let transaction_id = format!("{chain_id}:{}", tx.txid);
    let mut transfers = Vec::with_capacity(tx.vin.len() + tx.outputs.len());
    let mut index = 0u32;
    for input in &tx.vin {
        transfers.push(Transfer {
            transfer_id: format!("{transaction_id}:{index}"),
            blockchain_id: chain_id.to_string(),
            from_address: input.addresses.first().cloned().unwrap_or_default(),
            to_address: UNKNOWN_ADDRESS.to_string(),
            index,
            transaction_id: transaction_id.clone(),
            amount: Amount::new(gateway_core::native_currency_id(chain_id), input.value.clone()),
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
            amount: Amount::new(gateway_core::native_currency_id(chain_id), output.value.clone()),
            meta: HashMap::new(),
        });
        index += 1;
    }

    Ok(Transaction {
        transaction_id: transaction_id.clone(),
        identifier: tx.txid.clone(),
        hash: tx.txid.clone(),
        blockchain_id: chain_id.to_string(),
        timestamp: timefmt::from_unix_seconds(tx.block_time)?,
        embedded: EmbeddedTransfers { transfers },
        fee: Amount::new(gateway_core::native_currency_id(chain_id), tx.fees.clone()),
        confirmations: tx.confirmations.max(0),
        size: (tx.hex.len() / 2) as i64,
        index: position,
        block_hash: tx.block_hash.clone(),
        block_height: tx.block_height,
        status: TransactionStatus::Confirmed,
        meta: HashMap::new(),
        raw: Some(tx.hex.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_chain_is_rejected() {
        assert!(matches!(
            blockbook_host("ripple-mainnet"),
            Err(GatewayError::UnsupportedChain(_))
        ));
    }

    #[test]
    fn has_more_is_driven_by_txs_exceeding_page_size() {
        let under = AddressResponse {
            transactions: vec![],
            txs: 10,
            items_on_page: 50,
        };
        assert!(under.txs <= under.items_on_page);

        let over = AddressResponse {
            transactions: vec![],
            txs: 120,
            items_on_page: 50,
        };
        assert!(over.txs > over.items_on_page);
    }

    #[test]
    fn transfer_assembly_reads_outputs_field_not_vout() {
        let tx = TxResponse {
            txid: "abc".into(),
            vin: vec![VinResponse {
                addresses: vec!["in1".into()],
                value: "100".into(),
            }],
            outputs: vec![VoutResponse {
                addresses: vec!["out1".into()],
                value: "90".into(),
            }],
            block_time: 1_617_280_496,
            fees: "10".into(),
            confirmations: 2,
            hex: "abcd".into(),
            block_hash: "blk".into(),
            block_height: 50,
        };
        let transaction = to_transaction("bitcoin-mainnet", &tx, 0).unwrap();
        assert!(transaction.is_well_formed());
        assert_eq!(transaction.embedded.transfers.len(), 2);
        assert_eq!(transaction.embedded.transfers[1].to_address, "out1");
    }
}
