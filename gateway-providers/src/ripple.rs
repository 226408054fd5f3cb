//! Ripple adapter against `data.ripple.com/v2`.
//!
//! Ripple's fee model is not tiered -- a constant single estimate is
//! returned. `confirmations` needs the chain tip, which this upstream's
//! per-address history endpoint doesn't return; the adapter keeps the most
//! recently observed ledger index as instance state (set whenever
//! [`get_blockchain_data`](ChainProvider::get_blockchain_data) runs) rather
//! than as a process-global, so two provider instances never share it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;

use gateway_core::{
    lookup_chain, Amount, Blockchain, ChainProvider, EmbeddedTransfers, FeeEstimate, GatewayError,
    GatewayResult, HeightPaginatedResponse, Transaction, TransactionStatus, Transfer,
    FEE_SINK_ADDRESS,
};

use crate::http::{Gate, RetryingHttpClient};
use crate::timefmt;

const BASE_URL: &str = "https://data.ripple.com/v2";
const CHAIN_ID: &str = "ripple-mainnet";
const FIXED_FEE_DROPS: &str = "10";
const FIXED_FEE_CONFIRMATION_MS: i64 = 4000;

#[derive(Debug, Deserialize)]
struct LedgersResponse {
    ledger: LedgerInfo,
}

#[derive(Debug, Deserialize)]
struct LedgerInfo {
    ledger_index: i64,
    ledger_hash: String,
}

#[derive(Debug, Deserialize)]
struct AccountTransactionsResponse {
    #[serde(default)]
    transactions: Vec<TxEnvelope>,
}

#[derive(Debug, Deserialize)]
struct TxEnvelope {
    hash: String,
    date: String,
    ledger_index: i64,
    tx: TxPayload,
}

#[derive(Debug, Deserialize)]
struct TxPayload {
    #[serde(rename = "Fee")]
    fee: String,
    #[serde(rename = "Account")]
    account: String,
    #[serde(rename = "Destination")]
    destination: String,
    #[serde(rename = "Amount")]
    amount: String,
    #[serde(rename = "DestinationTag", default)]
    destination_tag: Option<i64>,
}

/// Reads `data.ripple.com/v2`. Tracks the last ledger index it observed so
/// that transaction confirmations can be derived without a second tip call
/// per address query.
pub struct RippleProvider {
    http: RetryingHttpClient,
    gate: Gate,
    last_ledger_index: AtomicI64,
}

impl Default for RippleProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RippleProvider {
    /// Construct a provider with no observed ledger yet (confirmations will
    /// read as `0 - block_height`, clamped to zero, until the first
    /// `get_blockchain_data` call).
    pub fn new() -> Self {
        Self {
            http: RetryingHttpClient::new(),
            gate: Gate::new(Some(10)),
            last_ledger_index: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl ChainProvider for RippleProvider {
    async fn get_blockchain_data(&self, chain_id: &str) -> GatewayResult<Blockchain> {
        if chain_id != CHAIN_ID {
            return Err(GatewayError::UnsupportedChain(chain_id.to_string()));
        }
        let entry = lookup_chain(chain_id)
            .ok_or_else(|| GatewayError::UnsupportedChain(chain_id.to_string()))?;

        let url = format!("{BASE_URL}/ledgers");
        let body: LedgersResponse = self.gate.run(self.http.get_json(&url, &[])).await?;
        self.last_ledger_index
            .store(body.ledger.ledger_index, Ordering::SeqCst);

        let currency_id = gateway_core::native_currency_id(chain_id);
        Ok(Blockchain {
            name: entry.name.to_string(),
            id: entry.id.to_string(),
            is_mainnet: entry.is_mainnet,
            network: entry.network.to_string(),
            confirmations_until_final: entry.confirmations_until_final,
            native_currency_id: entry.native_currency_id(),
            fee_estimates: vec![FeeEstimate {
                fee: Amount::new(currency_id, FIXED_FEE_DROPS),
                tier: "0m".to_string(),
                estimated_confirmation_in: FIXED_FEE_CONFIRMATION_MS,
            }],
            fee_estimates_timestamp: timefmt::now_iso_millis(),
            block_height: body.ledger.ledger_index,
            verified_height: body.ledger.ledger_index,
            verified_block_hash: body.ledger.ledger_hash,
        })
    }

    async fn get_address_transactions(
        &self,
        chain_id: &str,
        address: &str,
        _start_height: i64,
        _end_height: i64,
    ) -> GatewayResult<HeightPaginatedResponse<Transaction>> {
        if chain_id != CHAIN_ID {
            return Err(GatewayError::UnsupportedChain(chain_id.to_string()));
        }
        let url = format!("{BASE_URL}/accounts/{address}/transactions");
        let query = [("type", "Payment"), ("descending", "false"), ("limit", "10000")];
        let body: AccountTransactionsResponse =
            self.gate.run(self.http.get_json(&url, &query)).await?;

        let last_ledger_index = self.last_ledger_index.load(Ordering::SeqCst);
        let mut contents = Vec::with_capacity(body.transactions.len());
        for (i, tx) in body.transactions.iter().enumerate() {
            contents.push(to_transaction(chain_id, tx, i as i64, last_ledger_index)?);
        }
        Ok(HeightPaginatedResponse::done(contents))
    }
}

fn to_transaction(
    chain_id: &str,
    tx: &TxEnvelope,
    position: i64,
    last_ledger_index: i64,
) -> GatewayResult<Transaction> {
    let transaction_id = format!("{chain_id}:{}", tx.hash);
    let currency_id = gateway_core::native_currency_id(chain_id);
    let fee = Amount::new(currency_id.clone(), tx.tx.fee.clone());

    let transfers = vec![
        Transfer {
            transfer_id: format!("{transaction_id}:0"),
            blockchain_id: chain_id.to_string(),
            from_address: tx.tx.account.clone(),
            to_address: FEE_SINK_ADDRESS.to_string(),
            index: 0,
            transaction_id: transaction_id.clone(),
            amount: fee.clone(),
            meta: HashMap::new(),
        },
        Transfer {
            transfer_id: format!("{transaction_id}:1"),
            blockchain_id: chain_id.to_string(),
            from_address: tx.tx.account.clone(),
            to_address: tx.tx.destination.clone(),
            index: 1,
            transaction_id: transaction_id.clone(),
            amount: Amount::new(currency_id, tx.tx.amount.clone()),
            meta: HashMap::new(),
        },
    ];

    let mut meta = HashMap::new();
    meta.insert(
        "DestinationTag".to_string(),
        tx.tx.destination_tag.unwrap_or(0).to_string(),
    );

    Ok(Transaction {
        transaction_id: transaction_id.clone(),
        identifier: tx.hash.clone(),
        hash: tx.hash.clone(),
        blockchain_id: chain_id.to_string(),
        timestamp: timefmt::parse_rfc3339(&tx.date)?,
        embedded: EmbeddedTransfers { transfers },
        fee,
        confirmations: (last_ledger_index - tx.ledger_index).max(0),
        size: 1,
        index: position,
        block_hash: String::new(),
        block_height: tx.ledger_index,
        status: TransactionStatus::Confirmed,
        meta,
        raw: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> TxEnvelope {
        TxEnvelope {
            hash: "abc".into(),
            date: "2021-04-01T12:34:56Z".into(),
            ledger_index: 100,
            tx: TxPayload {
                fee: "10".into(),
                account: "rAccount".into(),
                destination: "rDestination".into(),
                amount: "500000".into(),
                destination_tag: Some(42),
            },
        }
    }

    #[test]
    fn emits_fee_sink_then_value_transfer() {
        let transaction = to_transaction("ripple-mainnet", &sample_tx(), 0, 110).unwrap();
        assert!(transaction.is_well_formed());
        assert_eq!(transaction.embedded.transfers.len(), 2);
        assert_eq!(transaction.embedded.transfers[0].to_address, FEE_SINK_ADDRESS);
        assert_eq!(transaction.embedded.transfers[1].to_address, "rDestination");
        assert_eq!(transaction.confirmations, 10);
        assert_eq!(transaction.meta.get("DestinationTag").unwrap(), "42");
    }

    #[test]
    fn confirmations_never_go_negative_before_tip_is_known() {
        let transaction = to_transaction("ripple-mainnet", &sample_tx(), 0, 0).unwrap();
        assert_eq!(transaction.confirmations, 0);
    }
}
