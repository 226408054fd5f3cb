//! BlockChair chain-data adapter, covering the widest chain set of the three
//! UTXO providers (Bitcoin mainnet/testnet, Bitcoin Cash, Litecoin, Dogecoin).
//!
//! Address history is a two-phase fetch: the dashboard endpoint gives a
//! lightweight transaction summary per address, then each transaction's full
//! decoded form is fetched individually. Since a confirmed transaction never
//! changes shape, that per-transaction fetch is memoized under a long TTL
//! keyed by `(chain_id, hash)`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tracing::warn;

use gateway_core::{
    lookup_chain, Amount, Blockchain, ChainProvider, EmbeddedTransfers, FeeProvider, GatewayError,
    GatewayResult, HeightPaginatedResponse, Transaction, TransactionStatus, Transfer,
};

use crate::http::{Gate, RetryingHttpClient};
use crate::timefmt;

const BASE_URL: &str = "https://api.blockchair.com";
const TRANSACTION_CACHE_TTL: Duration = Duration::from_secs(365 * 24 * 3600);
const TRANSACTION_CACHE_CAPACITY: u64 = 100_000;

fn blockchair_path(chain_id: &str) -> GatewayResult<&'static str> {
    Ok(match chain_id {
        "bitcoin-mainnet" => "bitcoin",
        "bitcoin-testnet" => "bitcoin/testnet",
        "bitcoincash-mainnet" => "bitcoin-cash",
        "litecoin-mainnet" => "litecoin",
        "dogecoin-mainnet" => "dogecoin",
        other => return Err(GatewayError::UnsupportedChain(other.to_string())),
    })
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct StatsData {
    best_block_height: i64,
    best_block_hash: String,
}

#[derive(Debug, Deserialize)]
struct DashboardData {
    #[serde(flatten)]
    addresses: HashMap<String, AddressDashboard>,
}

#[derive(Debug, Deserialize)]
struct AddressDashboard {
    #[serde(default)]
    transactions: Vec<TxSummary>,
}

#[derive(Debug, Clone, Deserialize)]
struct TxSummary {
    hash: String,
    time: String,
    block_id: i64,
    balance_change: i64,
    #[serde(default)]
    fee: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawTransactionEntry {
    raw_transaction: String,
    decoded_raw_transaction: DecodedRawTransaction,
}

#[derive(Debug, Deserialize)]
struct DecodedRawTransaction {
    txid: String,
    hash: String,
    size: i64,
    #[serde(default)]
    vin: Vec<DecodedVin>,
    #[serde(default)]
    vout: Vec<DecodedVout>,
}

#[derive(Debug, Deserialize)]
struct DecodedVin {
    txid: String,
}

#[derive(Debug, Deserialize)]
struct DecodedVout {
    value: f64,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: ScriptPubKey,
}

#[derive(Debug, Deserialize)]
struct ScriptPubKey {
    #[serde(default)]
    addresses: Vec<String>,
}

/// Reads BlockChair's address-dashboard and raw-transaction endpoints. Holds
/// a per-instance transaction cache (keyed by `chain_id:hash`) with an
/// effectively-permanent TTL, since confirmed transactions never change.
pub struct BlockChairProvider {
    http: RetryingHttpClient,
    gate: Gate,
    token: Option<String>,
    fees: Arc<dyn FeeProvider>,
    tx_cache: moka::future::Cache<String, Transaction>,
}

impl BlockChairProvider {
    /// Construct a provider reading `BLOCKCHAIR_TOKEN` from the environment,
    /// warning (not failing) when absent since BlockChair serves anonymous
    /// traffic at a much lower quota.
    pub fn new(fees: Arc<dyn FeeProvider>) -> Self {
        let token = std::env::var("BLOCKCHAIR_TOKEN").ok().filter(|t| !t.is_empty());
        if token.is_none() {
            warn!("BLOCKCHAIR_TOKEN not set in environment; requests will be heavily rate-limited");
        }
        Self {
            http: RetryingHttpClient::new(),
            gate: Gate::new(Some(12)),
            token,
            fees,
            tx_cache: moka::future::Cache::builder()
                .time_to_live(TRANSACTION_CACHE_TTL)
                .max_capacity(TRANSACTION_CACHE_CAPACITY)
                .build(),
        }
    }

    fn query<'a>(&'a self, extra: &'a [(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut out: Vec<(&str, &str)> = extra.to_vec();
        if let Some(token) = &self.token {
            out.push(("key", token.as_str()));
        }
        out
    }
}

#[async_trait]
impl ChainProvider for BlockChairProvider {
    async fn get_blockchain_data(&self, chain_id: &str) -> GatewayResult<Blockchain> {
        let path = blockchair_path(chain_id)?;
        let entry = lookup_chain(chain_id)
            .ok_or_else(|| GatewayError::UnsupportedChain(chain_id.to_string()))?;

        let url = format!("{BASE_URL}/{path}/stats");
        let query = self.query(&[]);
        let stats: Envelope<StatsData> = self.gate.run(self.http.get_json(&url, &query)).await?;
        let stats = stats
            .data
            .ok_or_else(|| GatewayError::UpstreamDecodeError("missing stats data".into()))?;
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
            block_height: stats.best_block_height,
            verified_height: stats.best_block_height,
            verified_block_hash: stats.best_block_hash,
        })
    }

    async fn get_address_transactions(
        &self,
        chain_id: &str,
        address: &str,
        _start_height: i64,
        _end_height: i64,
    ) -> GatewayResult<HeightPaginatedResponse<Transaction>> {
        let path = blockchair_path(chain_id)?;
        let url = format!("{BASE_URL}/{path}/dashboards/address/{address}");
        let query = self.query(&[("limit", "10000"), ("transaction_details", "true")]);

        let dashboard: Envelope<DashboardData> =
            self.gate.run(self.http.get_json(&url, &query)).await?;
        let summaries = dashboard
            .data
            .and_then(|mut d| d.addresses.remove(address))
            .map(|a| a.transactions)
            .unwrap_or_default();

        let best_height = self.best_block_height(chain_id).await?;

        let mut contents = Vec::with_capacity(summaries.len());
        for (idx, summary) in summaries.iter().enumerate() {
            contents.push(
                self.get_transaction(chain_id, summary, idx as i64, best_height)
                    .await?,
            );
        }

        Ok(HeightPaginatedResponse::done(contents))
    }
}

impl BlockChairProvider {
    async fn best_block_height(&self, chain_id: &str) -> GatewayResult<i64> {
        let path = blockchair_path(chain_id)?;
        let url = format!("{BASE_URL}/{path}/stats");
        let query = self.query(&[]);
        let stats: Envelope<StatsData> = self.gate.run(self.http.get_json(&url, &query)).await?;
        Ok(stats
            .data
            .ok_or_else(|| GatewayError::UpstreamDecodeError("missing stats data".into()))?
            .best_block_height)
    }

    async fn get_transaction(
        &self,
        chain_id: &str,
        summary: &TxSummary,
        position: i64,
        best_height: i64,
    ) -> GatewayResult<Transaction> {
        let cache_key = format!("{chain_id}:{}", summary.hash);
        if let Some(cached) = self.tx_cache.get(&cache_key).await {
            return Ok(cached);
        }

        let path = blockchair_path(chain_id)?;
        let url = format!("{BASE_URL}/{path}/raw/transaction/{}", summary.hash);
        let query = self.query(&[]);
        let body: Envelope<HashMap<String, RawTransactionEntry>> =
            self.gate.run(self.http.get_json(&url, &query)).await?;
        let entry = body
            .data
            .and_then(|mut m| m.remove(&summary.hash))
            .ok_or_else(|| {
                GatewayError::UpstreamDecodeError(format!("no raw transaction for {}", summary.hash))
            })?;

        let transaction = to_transaction(chain_id, summary, &entry, position, best_height)?;
        self.tx_cache.insert(cache_key, transaction.clone()).await;
        Ok(transaction)
    }
}

fn to_transaction(
    chain_id: &str,
    summary: &TxSummary,
    entry: &RawTransactionEntry,
    position: i64,
    best_height: i64,
) -> GatewayResult<Transaction> {
    let decoded = &entry.decoded_raw_transaction;
    let transaction_id = format!("{chain_id}:{}", decoded.txid);
    let currency_id = gateway_core::native_currency_id(chain_id);

    let mut transfers = Vec::with_capacity(decoded.vin.len() + decoded.vout.len());
    let mut index = 0u32;
    for _vin in &decoded.vin {
        transfers.push(Transfer {
            transfer_id: format!("{transaction_id}:{index}"),
            blockchain_id: chain_id.to_string(),
            from_address: String::new(),
            to_address: gateway_core::UNKNOWN_ADDRESS.to_string(),
            index,
            transaction_id: transaction_id.clone(),
            amount: Amount::from_u128(currency_id.clone(), 0),
            meta: HashMap::new(),
        });
        index += 1;
    }
    for vout in &decoded.vout {
        transfers.push(Transfer {
            transfer_id: format!("{transaction_id}:{index}"),
            blockchain_id: chain_id.to_string(),
            from_address: gateway_core::UNKNOWN_ADDRESS.to_string(),
            to_address: vout.script_pub_key.addresses.first().cloned().unwrap_or_default(),
            index,
            transaction_id: transaction_id.clone(),
            amount: Amount::from_u128(currency_id.clone(), sats(vout.value)),
            meta: HashMap::new(),
        });
        index += 1;
    }

    let raw = hex::decode(&entry.raw_transaction)
        .map_err(|e| GatewayError::UpstreamDecodeError(format!("bad raw_transaction hex: {e}")))?;

    let timestamp = parse_blockchair_time(&summary.time)?;

    Ok(Transaction {
        transaction_id: transaction_id.clone(),
        identifier: decoded.txid.clone(),
        hash: decoded.hash.clone(),
        blockchain_id: chain_id.to_string(),
        timestamp,
        embedded: EmbeddedTransfers { transfers },
        fee: Amount::from_u128(currency_id, summary.fee.unwrap_or(0).max(0) as u128),
        confirmations: (best_height - summary.block_id).max(0),
        size: decoded.size,
        index: position,
        block_hash: String::new(),
        block_height: summary.block_id,
        status: TransactionStatus::Confirmed,
        meta: HashMap::new(),
        raw: Some(base64::engine::general_purpose::STANDARD.encode(raw)),
    })
}

fn sats(btc_value: f64) -> u128 {
    (btc_value.abs() * 1e8).round() as u128
}

/// BlockChair's dashboard summaries carry timestamps as
/// `"YYYY-MM-DD HH:MM:SS"` UTC, not RFC 3339.
fn parse_blockchair_time(raw: &str) -> GatewayResult<String> {
    let rfc3339 = raw.replacen(' ', "T", 1) + "Z";
    timefmt::parse_rfc3339(&rfc3339)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_chain_is_rejected() {
        assert!(matches!(
            blockchair_path("tezos-mainnet"),
            Err(GatewayError::UnsupportedChain(_))
        ));
    }

    #[test]
    fn blockchair_space_separated_time_parses() {
        assert_eq!(
            parse_blockchair_time("2021-04-01 12:34:56").unwrap(),
            "2021-04-01T12:34:56.000+00:00"
        );
    }

    #[test]
    fn vin_then_vout_assembly_produces_dense_indices() {
        let decoded = DecodedRawTransaction {
            txid: "abc".into(),
            hash: "abc".into(),
            size: 250,
            vin: vec![DecodedVin { txid: "prev".into() }],
            vout: vec![DecodedVout {
                value: 0.9,
                script_pub_key: ScriptPubKey {
                    addresses: vec!["addr1".into()],
                },
            }],
        };
        let entry = RawTransactionEntry {
            raw_transaction: "deadbeef".into(),
            decoded_raw_transaction: decoded,
        };
        let summary = TxSummary {
            hash: "abc".into(),
            time: "2021-04-01 12:34:56".into(),
            block_id: 100,
            balance_change: -90_000_000,
            fee: Some(1000),
        };
        let transaction = to_transaction("bitcoin-mainnet", &summary, &entry, 0, 110).unwrap();
        assert!(transaction.is_well_formed());
        assert_eq!(transaction.embedded.transfers.len(), 2);
        assert_eq!(transaction.embedded.transfers[0].to_address, "unknown");
        assert_eq!(transaction.embedded.transfers[1].to_address, "addr1");
        assert_eq!(transaction.embedded.transfers[1].amount.amount, "90000000");
        assert_eq!(transaction.confirmations, 10);
    }
}
