//! Etherscan adapter for Ethereum mainnet: both the [`ChainProvider`] (tip +
//! address history) and [`FeeProvider`] (gas-oracle based fee tiers)
//! capabilities live here, since Etherscan is the sole upstream for both on
//! this chain.
//!
//! Address history collapses three independent Etherscan feeds -- normal
//! transactions, ERC-20 token transfers, and internal transfers -- into one
//! canonical transaction per hash, in the merge order described in the
//! design notes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use gateway_core::{
    lookup_chain, Amount, Blockchain, ChainProvider, EmbeddedTransfers, FeeEstimate, FeeProvider,
    GatewayError, GatewayResult, HeightPaginatedResponse, Transaction, TransactionStatus, Transfer,
    FEE_SINK_ADDRESS,
};

use crate::http::{Gate, RetryingHttpClient};
use crate::timefmt;

const BASE_URL: &str = "https://api.etherscan.io/api";
const CHAIN_ID: &str = "ethereum-mainnet";
const FEE_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct EtherscanEnvelope {
    result: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct NormalTx {
    hash: String,
    #[serde(default)]
    #[serde(rename = "isError")]
    is_error: Option<String>,
    #[serde(rename = "timeStamp")]
    time_stamp: String,
    #[serde(rename = "gasUsed")]
    gas_used: String,
    #[serde(rename = "gasPrice")]
    gas_price: String,
    #[serde(rename = "blockHash")]
    block_hash: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
    confirmations: String,
    gas: String,
    nonce: String,
    #[serde(default)]
    value: String,
    from: String,
    to: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenTx {
    hash: String,
    #[serde(rename = "timeStamp")]
    time_stamp: String,
    #[serde(rename = "gasUsed")]
    gas_used: String,
    #[serde(rename = "gasPrice")]
    gas_price: String,
    #[serde(rename = "blockHash")]
    block_hash: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
    confirmations: String,
    gas: String,
    nonce: String,
    from: String,
    to: String,
    value: String,
    #[serde(rename = "contractAddress")]
    contract_address: String,
}

#[derive(Debug, Clone, Deserialize)]
struct InternalTx {
    hash: String,
    #[serde(rename = "timeStamp")]
    time_stamp: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
    from: String,
    to: String,
    value: String,
}

#[derive(Default)]
struct TxBucket {
    tx: Option<NormalTx>,
    tok: Vec<TokenTx>,
    int: Vec<InternalTx>,
}

/// Reads Etherscan's `api.etherscan.io/api` REST surface. Holds its own
/// rate-limit gate (`ETHERSCAN_RATE_LIMIT`, default 3) and a 60-second gas
/// oracle cache.
pub struct EtherscanProvider {
    http: RetryingHttpClient,
    gate: Gate,
    token: String,
    fee_cache: moka::future::Cache<String, Vec<FeeEstimate>>,
}

impl EtherscanProvider {
    /// Construct a provider reading `ETHERSCAN_TOKEN` and
    /// `ETHERSCAN_RATE_LIMIT` from the environment.
    pub fn new() -> Self {
        let token = std::env::var("ETHERSCAN_TOKEN").unwrap_or_default();
        if token.is_empty() {
            warn!("ETHERSCAN_TOKEN not set in environment");
        }
        let rate_limit: usize = std::env::var("ETHERSCAN_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);
        Self {
            http: RetryingHttpClient::new(),
            gate: Gate::new(Some(rate_limit)),
            token,
            fee_cache: moka::future::Cache::builder()
                .time_to_live(FEE_CACHE_TTL)
                .max_capacity(8)
                .build(),
        }
    }

    async fn get(&self, params: &[(&str, &str)]) -> GatewayResult<Value> {
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("apikey", self.token.as_str()));
        let envelope: EtherscanEnvelope =
            self.gate.run(self.http.get_json(BASE_URL, &query)).await?;
        Ok(envelope.result)
    }

    async fn get_typed<T: serde::de::DeserializeOwned>(
        &self,
        params: &[(&str, &str)],
    ) -> GatewayResult<Vec<T>> {
        let result = self.get(params).await?;
        match result {
            Value::Array(_) => serde_json::from_value(result)
                .map_err(|e| GatewayError::UpstreamDecodeError(e.to_string())),
            _ => Ok(Vec::new()),
        }
    }

    async fn fee_duration(&self, wei: u128) -> GatewayResult<i64> {
        let wei_str = wei.to_string();
        let result = self
            .get(&[
                ("module", "gastracker"),
                ("action", "gasestimate"),
                ("gasprice", &wei_str),
            ])
            .await?;
        let secs: i64 = match result {
            Value::String(s) => s.parse().unwrap_or(0),
            Value::Number(n) => n.as_i64().unwrap_or(0),
            _ => 0,
        };
        Ok(secs * 1000)
    }
}

impl Default for EtherscanProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainProvider for EtherscanProvider {
    async fn get_blockchain_data(&self, chain_id: &str) -> GatewayResult<Blockchain> {
        if chain_id != CHAIN_ID {
            return Err(GatewayError::UnsupportedChain(chain_id.to_string()));
        }
        let entry = lookup_chain(chain_id)
            .ok_or_else(|| GatewayError::UnsupportedChain(chain_id.to_string()))?;

        let block_num_hex = self
            .get(&[("module", "proxy"), ("action", "eth_blockNumber")])
            .await?;
        let block_num_hex = block_num_hex
            .as_str()
            .ok_or_else(|| GatewayError::UpstreamDecodeError("eth_blockNumber not a string".into()))?
            .to_string();

        let block = self
            .get(&[
                ("module", "proxy"),
                ("action", "eth_getBlockByNumber"),
                ("tag", &block_num_hex),
                ("boolean", "true"),
            ])
            .await?;
        let number = hex_field(&block, "number")?;
        let hash = str_field(&block, "hash")?;

        let fees = self.get_fees(chain_id).await?;

        Ok(Blockchain {
            name: entry.name.to_string(),
            id: entry.id.to_string(),
            is_mainnet: entry.is_mainnet,
            network: entry.network.to_string(),
            confirmations_until_final: entry.confirmations_until_final,
            native_currency_id: entry.native_currency_id(),
            fee_estimates: fees,
            fee_estimates_timestamp: timefmt::now_iso_millis(),
            block_height: number,
            verified_height: number,
            verified_block_hash: hash,
        })
    }

    async fn get_address_transactions(
        &self,
        chain_id: &str,
        address: &str,
        start_height: i64,
        end_height: i64,
    ) -> GatewayResult<HeightPaginatedResponse<Transaction>> {
        if chain_id != CHAIN_ID {
            return Err(GatewayError::UnsupportedChain(chain_id.to_string()));
        }
        let start = start_height.to_string();
        let end = end_height.to_string();
        let base_params = [("address", address), ("startblock", start.as_str()), ("endblock", end.as_str())];

        let mut txlist_params = vec![("module", "account"), ("action", "txlist")];
        txlist_params.extend_from_slice(&base_params);
        let mut tokentx_params = vec![("module", "account"), ("action", "tokentx")];
        tokentx_params.extend_from_slice(&base_params);
        let mut internal_params = vec![("module", "account"), ("action", "txlistinternal")];
        internal_params.extend_from_slice(&base_params);

        let (normal, token, internal): (
            GatewayResult<Vec<NormalTx>>,
            GatewayResult<Vec<TokenTx>>,
            GatewayResult<Vec<InternalTx>>,
        ) = futures::join!(
            self.get_typed(&txlist_params),
            self.get_typed(&tokentx_params),
            self.get_typed(&internal_params),
        );
        let normal = normal?;
        let token = token?;
        let internal = internal?;

        let mut order: Vec<String> = Vec::new();
        let mut buckets: HashMap<String, TxBucket> = HashMap::new();

        for tx in normal {
            let bucket = buckets.entry(tx.hash.clone()).or_insert_with(|| {
                order.push(tx.hash.clone());
                TxBucket::default()
            });
            bucket.tx = Some(tx);
        }
        for tx in token {
            let bucket = buckets.entry(tx.hash.clone()).or_insert_with(|| {
                order.push(tx.hash.clone());
                TxBucket::default()
            });
            bucket.tok.push(tx);
        }
        for tx in internal {
            let bucket = buckets.entry(tx.hash.clone()).or_insert_with(|| {
                order.push(tx.hash.clone());
                TxBucket::default()
            });
            bucket.int.push(tx);
        }

        let mut block_indexes: HashMap<String, i64> = HashMap::new();
        let mut contents = Vec::with_capacity(order.len());
        for hash in &order {
            let bucket = buckets.remove(hash).expect("every hash in order has a bucket");
            contents.push(assemble_transaction(chain_id, hash, bucket, &mut block_indexes)?);
        }

        Ok(HeightPaginatedResponse::done(contents))
    }
}

#[async_trait]
impl FeeProvider for EtherscanProvider {
    async fn get_fees(&self, chain_id: &str) -> GatewayResult<Vec<FeeEstimate>> {
        if let Some(cached) = self.fee_cache.get(chain_id).await {
            return Ok(cached);
        }

        let oracle = self
            .get(&[("module", "gastracker"), ("action", "gasoracle")])
            .await?;

        let mut wei_by_tier = Vec::with_capacity(3);
        for price_key in ["SafeGasPrice", "ProposeGasPrice", "FastGasPrice"] {
            let gwei: u128 = oracle
                .get(price_key)
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    GatewayError::UpstreamDecodeError(format!("missing {price_key} in gas oracle"))
                })?;
            wei_by_tier.push(gwei * 1_000_000_000);
        }

        let (safe_duration, propose_duration, fast_duration) = futures::join!(
            self.fee_duration(wei_by_tier[0]),
            self.fee_duration(wei_by_tier[1]),
            self.fee_duration(wei_by_tier[2]),
        );
        let durations_ms = [safe_duration?, propose_duration?, fast_duration?];

        let fees: Vec<FeeEstimate> = wei_by_tier
            .into_iter()
            .zip(durations_ms)
            .map(|(wei, duration_ms)| FeeEstimate {
                fee: Amount::from_u128(gateway_core::native_currency_id(chain_id), wei),
                tier: format!("{}m", duration_ms / 1000 / 60),
                estimated_confirmation_in: duration_ms,
            })
            .collect();

        self.fee_cache.insert(chain_id.to_string(), fees.clone()).await;
        Ok(fees)
    }
}

fn assemble_transaction(
    chain_id: &str,
    hash: &str,
    bucket: TxBucket,
    block_indexes: &mut HashMap<String, i64>,
) -> GatewayResult<Transaction> {
    let transaction_id = format!("{chain_id}:{hash}");
    let native_cur_id = gateway_core::native_currency_id(chain_id);
    let mut transfers = Vec::new();
    let mut counter = 0u32;

    let mut timestamp: Option<String> = None;
    let mut block_hash: Option<String> = None;
    let mut block_height: Option<i64> = None;
    let mut confirmations: Option<i64> = None;
    let mut meta: HashMap<String, String> = HashMap::new();
    let mut fee: Option<Amount> = None;
    let mut status = TransactionStatus::Confirmed;
    let mut gas_used_for_size: i64 = 0;

    if let Some(tx) = &bucket.tx {
        if tx.is_error.as_deref() == Some("1") {
            status = TransactionStatus::Failed;
        }
        timestamp = Some(timefmt::from_unix_seconds(parse_i64(&tx.time_stamp)?)?);
        let gas_used = parse_u128(&tx.gas_used)?;
        let gas_price = parse_u128(&tx.gas_price)?;
        gas_used_for_size = gas_used as i64;
        let total_fee = gas_used * gas_price;
        block_hash = Some(tx.block_hash.clone());
        block_height = Some(parse_i64(&tx.block_number)?);
        confirmations = Some(parse_i64(&tx.confirmations)?);
        fee = Some(Amount::from_u128(native_cur_id.clone(), total_fee));
        meta.insert("gasLimit".to_string(), format!("0x{:x}", parse_u128(&tx.gas)?));
        meta.insert("gasUsed".to_string(), format!("0x{gas_used:x}"));
        meta.insert("gasPrice".to_string(), format!("0x{gas_price:x}"));
        meta.insert("nonce".to_string(), format!("0x{:x}", parse_u128(&tx.nonce)?));

        transfers.push(Transfer {
            transfer_id: format!("{chain_id}:{hash}:{counter}"),
            blockchain_id: chain_id.to_string(),
            from_address: tx.from.clone(),
            to_address: FEE_SINK_ADDRESS.to_string(),
            index: counter,
            transaction_id: transaction_id.clone(),
            amount: fee.clone().expect("just set"),
            meta: HashMap::new(),
        });
        counter += 1;

        if tx.value != "0" {
            transfers.push(Transfer {
                transfer_id: format!("{chain_id}:{hash}:{counter}"),
                blockchain_id: chain_id.to_string(),
                from_address: tx.from.clone(),
                to_address: tx.to.clone(),
                index: counter,
                transaction_id: transaction_id.clone(),
                amount: Amount::new(native_cur_id.clone(), tx.value.clone()),
                meta: HashMap::new(),
            });
            counter += 1;
        }
    }

    for tok_tx in &bucket.tok {
        if timestamp.is_none() {
            timestamp = Some(timefmt::from_unix_seconds(parse_i64(&tok_tx.time_stamp)?)?);
        }
        if fee.is_none() {
            let gas_used = parse_u128(&tok_tx.gas_used)?;
            let gas_price = parse_u128(&tok_tx.gas_price)?;
            gas_used_for_size = gas_used as i64;
            let total_fee = gas_used * gas_price;
            let amount = Amount::from_u128(native_cur_id.clone(), total_fee);
            transfers.push(Transfer {
                transfer_id: format!("{chain_id}:{hash}:{counter}"),
                blockchain_id: chain_id.to_string(),
                from_address: tok_tx.from.clone(),
                to_address: FEE_SINK_ADDRESS.to_string(),
                index: counter,
                transaction_id: transaction_id.clone(),
                amount: amount.clone(),
                meta: HashMap::new(),
            });
            counter += 1;
            fee = Some(amount);
        }
        if block_hash.is_none() {
            block_hash = Some(tok_tx.block_hash.clone());
        }
        if block_height.is_none() {
            block_height = Some(parse_i64(&tok_tx.block_number)?);
        }
        if confirmations.is_none() {
            confirmations = Some(parse_i64(&tok_tx.confirmations)?);
        }
        if meta.is_empty() {
            meta.insert("gasLimit".to_string(), format!("0x{:x}", parse_u128(&tok_tx.gas)?));
            meta.insert("gasUsed".to_string(), format!("0x{:x}", parse_u128(&tok_tx.gas_used)?));
            meta.insert("gasPrice".to_string(), format!("0x{:x}", parse_u128(&tok_tx.gas_price)?));
            meta.insert("nonce".to_string(), format!("0x{:x}", parse_u128(&tok_tx.nonce)?));
        }
        transfers.push(Transfer {
            transfer_id: format!("{chain_id}:{hash}:{counter}"),
            blockchain_id: chain_id.to_string(),
            from_address: tok_tx.from.clone(),
            to_address: tok_tx.to.clone(),
            index: counter,
            transaction_id: transaction_id.clone(),
            amount: Amount::new(format!("{chain_id}:{}", tok_tx.contract_address), tok_tx.value.clone()),
            meta: HashMap::new(),
        });
        counter += 1;
    }

    for int_tx in &bucket.int {
        if timestamp.is_none() {
            timestamp = Some(timefmt::from_unix_seconds(parse_i64(&int_tx.time_stamp)?)?);
        }
        if block_height.is_none() {
            block_height = Some(parse_i64(&int_tx.block_number)?);
        }
        if fee.is_none() {
            fee = Some(Amount::new(native_cur_id.clone(), "0"));
        }
        if confirmations.is_none() {
            confirmations = Some(0);
        }
        if block_hash.is_none() {
            block_hash = Some(String::new());
        }
        transfers.push(Transfer {
            transfer_id: format!("{chain_id}:{hash}:{counter}"),
            blockchain_id: chain_id.to_string(),
            from_address: int_tx.from.clone(),
            to_address: int_tx.to.clone(),
            index: counter,
            transaction_id: transaction_id.clone(),
            amount: Amount::new(native_cur_id.clone(), int_tx.value.clone()),
            meta: HashMap::new(),
        });
        counter += 1;
    }

    let block_hash = block_hash.unwrap_or_default();
    let index = block_indexes.entry(block_hash.clone()).or_insert(0);
    *index += 1;

    meta.insert("input".to_string(), "0x".to_string());

    Ok(Transaction {
        transaction_id: transaction_id.clone(),
        identifier: hash.to_string(),
        hash: hash.to_string(),
        blockchain_id: chain_id.to_string(),
        timestamp: timestamp
            .ok_or_else(|| GatewayError::UpstreamDecodeError(format!("no source data for {hash}")))?,
        embedded: EmbeddedTransfers { transfers },
        fee: fee.ok_or_else(|| GatewayError::UpstreamDecodeError(format!("no fee for {hash}")))?,
        confirmations: confirmations.unwrap_or(0).max(0),
        size: gas_used_for_size,
        index: *index,
        block_hash,
        block_height: block_height
            .ok_or_else(|| GatewayError::UpstreamDecodeError(format!("no block height for {hash}")))?,
        status,
        meta,
        raw: None,
    })
}

fn parse_i64(s: &str) -> GatewayResult<i64> {
    s.parse()
        .map_err(|_| GatewayError::UpstreamDecodeError(format!("not an integer: {s:?}")))
}

fn parse_u128(s: &str) -> GatewayResult<u128> {
    s.parse()
        .map_err(|_| GatewayError::UpstreamDecodeError(format!("not an integer: {s:?}")))
}

fn hex_field(value: &Value, field: &str) -> GatewayResult<i64> {
    let raw = str_field(value, field)?;
    let stripped = raw.strip_prefix("0x").unwrap_or(&raw);
    i64::from_str_radix(stripped, 16)
        .map_err(|e| GatewayError::UpstreamDecodeError(format!("bad hex field {field}: {e}")))
}

fn str_field(value: &Value, field: &str) -> GatewayResult<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GatewayError::UpstreamDecodeError(format!("missing field {field}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_normal(hash: &str, block_hash: &str) -> NormalTx {
        NormalTx {
            hash: hash.to_string(),
            is_error: Some("0".to_string()),
            time_stamp: "1617280496".to_string(),
            gas_used: "21000".to_string(),
            gas_price: "50000000000".to_string(),
            block_hash: block_hash.to_string(),
            block_number: "100".to_string(),
            confirmations: "10".to_string(),
            gas: "21000".to_string(),
            nonce: "5".to_string(),
            value: "1000000000000000000".to_string(),
            from: "0xfrom".to_string(),
            to: "0xto".to_string(),
        }
    }

    #[test]
    fn fee_then_value_transfer_order_for_a_normal_tx() {
        let mut buckets = HashMap::new();
        let mut indexes = HashMap::new();
        let normal = sample_normal("0xhash1", "0xblock1");
        let bucket = TxBucket {
            tx: Some(normal),
            tok: vec![],
            int: vec![],
        };
        buckets.insert("0xhash1".to_string(), bucket);
        let bucket = buckets.remove("0xhash1").unwrap();
        let transaction = assemble_transaction("ethereum-mainnet", "0xhash1", bucket, &mut indexes).unwrap();
        assert!(transaction.is_well_formed());
        assert_eq!(transaction.embedded.transfers.len(), 2);
        assert_eq!(transaction.embedded.transfers[0].to_address, FEE_SINK_ADDRESS);
        assert_eq!(transaction.embedded.transfers[1].to_address, "0xto");
        assert_eq!(transaction.status, TransactionStatus::Confirmed);
    }

    #[test]
    fn zero_value_normal_tx_emits_only_the_fee_transfer() {
        let mut buckets = HashMap::new();
        let mut indexes = HashMap::new();
        let mut normal = sample_normal("0xhash2", "0xblock1");
        normal.value = "0".to_string();
        let bucket = TxBucket {
            tx: Some(normal),
            tok: vec![],
            int: vec![],
        };
        buckets.insert("0xhash2".to_string(), bucket);
        let bucket = buckets.remove("0xhash2").unwrap();
        let transaction = assemble_transaction("ethereum-mainnet", "0xhash2", bucket, &mut indexes).unwrap();
        assert_eq!(transaction.embedded.transfers.len(), 1);
    }

    #[test]
    fn block_local_index_accumulates_across_calls() {
        let mut indexes = HashMap::new();
        let bucket1 = TxBucket {
            tx: Some(sample_normal("0xhash1", "0xblockA")),
            tok: vec![],
            int: vec![],
        };
        let bucket2 = TxBucket {
            tx: Some(sample_normal("0xhash2", "0xblockA")),
            tok: vec![],
            int: vec![],
        };
        let t1 = assemble_transaction("ethereum-mainnet", "0xhash1", bucket1, &mut indexes).unwrap();
        let t2 = assemble_transaction("ethereum-mainnet", "0xhash2", bucket2, &mut indexes).unwrap();
        assert_eq!(t1.index, 1);
        assert_eq!(t2.index, 2);
    }

    #[test]
    fn failed_status_is_read_from_is_error() {
        let mut buckets = HashMap::new();
        let mut indexes = HashMap::new();
        let mut normal = sample_normal("0xhash3", "0xblock1");
        normal.is_error = Some("1".to_string());
        let bucket = TxBucket {
            tx: Some(normal),
            tok: vec![],
            int: vec![],
        };
        buckets.insert("0xhash3".to_string(), bucket);
        let bucket = buckets.remove("0xhash3").unwrap();
        let transaction = assemble_transaction("ethereum-mainnet", "0xhash3", bucket, &mut indexes).unwrap();
        assert_eq!(transaction.status, TransactionStatus::Failed);
    }
}
