//! BitGo fee provider for the UTXO chains. Used as the fee capability for
//! BlockCypher, Blockbook, and BlockChair -- chain-data sourcing and fee
//! sourcing are orthogonal, so this is a standalone [`FeeProvider`], not
//! part of any [`crate::ChainProvider`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use gateway_core::{FeeEstimate, FeeProvider, GatewayError, GatewayResult};

use crate::http::RetryingHttpClient;

struct StaticConfig {
    fees: Vec<(&'static str, &'static str, i64)>,
}

struct DynamicConfig {
    url: &'static str,
    block_time_ms: i64,
}

enum ChainConfig {
    Static(StaticConfig),
    Dynamic(DynamicConfig),
}

fn config_for(chain_id: &str) -> Option<ChainConfig> {
    Some(match chain_id {
        "bitcoincash-mainnet" => ChainConfig::Dynamic(DynamicConfig {
            url: "https://www.bitgo.com/api/v2/bch/tx/fee",
            block_time_ms: 10 * 60 * 1000,
        }),
        "bitcoin-mainnet" => ChainConfig::Dynamic(DynamicConfig {
            url: "https://www.bitgo.com/api/v2/btc/tx/fee",
            block_time_ms: 10 * 60 * 1000,
        }),
        "bitcoin-testnet" => ChainConfig::Static(StaticConfig {
            fees: vec![("1", "1m", 60_000)],
        }),
        "litecoin-mainnet" => ChainConfig::Dynamic(DynamicConfig {
            url: "https://www.bitgo.com/api/v2/ltc/tx/fee",
            block_time_ms: 150_000,
        }),
        "dogecoin-mainnet" => ChainConfig::Static(StaticConfig {
            fees: vec![("600000", "1m", 60_000)],
        }),
        _ => return None,
    })
}

#[derive(Debug, Deserialize)]
struct BitgoFeeResponse {
    #[serde(default, rename = "feeByBlockTarget")]
    fee_by_block_target: Option<std::collections::BTreeMap<String, f64>>,
    #[serde(default)]
    fee_per_kb: Option<f64>,
    #[serde(default)]
    num_blocks: Option<i64>,
}

/// Fee provider backed by BitGo's `tx/fee` endpoint, with a 60-second
/// in-memory cache keyed by chain id. Static chains (Dogecoin mainnet,
/// Bitcoin testnet) bypass the cache entirely and return a hard-coded list.
pub struct BitgoFeeProvider {
    http: RetryingHttpClient,
    cache: moka::future::Cache<String, Vec<FeeEstimate>>,
}

impl Default for BitgoFeeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl BitgoFeeProvider {
    /// Construct a provider with a fresh 60-second fee cache.
    pub fn new() -> Self {
        Self {
            http: RetryingHttpClient::new(),
            cache: moka::future::Cache::builder()
                .time_to_live(Duration::from_secs(60))
                .max_capacity(64)
                .build(),
        }
    }
}

#[async_trait]
impl FeeProvider for BitgoFeeProvider {
    async fn get_fees(&self, chain_id: &str) -> GatewayResult<Vec<FeeEstimate>> {
        let config = config_for(chain_id)
            .ok_or_else(|| GatewayError::UnsupportedChain(chain_id.to_string()))?;

        let static_config = match config {
            ChainConfig::Static(s) => Some(s),
            ChainConfig::Dynamic(_) => None,
        };
        if let Some(s) = static_config {
            let currency_id = gateway_core::native_currency_id(chain_id);
            return Ok(s
                .fees
                .into_iter()
                .map(|(amount, tier, conf_ms)| FeeEstimate {
                    fee: gateway_core::Amount::new(currency_id.clone(), amount),
                    tier: tier.to_string(),
                    estimated_confirmation_in: conf_ms,
                })
                .collect());
        }

        let dynamic = match config_for(chain_id).expect("checked above") {
            ChainConfig::Dynamic(d) => d,
            ChainConfig::Static(_) => unreachable!(),
        };

        if let Some(cached) = self.cache.get(chain_id).await {
            return Ok(cached);
        }

        let body: BitgoFeeResponse = self.http.get_json(dynamic.url, &[]).await?;
        let currency_id = gateway_core::native_currency_id(chain_id);
        let fees = to_fee_estimates(&body, &currency_id, dynamic.block_time_ms)?;

        self.cache.insert(chain_id.to_string(), fees.clone()).await;
        Ok(fees)
    }
}

fn to_fee_estimates(
    body: &BitgoFeeResponse,
    currency_id: &str,
    block_time_ms: i64,
) -> GatewayResult<Vec<FeeEstimate>> {
    if let Some(by_target) = &body.fee_by_block_target {
        if by_target.is_empty() {
            return Err(GatewayError::UpstreamDecodeError(
                "feeByBlockTarget was empty".into(),
            ));
        }
        let mut out: Vec<FeeEstimate> = by_target
            .iter()
            .map(|(n_blocks, sats_per_kb)| {
                let n_blocks: i64 = n_blocks.parse().unwrap_or(1);
                let conf_ms = n_blocks * block_time_ms;
                sats_per_kb_to_estimate(*sats_per_kb, conf_ms, currency_id)
            })
            .collect();
        out.sort_by_key(|e| std::cmp::Reverse(e.estimated_confirmation_in));
        Ok(out)
    } else {
        let fee_per_kb = body
            .fee_per_kb
            .ok_or_else(|| GatewayError::UpstreamDecodeError("missing feePerKb".into()))?;
        let num_blocks = body.num_blocks.unwrap_or(1);
        let conf_ms = num_blocks * block_time_ms;
        Ok(vec![sats_per_kb_to_estimate(fee_per_kb, conf_ms, currency_id)])
    }
}

/// `sats_per_kb -> ceil(sats_per_kb / 1024)` sats-per-byte, tier label
/// derived from the estimated confirmation time in whole minutes.
fn sats_per_kb_to_estimate(sats_per_kb: f64, conf_ms: i64, currency_id: &str) -> FeeEstimate {
    let sats_per_byte = (sats_per_kb / 1024.0).ceil() as i64;
    FeeEstimate {
        fee: gateway_core::Amount::from_u128(currency_id.to_string(), sats_per_byte.max(0) as u128),
        tier: format!("{}m", conf_ms / 1000 / 60),
        estimated_confirmation_in: conf_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_chains_never_call_network() {
        assert!(matches!(
            config_for("dogecoin-mainnet"),
            Some(ChainConfig::Static(_))
        ));
        assert!(matches!(
            config_for("bitcoin-testnet"),
            Some(ChainConfig::Static(_))
        ));
    }

    #[test]
    fn tiered_response_converts_sats_per_kb_to_sats_per_byte() {
        let mut map = std::collections::BTreeMap::new();
        map.insert("6".to_string(), 2048.0);
        map.insert("1".to_string(), 10240.0);
        let body = BitgoFeeResponse {
            fee_by_block_target: Some(map),
            fee_per_kb: None,
            num_blocks: None,
        };
        let fees = to_fee_estimates(&body, "bitcoin-mainnet:__native__", 600_000).unwrap();
        assert_eq!(fees.len(), 2);
        // Cheapest-slowest (6 blocks) first.
        assert_eq!(fees[0].tier, "60m");
        assert_eq!(fees[0].fee.amount, "2");
        assert_eq!(fees[1].tier, "10m");
        assert_eq!(fees[1].fee.amount, "10");
    }

    #[test]
    fn single_tier_response_uses_num_blocks() {
        let body = BitgoFeeResponse {
            fee_by_block_target: None,
            fee_per_kb: Some(1500.0),
            num_blocks: Some(2),
        };
        let fees = to_fee_estimates(&body, "litecoin-mainnet:__native__", 150_000).unwrap();
        assert_eq!(fees.len(), 1);
        assert_eq!(fees[0].estimated_confirmation_in, 300_000);
        assert_eq!(fees[0].fee.amount, "2");
    }
}
