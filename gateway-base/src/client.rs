//! The provider-dispatch client: the only surface the (out-of-scope) HTTP
//! front end talks to.
//!
//! Owns the fixed chain-id → provider routing table, the per-call address
//! fan-out gate, and the blockchain-tip memoization cache. Grounded on the
//! teacher's `RetryingProvider`/`FallbackProvider` composition style of
//! wrapping a capability behind a struct that owns its own cache and
//! concurrency primitives, generalized here to a dispatch table instead of a
//! single chain's fallback list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gateway_core::{chains_for, ChainProvider, GatewayError, GatewayResult, HeightPaginatedResponse, Transaction};
use gateway_providers::{
    BitgoFeeProvider, BlockCypherProvider, BlockbookProvider, EtherscanProvider, RippleProvider,
    TezosProvider,
};

use crate::metrics::GatewayMetrics;

const BLOCKCHAIN_CACHE_TTL: Duration = Duration::from_secs(10);
const ADDRESS_FANOUT_LIMIT: usize = 12;

/// The gateway's single dispatch point: resolves a chain id to its provider,
/// fans out per-address fetches, and memoizes blockchain-tip lookups.
pub struct Client {
    routes: HashMap<&'static str, Arc<dyn ChainProvider>>,
    blockchain_cache: moka::future::Cache<String, gateway_core::Blockchain>,
    metrics: GatewayMetrics,
}

impl Client {
    /// Build a client wired with the default provider set: BlockCypher for
    /// the three chains it serves (fee sourcing delegated to BitGo),
    /// Blockbook for Bitcoin Cash, Etherscan for Ethereum, Ripple for
    /// Ripple, Tezos for Tezos.
    ///
    /// The fixed routing table matches the design's dispatch contract
    /// exactly: `bitcoin-testnet` is a known chain in the registry (used by
    /// `GetBlockchains`) but intentionally has no routed provider here, the
    /// same scope the design's dispatch table draws.
    pub fn new(metrics: GatewayMetrics) -> Self {
        let bitgo: Arc<dyn gateway_core::FeeProvider> = Arc::new(BitgoFeeProvider::new());
        let blockcypher: Arc<dyn ChainProvider> =
            Arc::new(BlockCypherProvider::new(bitgo.clone()));
        let blockbook: Arc<dyn ChainProvider> = Arc::new(BlockbookProvider::new(bitgo.clone()));
        let etherscan: Arc<dyn ChainProvider> = Arc::new(EtherscanProvider::new());
        let ripple: Arc<dyn ChainProvider> = Arc::new(RippleProvider::new());
        let tezos: Arc<dyn ChainProvider> = Arc::new(TezosProvider::new());

        let mut routes: HashMap<&'static str, Arc<dyn ChainProvider>> = HashMap::new();
        routes.insert("bitcoin-mainnet", blockcypher.clone());
        routes.insert("litecoin-mainnet", blockcypher.clone());
        routes.insert("dogecoin-mainnet", blockcypher);
        routes.insert("bitcoincash-mainnet", blockbook);
        routes.insert("ethereum-mainnet", etherscan);
        routes.insert("ripple-mainnet", ripple);
        routes.insert("tezos-mainnet", tezos);

        Self {
            routes,
            blockchain_cache: moka::future::Cache::builder()
                .time_to_live(BLOCKCHAIN_CACHE_TTL)
                .max_capacity(64)
                .build(),
            metrics,
        }
    }

    /// Wire a client against an explicit route table; exposed for tests
    /// that don't want to construct every real upstream adapter.
    #[cfg(test)]
    fn with_routes(routes: HashMap<&'static str, Arc<dyn ChainProvider>>, metrics: GatewayMetrics) -> Self {
        Self {
            routes,
            blockchain_cache: moka::future::Cache::builder()
                .time_to_live(BLOCKCHAIN_CACHE_TTL)
                .max_capacity(64)
                .build(),
            metrics,
        }
    }

    fn provider_for(&self, chain_id: &str) -> GatewayResult<Arc<dyn ChainProvider>> {
        self.routes
            .get(chain_id)
            .cloned()
            .ok_or_else(|| GatewayError::UnsupportedChain(chain_id.to_string()))
    }

    /// Return the chain's current tip and fee estimates, memoized under a
    /// ~10s TTL so repeated lookups in the same window -- and concurrent
    /// ones -- share the same in-flight fetch.
    pub async fn get_blockchain(&self, chain_id: &str) -> GatewayResult<gateway_core::Blockchain> {
        let provider = self.provider_for(chain_id)?;
        let result = self
            .blockchain_cache
            .try_get_with(chain_id.to_string(), async {
                provider.get_blockchain_data(chain_id).await
            })
            .await;

        match result {
            Ok(blockchain) => {
                self.metrics
                    .cache_lookups
                    .with_label_values(&["blockchain_tip", "hit_or_fill"])
                    .inc();
                Ok(blockchain)
            }
            Err(shared_err) => Err(clone_gateway_error(&shared_err)),
        }
    }

    /// Enumerate every registered chain filtered by the mainnet/testnet
    /// flag, fetched in parallel. A provider error for any single chain --
    /// including `UnsupportedChain` for a registered chain with no routed
    /// provider -- fails the whole call.
    pub async fn get_blockchains(&self, testnet: bool) -> GatewayResult<Vec<gateway_core::Blockchain>> {
        let ids: Vec<&'static str> = chains_for(testnet).map(|c| c.id).collect();
        let futures = ids.iter().map(|id| self.get_blockchain(id));
        let results = futures::future::try_join_all(futures).await?;
        Ok(results)
    }

    /// Fetch confirmed transaction history touching each of `addresses`
    /// within `[start_height, end_height]`, bounded by a 12-wide fan-out
    /// gate, and merge the per-address pages per the design's window-min
    /// policy: the narrowest unfinished window across addresses is the
    /// highest-start point the caller must resume from.
    ///
    /// `max_page_size` and `include_raw` are reserved: no current adapter
    /// consumes them.
    #[allow(clippy::too_many_arguments)]
    pub async fn get_transactions(
        &self,
        addresses: &[String],
        chain_id: &str,
        start_height: i64,
        end_height: i64,
        _max_page_size: Option<u32>,
        _include_raw: bool,
    ) -> GatewayResult<HeightPaginatedResponse<Transaction>> {
        let provider = self.provider_for(chain_id)?;
        let gate = Arc::new(tokio::sync::Semaphore::new(ADDRESS_FANOUT_LIMIT));

        let futures = addresses.iter().map(|address| {
            let provider = provider.clone();
            let gate = gate.clone();
            let chain_id = chain_id.to_string();
            let address = address.clone();
            async move {
                let _permit = gate.acquire().await.expect("semaphore is never closed");
                provider
                    .get_address_transactions(&chain_id, &address, start_height, end_height)
                    .await
            }
        });

        let results = futures::future::try_join_all(futures).await?;
        Ok(merge_paginated(results))
    }
}

fn merge_paginated(
    results: Vec<HeightPaginatedResponse<Transaction>>,
) -> HeightPaginatedResponse<Transaction> {
    let mut contents = Vec::new();
    let mut has_more = false;
    let mut next_start_height: Option<i64> = None;
    let mut next_end_height: Option<i64> = None;

    for resp in results {
        if resp.has_more {
            has_more = true;
            next_start_height = match (next_start_height, resp.next_start_height) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            next_end_height = match (next_end_height, resp.next_end_height) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
        contents.extend(resp.contents);
    }

    HeightPaginatedResponse {
        contents,
        has_more,
        next_start_height,
        next_end_height,
    }
}

fn clone_gateway_error(err: &Arc<GatewayError>) -> GatewayError {
    match err.as_ref() {
        GatewayError::UnsupportedChain(c) => GatewayError::UnsupportedChain(c.clone()),
        GatewayError::UpstreamHttpError(s) => GatewayError::UpstreamHttpError(*s),
        GatewayError::UpstreamDecodeError(m) => GatewayError::UpstreamDecodeError(m.clone()),
        GatewayError::UpstreamRateLimited => GatewayError::UpstreamRateLimited,
        GatewayError::InvalidArgument(m) => GatewayError::InvalidArgument(m.clone()),
        GatewayError::Cancelled => GatewayError::Cancelled,
        GatewayError::Transport(m) => GatewayError::Transport(m.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_core::{Amount, EmbeddedTransfers, TransactionStatus};
    use std::collections::HashMap as Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        calls: Arc<AtomicUsize>,
        fail: bool,
        fail_address: Option<&'static str>,
    }

    #[async_trait]
    impl ChainProvider for StubProvider {
        async fn get_blockchain_data(&self, chain_id: &str) -> GatewayResult<gateway_core::Blockchain> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GatewayError::UpstreamHttpError(503));
            }
            Ok(gateway_core::Blockchain {
                name: "Stub".into(),
                id: chain_id.to_string(),
                is_mainnet: true,
                network: "stub".into(),
                confirmations_until_final: 1,
                native_currency_id: gateway_core::native_currency_id(chain_id),
                fee_estimates: vec![],
                fee_estimates_timestamp: "2021-01-01T00:00:00.000+00:00".into(),
                block_height: 10,
                verified_height: 10,
                verified_block_hash: "hash".into(),
            })
        }

        async fn get_address_transactions(
            &self,
            chain_id: &str,
            address: &str,
            _start_height: i64,
            _end_height: i64,
        ) -> GatewayResult<HeightPaginatedResponse<Transaction>> {
            if self.fail_address == Some(address) {
                return Err(GatewayError::UpstreamHttpError(503));
            }
            let tx = Transaction {
                transaction_id: format!("{chain_id}:tx-{address}"),
                identifier: format!("tx-{address}"),
                hash: format!("tx-{address}"),
                blockchain_id: chain_id.to_string(),
                timestamp: "2021-01-01T00:00:00.000+00:00".into(),
                embedded: EmbeddedTransfers { transfers: vec![] },
                fee: Amount::from_u128(gateway_core::native_currency_id(chain_id), 0),
                confirmations: 1,
                size: 0,
                index: 0,
                block_hash: "blk".into(),
                block_height: 5,
                status: TransactionStatus::Confirmed,
                meta: Map::new(),
                raw: None,
            };
            Ok(HeightPaginatedResponse {
                contents: vec![tx],
                has_more: address == "addr-a",
                next_start_height: if address == "addr-a" { Some(100) } else { None },
                next_end_height: if address == "addr-a" { Some(200) } else { None },
            })
        }
    }

    fn test_metrics() -> GatewayMetrics {
        GatewayMetrics::new().unwrap()
    }

    #[test]
    fn unsupported_chain_is_rejected() {
        let client = Client::with_routes(HashMap::new(), test_metrics());
        assert!(matches!(
            client.provider_for("nonexistent-chain"),
            Err(GatewayError::UnsupportedChain(_))
        ));
    }

    #[tokio::test]
    async fn get_blockchain_is_memoized_within_ttl() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut routes: HashMap<&'static str, Arc<dyn ChainProvider>> = HashMap::new();
        routes.insert(
            "bitcoin-mainnet",
            Arc::new(StubProvider {
                calls: calls.clone(),
                fail: false,
                fail_address: None,
            }),
        );
        let client = Client::with_routes(routes, test_metrics());

        client.get_blockchain("bitcoin-mainnet").await.unwrap();
        client.get_blockchain("bitcoin-mainnet").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn merge_policy_takes_min_start_and_max_end_across_addresses() {
        let provider: Arc<dyn ChainProvider> = Arc::new(StubProvider {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
            fail_address: None,
        });
        let mut routes: HashMap<&'static str, Arc<dyn ChainProvider>> = HashMap::new();
        routes.insert("bitcoin-mainnet", provider);
        let client = Client::with_routes(routes, test_metrics());

        let addresses = vec!["addr-a".to_string(), "addr-b".to_string()];
        let resp = client
            .get_transactions(&addresses, "bitcoin-mainnet", 0, 1000, None, false)
            .await
            .unwrap();

        assert_eq!(resp.contents.len(), 2);
        assert!(resp.has_more);
        assert_eq!(resp.next_start_height, Some(100));
        assert_eq!(resp.next_end_height, Some(200));
    }

    #[tokio::test]
    async fn an_unsupported_chain_id_propagates_through_get_blockchain() {
        let provider: Arc<dyn ChainProvider> = Arc::new(StubProvider {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: true,
            fail_address: None,
        });
        let mut routes: HashMap<&'static str, Arc<dyn ChainProvider>> = HashMap::new();
        routes.insert("ethereum-mainnet", provider);
        let client = Client::with_routes(routes, test_metrics());

        let err = client.get_blockchain("ethereum-mainnet").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn one_failing_address_among_three_fails_the_whole_transactions_call() {
        let provider: Arc<dyn ChainProvider> = Arc::new(StubProvider {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
            fail_address: Some("addr-b"),
        });
        let mut routes: HashMap<&'static str, Arc<dyn ChainProvider>> = HashMap::new();
        routes.insert("bitcoin-mainnet", provider);
        let client = Client::with_routes(routes, test_metrics());

        let addresses = vec![
            "addr-a".to_string(),
            "addr-b".to_string(),
            "addr-c".to_string(),
        ];
        let err = client
            .get_transactions(&addresses, "bitcoin-mainnet", 0, 700_000, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamHttpError(503)));
    }
}
