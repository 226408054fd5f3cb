use async_trait::async_trait;

use crate::{Blockchain, FeeEstimate, GatewayResult, HeightPaginatedResponse, Transaction};

/// The capability every per-upstream chain adapter implements.
///
/// No inheritance hierarchy: each upstream is a separate implementation of
/// this interface, selected through the client's routing table. Errors
/// common to every implementation are `UnsupportedChain`,
/// `UpstreamHttpError`, `UpstreamDecodeError`, and `UpstreamRateLimited`
/// (retryable).
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Return the chain's current tip and fee estimates.
    async fn get_blockchain_data(&self, chain_id: &str) -> GatewayResult<Blockchain>;

    /// Return the confirmed transaction history touching `address` within
    /// `[start_height, end_height]`. Adapters that cannot natively paginate
    /// return `has_more=false` and rely on the upstream's per-call cap.
    async fn get_address_transactions(
        &self,
        chain_id: &str,
        address: &str,
        start_height: i64,
        end_height: i64,
    ) -> GatewayResult<HeightPaginatedResponse<Transaction>>;
}

/// A narrower, distinct capability for fee sourcing: fee sources and
/// canonical chain-data sources are orthogonal (e.g. Blockbook does not
/// supply fees; BitGo is used for all UTXO fees), so this is composed into
/// a [`ChainProvider`] implementation rather than inherited from it.
#[async_trait]
pub trait FeeProvider: Send + Sync {
    /// Return the current fee tiers for `chain_id`.
    async fn get_fees(&self, chain_id: &str) -> GatewayResult<Vec<FeeEstimate>>;
}
