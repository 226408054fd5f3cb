//! Upstream-specific adapters implementing [`gateway_core::ChainProvider`]
//! and [`gateway_core::FeeProvider`], plus the shared HTTP/retry/concurrency
//! plumbing they're all built on.

#![forbid(unsafe_code)]

pub mod bitgo;
pub mod blockbook;
pub mod blockchair;
pub mod blockcypher;
pub mod etherscan;
pub mod http;
pub mod ripple;
pub mod tezos;
mod timefmt;

pub use bitgo::BitgoFeeProvider;
pub use blockbook::BlockbookProvider;
pub use blockchair::BlockChairProvider;
pub use blockcypher::BlockCypherProvider;
pub use etherscan::EtherscanProvider;
pub use ripple::RippleProvider;
pub use tezos::TezosProvider;
