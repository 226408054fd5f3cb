//! # gateway
//!
//! The blockchain-explorer gateway's process entrypoint: loads [`Settings`]
//! from the environment, builds the provider-dispatch [`Client`], starts the
//! Prometheus metrics server, and exposes a small command-line surface for
//! exercising the client directly.
//!
//! This binary intentionally does not implement an HTTP front end, request
//! routing, or the hypermedia response envelope -- that surface sits above
//! the gateway and is out of scope here.
//!
//! # Usage
//! ```text
//! gateway blockchain <CHAIN_ID>
//! gateway blockchains [--testnet]
//! gateway transactions <CHAIN_ID> <START_HEIGHT> <END_HEIGHT> <ADDRESS>...
//! gateway serve-metrics
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::{eyre, Result};

use gateway_base::{Client, GatewayMetrics, Server, Settings};

/// Command-line entrypoint for the gateway process.
#[derive(Debug, Parser)]
#[command(name = "gateway", about = "Blockchain-explorer gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch a single chain's current tip and fee estimates.
    Blockchain {
        /// Routing key, e.g. `ethereum-mainnet`.
        chain_id: String,
    },
    /// Fetch every registered chain's tip, filtered by network.
    Blockchains {
        /// List testnets instead of mainnets.
        #[arg(long, default_value_t = false)]
        testnet: bool,
    },
    /// Fetch confirmed transaction history for one or more addresses.
    Transactions {
        /// Routing key, e.g. `bitcoin-mainnet`.
        chain_id: String,
        /// Start of the inclusive block-height window.
        start_height: i64,
        /// End of the inclusive block-height window.
        end_height: i64,
        /// One or more addresses to fetch history for.
        addresses: Vec<String>,
    },
    /// Run only the Prometheus metrics HTTP server, for local smoke-testing.
    ServeMetrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    gateway_base::trace::init();

    let settings = Settings::from_env().map_err(|e| eyre!("failed to load settings: {e}"))?;
    let metrics = GatewayMetrics::new().map_err(|e| eyre!("failed to register metrics: {e}"))?;
    let server = Arc::new(Server::new(settings.metrics_addr.parse()?, metrics.clone()));
    let _metrics_handle = server.run();

    let client = Client::new(metrics);
    let cli = Cli::parse();

    match cli.command {
        Commands::Blockchain { chain_id } => {
            let blockchain = client.get_blockchain(&chain_id).await?;
            println!("{}", serde_json::to_string_pretty(&blockchain)?);
        }
        Commands::Blockchains { testnet } => {
            let blockchains = client.get_blockchains(testnet).await?;
            println!("{}", serde_json::to_string_pretty(&blockchains)?);
        }
        Commands::Transactions {
            chain_id,
            start_height,
            end_height,
            addresses,
        } => {
            if addresses.is_empty() {
                return Err(eyre!("at least one address is required"));
            }
            let page = client
                .get_transactions(&addresses, &chain_id, start_height, end_height, None, false)
                .await?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Commands::ServeMetrics => {
            tracing::info!("metrics server running, press ctrl-c to exit");
            tokio::signal::ctrl_c().await?;
        }
    }

    Ok(())
}
