//! Process configuration, read from the environment via the `config` crate.
//!
//! The source implementation reads a handful of `os.getenv` calls scattered
//! across each provider module; this collects them into one settings struct
//! built once at startup, in the style of the teacher's `Settings` loader
//! but considerably smaller -- there is no multi-chain-signer config surface
//! here, just upstream tokens and rate-limit overrides.

use serde::Deserialize;

/// Gateway-wide configuration, sourced from environment variables with the
/// `GATEWAY_` prefix falling back to the provider-specific names the source
/// implementation used directly (`BLOCKCYPHER_TOKEN`, `ETHERSCAN_TOKEN`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// BlockCypher API token. Required for anything beyond token-free rate
    /// limits; absence only warns, it does not fail startup.
    #[serde(default)]
    pub blockcypher_token: String,
    /// Overrides the BlockCypher concurrency gate (default 5).
    #[serde(default = "default_blockcypher_rate_limit")]
    pub blockcypher_rate_limit: usize,
    /// Etherscan API token.
    #[serde(default)]
    pub etherscan_token: String,
    /// Overrides the Etherscan concurrency gate (default 3).
    #[serde(default = "default_etherscan_rate_limit")]
    pub etherscan_rate_limit: usize,
    /// BlockChair API token.
    #[serde(default)]
    pub blockchair_token: String,
    /// Address the metrics HTTP server binds to.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

fn default_blockcypher_rate_limit() -> usize {
    5
}

fn default_etherscan_rate_limit() -> usize {
    3
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

impl Settings {
    /// Load settings from the process environment. Variables are read
    /// un-prefixed (`BLOCKCYPHER_TOKEN`, not `GATEWAY_BLOCKCYPHER_TOKEN`) to
    /// match the source implementation's `os.getenv` names, since the
    /// individual provider constructors also read these directly.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .set_default("blockcypher_rate_limit", 5)?
            .set_default("etherscan_rate_limit", 3)?
            .set_default("metrics_addr", "0.0.0.0:9090")?
            .add_source(config::Environment::default().try_parsing(true));
        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_without_any_environment() {
        // `Settings` must still construct cleanly when optional tokens are
        // absent; only `from_env` touches the process environment, so this
        // exercises the plain struct defaults via serde.
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.blockcypher_rate_limit, 5);
        assert_eq!(settings.etherscan_rate_limit, 3);
        assert_eq!(settings.metrics_addr, "0.0.0.0:9090");
        assert_eq!(settings.blockcypher_token, "");
    }
}
