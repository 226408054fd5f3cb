//! Tracing subscriber initialization.
//!
//! The teacher's `settings/trace` module builds a configurable
//! pretty/json/compact `Style` plus a custom `LogOutputLayer` unifying spans
//! and events; this gateway has one deployment shape (a container logging to
//! stdout), so it installs a single `fmt` layer driven by `RUST_LOG`/
//! `EnvFilter`, in JSON when `GATEWAY_LOG_JSON` is set.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. Call once at process start.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("GATEWAY_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
