//! Shared runtime plumbing for the gateway binary: configuration, the
//! provider-dispatch client, metrics, the metrics HTTP server, and tracing
//! setup.
//!
//! Mirrors the teacher's `hyperlane-base` role -- the crate a binary pulls
//! in to get `Settings`, metrics, and a server loop without reimplementing
//! any of it -- scaled to this gateway's much smaller surface.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod metrics;
pub mod server;
pub mod settings;
pub mod trace;

pub use client::Client;
pub use metrics::GatewayMetrics;
pub use server::Server;
pub use settings::Settings;
