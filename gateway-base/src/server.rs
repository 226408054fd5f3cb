//! Metrics HTTP server: a single `/metrics` route serving the Prometheus
//! text exposition format, run on its own background task.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::task::JoinHandle;
use tracing::info;

use crate::metrics::GatewayMetrics;

/// Serves `GatewayMetrics` over HTTP for Prometheus to scrape.
pub struct Server {
    addr: SocketAddr,
    metrics: GatewayMetrics,
}

impl Server {
    /// Construct a server bound to `addr` once run.
    pub fn new(addr: SocketAddr, metrics: GatewayMetrics) -> Self {
        Self { addr, metrics }
    }

    /// Spawn the metrics server on its own task.
    pub fn run(self: Arc<Self>) -> JoinHandle<()> {
        let addr = self.addr;
        info!(%addr, "starting metrics server");
        tokio::spawn(async move {
            let app = Router::new().route(
                "/metrics",
                get(move || {
                    let server = self.clone();
                    async move { server.handle_metrics() }
                }),
            );
            axum::Server::bind(&addr)
                .serve(app.into_make_service())
                .await
                .expect("metrics server failed to bind");
        })
    }

    fn handle_metrics(&self) -> (StatusCode, [(&'static str, &'static str); 1], String) {
        match self.metrics.gather() {
            Ok(body) => (
                StatusCode::OK,
                [("Content-Type", "text/plain; charset=utf-8")],
                body,
            ),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("Content-Type", "text/plain; charset=utf-8")],
                format!("failed to encode metrics: {e}"),
            ),
        }
    }
}
