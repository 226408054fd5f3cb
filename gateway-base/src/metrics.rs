//! Prometheus metrics, registered once at startup and scraped over the
//! metrics HTTP server in [`crate::server`].
//!
//! Scaled down from the teacher's `CoreMetrics` (which tracks mailboxes,
//! checkpoints, and a dozen other relayer-specific gauges): this gateway
//! only needs per-upstream call volume, latency, retry counts, and cache
//! hit/miss counts.

use prometheus::{HistogramVec, IntCounterVec, Registry};

const NAMESPACE: &str = "gateway";

/// Process-wide metrics registry and the gauges/counters every adapter and
/// the client report into.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    /// Upstream calls, labeled by `provider` and `outcome` (`ok`, `retry`,
    /// `error`).
    pub upstream_calls: IntCounterVec,
    /// Upstream call latency in seconds, labeled by `provider`.
    pub upstream_latency_seconds: HistogramVec,
    /// Cache lookups, labeled by `cache` (`blockchain_tip`, `fees`,
    /// `blockchair_transaction`) and `outcome` (`hit`, `miss`).
    pub cache_lookups: IntCounterVec,
}

impl GatewayMetrics {
    /// Build and register every metric against a fresh [`Registry`].
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let upstream_calls = IntCounterVec::new(
            prometheus::Opts::new("upstream_calls_total", "Outbound upstream calls")
                .namespace(NAMESPACE),
            &["provider", "outcome"],
        )?;
        registry.register(Box::new(upstream_calls.clone()))?;

        let upstream_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "upstream_latency_seconds",
                "Outbound upstream call latency",
            )
            .namespace(NAMESPACE),
            &["provider"],
        )?;
        registry.register(Box::new(upstream_latency_seconds.clone()))?;

        let cache_lookups = IntCounterVec::new(
            prometheus::Opts::new("cache_lookups_total", "In-memory cache lookups")
                .namespace(NAMESPACE),
            &["cache", "outcome"],
        )?;
        registry.register(Box::new(cache_lookups.clone()))?;

        Ok(Self {
            registry,
            upstream_calls,
            upstream_latency_seconds,
            cache_lookups,
        })
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn gather(&self) -> prometheus::Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        String::from_utf8(buf).map_err(|e| {
            prometheus::Error::Msg(format!("metrics buffer was not valid utf8: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_duplicate_metric_name_conflicts() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics
            .upstream_calls
            .with_label_values(&["etherscan", "ok"])
            .inc();
        let rendered = metrics.gather().unwrap();
        assert!(rendered.contains("gateway_upstream_calls_total"));
    }
}
