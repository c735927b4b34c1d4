//! Prometheus metrics for the gateway.
//!
//! This module defines all metrics exported at the `/metrics` endpoint.
//!
//! # Metric Categories
//!
//! - **HTTP**: Request counts by route/status, time-to-first-byte histograms
//! - **Transfer**: Bytes streamed to clients, active stream gauge
//! - **Cache**: Hits, misses, bypasses, bytes held on disk
//! - **Remote**: Chunk reads, read failures by kind, session connects,
//!   data-center migrations, file-reference refreshes
//!
//! # Key Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `gateway_http_requests_total` | Counter | Total requests by route/status |
//! | `gateway_first_byte_seconds` | Histogram | Time until the response head is sent |
//! | `gateway_active_streams` | Gauge | Response bodies currently being written |
//! | `gateway_remote_fetches_total` | Counter | Remote chunk reads issued |
//! | `gateway_remote_fetch_errors_total` | Counter | Failed remote reads by kind |
//! | `gateway_dc_migrations_total` | Counter | Reads redirected to another data center |

use parking_lot::RwLock;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// Prometheus metrics collection for the gateway.
///
/// Cloning is cheap: every metric handle is reference-counted, so services
/// hold their own clone and update the shared registry.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<RwLock<Registry>>,
    pub http_requests: Family<[(String, String); 2], Counter>, // route, status
    pub first_byte_duration: Family<[(String, String); 1], Histogram>, // route
    pub download_bytes: Counter,
    pub active_streams: Gauge,
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub cache_bypasses: Counter,
    pub cache_bytes: Gauge,
    pub remote_fetches: Counter,
    pub remote_fetch_errors: Family<[(String, String); 1], Counter>, // kind
    pub session_connects: Counter,
    pub dc_migrations: Counter,
    pub reference_refreshes: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_requests = Family::<[(String, String); 2], Counter>::default();
        registry.register(
            "gateway_http_requests",
            "Total HTTP requests handled",
            http_requests.clone(),
        );

        let first_byte_duration =
            Family::<[(String, String); 1], Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.01, 2.0, 12))
            });
        registry.register(
            "gateway_first_byte_seconds",
            "Time from request to response head",
            first_byte_duration.clone(),
        );

        let download_bytes = Counter::default();
        registry.register(
            "gateway_download_bytes",
            "Total bytes streamed to clients",
            download_bytes.clone(),
        );

        let active_streams = Gauge::default();
        registry.register(
            "gateway_active_streams",
            "Number of response bodies currently streaming",
            active_streams.clone(),
        );

        let cache_hits = Counter::default();
        registry.register(
            "gateway_cache_hits",
            "Requests served from a complete cache file",
            cache_hits.clone(),
        );

        let cache_misses = Counter::default();
        registry.register(
            "gateway_cache_misses",
            "Requests that started or joined a cache download",
            cache_misses.clone(),
        );

        let cache_bypasses = Counter::default();
        registry.register(
            "gateway_cache_bypasses",
            "Requests streamed straight from the remote because the file exceeds the cache limit",
            cache_bypasses.clone(),
        );

        let cache_bytes = Gauge::default();
        registry.register(
            "gateway_cache_bytes",
            "Bytes held by complete cache files at the last sweep",
            cache_bytes.clone(),
        );

        let remote_fetches = Counter::default();
        registry.register(
            "gateway_remote_fetches",
            "Remote chunk reads issued",
            remote_fetches.clone(),
        );

        let remote_fetch_errors = Family::<[(String, String); 1], Counter>::default();
        registry.register(
            "gateway_remote_fetch_errors",
            "Failed remote chunk reads by kind",
            remote_fetch_errors.clone(),
        );

        let session_connects = Counter::default();
        registry.register(
            "gateway_session_connects",
            "Remote sessions created",
            session_connects.clone(),
        );

        let dc_migrations = Counter::default();
        registry.register(
            "gateway_dc_migrations",
            "Reads redirected to another data center",
            dc_migrations.clone(),
        );

        let reference_refreshes = Counter::default();
        registry.register(
            "gateway_reference_refreshes",
            "Metadata re-resolutions after file reference expiry",
            reference_refreshes.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            http_requests,
            first_byte_duration,
            download_bytes,
            active_streams,
            cache_hits,
            cache_misses,
            cache_bypasses,
            cache_bytes,
            remote_fetches,
            remote_fetch_errors,
            session_connects,
            dc_migrations,
            reference_refreshes,
        }
    }

    pub fn record_request(&self, route: &str, status: u16) {
        self.http_requests
            .get_or_create(&[
                ("route".to_string(), route.to_string()),
                ("status".to_string(), status.to_string()),
            ])
            .inc();
    }

    pub fn record_fetch_error(&self, kind: &str) {
        self.remote_fetch_errors
            .get_or_create(&[("kind".to_string(), kind.to_string())])
            .inc();
    }

    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        if let Err(e) = encode(&mut buffer, &registry) {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            return format!("# Error encoding metrics: {}", e);
        }
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_registered_metrics() {
        let metrics = Metrics::new();
        metrics.record_request("stream", 206);
        metrics.dc_migrations.inc();
        let text = metrics.encode();
        assert!(text.contains("gateway_http_requests_total"));
        assert!(text.contains("route=\"stream\""));
        assert!(text.contains("gateway_dc_migrations_total 1"));
    }
}
