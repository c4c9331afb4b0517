use std::time::Duration;

use prometheus::{
    opts, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct AppMetrics {
    registry: Registry,
    request_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    open_streams: IntGauge,
    upstream_errors_total: IntCounterVec,
    fragments_total: IntCounter,
    catalog_fallbacks_total: IntCounterVec,
}

/// Counts one open chat stream for as long as it lives.
pub struct StreamGuard {
    gauge: IntGauge,
}

impl AppMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let request_total = IntCounterVec::new(
            opts!(
                "chat_backend_http_requests_total",
                "Total HTTP requests processed"
            ),
            &["path", "method", "status"],
        )
        .expect("valid request_total metric");

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "chat_backend_http_request_duration_seconds",
                "Time until response headers are ready, in seconds",
            ),
            &["path", "method"],
        )
        .expect("valid request_duration_seconds metric");

        let open_streams = IntGauge::new(
            "chat_backend_open_streams",
            "Chat streams currently relaying upstream output",
        )
        .expect("valid open_streams metric");

        let upstream_errors_total = IntCounterVec::new(
            opts!(
                "chat_backend_upstream_errors_total",
                "Model host failures by stage"
            ),
            &["stage"],
        )
        .expect("valid upstream_errors_total metric");

        let fragments_total = IntCounter::new(
            "chat_backend_fragments_total",
            "Decoded fragments forwarded to callers",
        )
        .expect("valid fragments_total metric");

        let catalog_fallbacks_total = IntCounterVec::new(
            opts!(
                "chat_backend_catalog_fallbacks_total",
                "Model catalog responses served from fallback data"
            ),
            &["endpoint"],
        )
        .expect("valid catalog_fallbacks_total metric");

        registry
            .register(Box::new(request_total.clone()))
            .expect("register request_total");
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .expect("register request_duration_seconds");
        registry
            .register(Box::new(open_streams.clone()))
            .expect("register open_streams");
        registry
            .register(Box::new(upstream_errors_total.clone()))
            .expect("register upstream_errors_total");
        registry
            .register(Box::new(fragments_total.clone()))
            .expect("register fragments_total");
        registry
            .register(Box::new(catalog_fallbacks_total.clone()))
            .expect("register catalog_fallbacks_total");

        Self {
            registry,
            request_total,
            request_duration_seconds,
            open_streams,
            upstream_errors_total,
            fragments_total,
            catalog_fallbacks_total,
        }
    }

    pub fn stream_guard(&self) -> StreamGuard {
        self.open_streams.inc();
        StreamGuard {
            gauge: self.open_streams.clone(),
        }
    }

    pub fn observe_request(&self, path: &str, method: &str, status: u16, duration: Duration) {
        let status_label = status.to_string();
        self.request_total
            .with_label_values(&[path, method, &status_label])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[path, method])
            .observe(duration.as_secs_f64());
    }

    pub fn observe_upstream_error(&self, stage: &str) {
        self.upstream_errors_total.with_label_values(&[stage]).inc();
    }

    pub fn observe_fragment(&self) {
        self.fragments_total.inc();
    }

    pub fn observe_catalog_fallback(&self, endpoint: &str) {
        self.catalog_fallbacks_total
            .with_label_values(&[endpoint])
            .inc();
    }

    pub fn render(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|error| error.to_string())?;
        String::from_utf8(buffer).map_err(|error| error.to_string())
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}
