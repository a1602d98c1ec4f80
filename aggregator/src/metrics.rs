//! Prometheus metrics for the flowd service

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};

// ── HTTP metrics ─────────────────────────────────────────────────────────────

pub static HTTP_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "flowd_http_requests_total",
        "Flow http requests total",
        &["type", "method", "status_code"]
    )
    .unwrap()
});

pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "flowd_http_request_duration_seconds",
        "Flow http request duration",
        &["type", "method", "status_code"]
    )
    .unwrap()
});

// ── Flow store metrics ───────────────────────────────────────────────────────

pub static FLOWSTORE_KEYS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "flowd_flowstore_keys",
        "Number of distinct flow tuples in the flowstore"
    )
    .unwrap()
});

pub static FLOWSTORE_SIZE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "flowd_flowstore_size",
        "Number of total flow datapoints in the flowstore"
    )
    .unwrap()
});

pub static INSERT_FAILURES: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "flowd_flowstore_insert_failures_total",
        "Flow records skipped because they could not be appended"
    )
    .unwrap()
});

pub static AGGREGATE_FAILURES: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "flowd_flowstore_aggregate_failures_total",
        "Flow keys left out of a query because aggregation failed"
    )
    .unwrap()
});

/// Register the process collector (cpu, memory, fds) with the default registry.
#[cfg(target_os = "linux")]
pub fn register_process_collector() -> Result<()> {
    let collector = prometheus::process_collector::ProcessCollector::for_self();
    prometheus::register(Box::new(collector)).context("register process collector")?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn register_process_collector() -> Result<()> {
    Ok(())
}

/// Record one served HTTP request.
pub fn observe_request(route: &str, method: &str, status: u16, elapsed_secs: f64) {
    let status = status.to_string();
    let labels = [route, method, status.as_str()];
    HTTP_REQUESTS.with_label_values(&labels).inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&labels)
        .observe(elapsed_secs);
}

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> Result<String> {
    // Touch the store collectors so they are exported before the first insert.
    Lazy::force(&FLOWSTORE_KEYS);
    Lazy::force(&FLOWSTORE_SIZE);

    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .context("encode metrics")?;
    String::from_utf8(buffer).context("metrics are not utf-8")
}
