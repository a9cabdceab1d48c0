//! Prometheus metrics for search traffic and reindexing progress
//!
//! All metrics live in [`PROMETHEUS_REGISTRY`] under the `site_search`
//! namespace and are exported in text format by [`gather_metrics`].

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
};

const NAMESPACE: &str = "site_search";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    /// Search requests by outcome
    ///
    /// Labels: outcome (ok, error, skipped)
    pub static ref SEARCH_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("search_requests_total", "Total number of search requests")
            .namespace(NAMESPACE),
        &["outcome"]
    ).expect("Failed to create SEARCH_REQUESTS_TOTAL metric");

    /// Backend search latency in seconds
    ///
    /// Labels: backend
    pub static ref SEARCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("search_duration_seconds", "Backend search latency in seconds")
            .namespace(NAMESPACE)
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["backend"]
    ).expect("Failed to create SEARCH_DURATION_SECONDS metric");

    /// Documents sent to the backend by the reindex job
    pub static ref REINDEX_DOCUMENTS_INDEXED_TOTAL: Counter = Counter::with_opts(
        Opts::new("reindex_documents_indexed_total", "Documents submitted by the reindex job")
            .namespace(NAMESPACE)
    ).expect("Failed to create REINDEX_DOCUMENTS_INDEXED_TOTAL metric");

    /// Records skipped as not indexable
    pub static ref REINDEX_RECORDS_SKIPPED_TOTAL: Counter = Counter::with_opts(
        Opts::new("reindex_records_skipped_total", "Records skipped by the reindex job")
            .namespace(NAMESPACE)
    ).expect("Failed to create REINDEX_RECORDS_SKIPPED_TOTAL metric");

    /// Bulk upserts that reported item failures or could not be sent
    pub static ref REINDEX_BULK_FAILURES_TOTAL: Counter = Counter::with_opts(
        Opts::new("reindex_bulk_failures_total", "Failed bulk upserts")
            .namespace(NAMESPACE)
    ).expect("Failed to create REINDEX_BULK_FAILURES_TOTAL metric");

    /// Progress of the current reindex job
    ///
    /// Labels: counter (current_step, total_steps)
    pub static ref REINDEX_PROGRESS: GaugeVec = GaugeVec::new(
        Opts::new("reindex_progress", "Step counters of the current reindex job")
            .namespace(NAMESPACE),
        &["counter"]
    ).expect("Failed to create REINDEX_PROGRESS metric");

    /// Completed reindex jobs
    pub static ref REINDEX_JOBS_COMPLETED_TOTAL: Counter = Counter::with_opts(
        Opts::new("reindex_jobs_completed_total", "Completed reindex jobs")
            .namespace(NAMESPACE)
    ).expect("Failed to create REINDEX_JOBS_COMPLETED_TOTAL metric");

    /// Build information, always 1
    ///
    /// Labels: version
    pub static ref BUILD_INFO: GaugeVec = GaugeVec::new(
        Opts::new("build_info", "Build information").namespace(NAMESPACE),
        &["version"]
    ).expect("Failed to create BUILD_INFO metric");

    /// Seconds since the process started serving
    pub static ref UPTIME_SECONDS: Gauge = Gauge::with_opts(
        Opts::new("uptime_seconds", "Seconds since startup").namespace(NAMESPACE)
    ).expect("Failed to create UPTIME_SECONDS metric");
}

/// Register all metrics with [`PROMETHEUS_REGISTRY`].
///
/// Safe to call more than once; metrics already registered are left alone.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(SEARCH_REQUESTS_TOTAL.clone()),
        Box::new(SEARCH_DURATION_SECONDS.clone()),
        Box::new(REINDEX_DOCUMENTS_INDEXED_TOTAL.clone()),
        Box::new(REINDEX_RECORDS_SKIPPED_TOTAL.clone()),
        Box::new(REINDEX_BULK_FAILURES_TOTAL.clone()),
        Box::new(REINDEX_PROGRESS.clone()),
        Box::new(REINDEX_JOBS_COMPLETED_TOTAL.clone()),
        Box::new(BUILD_INFO.clone()),
        Box::new(UPTIME_SECONDS.clone()),
    ];

    for collector in collectors {
        match PROMETHEUS_REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(e),
        }
    }

    BUILD_INFO
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1.0);

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Record reindex step counters
pub fn record_reindex_progress(current_step: u64, total_steps: u64) {
    REINDEX_PROGRESS
        .with_label_values(&["current_step"])
        .set(current_step as f64);
    REINDEX_PROGRESS
        .with_label_values(&["total_steps"])
        .set(total_steps as f64);
}

/// Generate Prometheus text format metrics
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
