use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref EVENTS_PUBLISHED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "chain_events_published_total",
        "Total change notifications handed to the publish transport"
    ))
    .unwrap();
    pub static ref PUBLISH_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "chain_publish_failures_total",
        "Total change notifications the transport refused (dropped)"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "chain_db_failures_total",
        "Total transient database failures that were retried"
    ))
    .unwrap();
    pub static ref DATA_POINTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "chain_data_points_total",
        "Total sensor readings accepted"
    ))
    .unwrap();
    pub static ref REJECTED_REQUESTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "chain_rejected_requests_total",
        "Total requests rejected with a client error"
    ))
    .unwrap();
    pub static ref ROLLUP_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "chain_rollup_latency_seconds",
            "Time taken to recompute one batch of dirty rollup buckets"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref ROLLUP_QUEUE_FULL_TOTAL: Counter = Counter::with_opts(Opts::new(
        "chain_rollup_queue_full_total",
        "Total rollup notices dropped because the queue was full"
    ))
    .unwrap();
    pub static ref ROLLUP_PENDING: Gauge = Gauge::with_opts(Opts::new(
        "chain_rollup_pending",
        "Dirty rollup buckets awaiting recomputation"
    ))
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(EVENTS_PUBLISHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PUBLISH_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DATA_POINTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REJECTED_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ROLLUP_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(ROLLUP_QUEUE_FULL_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ROLLUP_PENDING.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
