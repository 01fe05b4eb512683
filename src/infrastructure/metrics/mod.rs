//! Prometheus Metrics Module
//!
//! # Metrics Collected
//! - Finished transactions by outcome
//! - Transaction lifetime histogram
//! - Query latency histograms (recorded by the metrics decorator)
//! - Connection pool gauges (updated by the pool health check)

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Finished transactions by outcome ("committed", "rolled_back", "commit_failed", ...)
pub static TRANSACTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("transactions_total", "Total number of finished transactions")
            .namespace("tx_manager"),
        &["outcome"],
    )
    .expect("Failed to create TRANSACTIONS_TOTAL metric")
});

/// Time from begin to commit or rollback
pub static TRANSACTION_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
    HistogramVec::new(
        HistogramOpts::new(
            "transaction_duration_seconds",
            "Transaction lifetime in seconds",
        )
        .namespace("tx_manager")
        .buckets(buckets),
        &["outcome"],
    )
    .expect("Failed to create TRANSACTION_DURATION_SECONDS metric")
});

/// Database query duration histogram
pub static QUERY_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];
    HistogramVec::new(
        HistogramOpts::new("query_duration_seconds", "Database query latency in seconds")
            .namespace("tx_manager")
            .buckets(buckets),
        &["operation", "mode"], // mode: "tx", "pool"
    )
    .expect("Failed to create QUERY_DURATION_SECONDS metric")
});

/// Database connection pool stats
pub static DB_POOL_CONNECTIONS: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new("db_pool_connections", "Database connection pool statistics")
            .namespace("tx_manager"),
        &["state"], // "idle", "active", "max"
    )
    .expect("Failed to create DB_POOL_CONNECTIONS metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(TRANSACTIONS_TOTAL.clone()))
        .expect("Failed to register TRANSACTIONS_TOTAL");
    registry
        .register(Box::new(TRANSACTION_DURATION_SECONDS.clone()))
        .expect("Failed to register TRANSACTION_DURATION_SECONDS");
    registry
        .register(Box::new(QUERY_DURATION_SECONDS.clone()))
        .expect("Failed to register QUERY_DURATION_SECONDS");
    registry
        .register(Box::new(DB_POOL_CONNECTIONS.clone()))
        .expect("Failed to register DB_POOL_CONNECTIONS");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Helper to record a finished transaction
pub fn record_transaction(outcome: &str, duration_secs: f64) {
    TRANSACTIONS_TOTAL.with_label_values(&[outcome]).inc();
    TRANSACTION_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

/// Helper to record database query metrics
pub fn record_query(operation: &str, mode: &str, duration_secs: f64) {
    QUERY_DURATION_SECONDS
        .with_label_values(&[operation, mode])
        .observe(duration_secs);
}

/// Helper to update database pool stats
pub fn update_db_pool_stats(idle: u32, active: u32, max: u32) {
    DB_POOL_CONNECTIONS
        .with_label_values(&["idle"])
        .set(idle as f64);
    DB_POOL_CONNECTIONS
        .with_label_values(&["active"])
        .set(active as f64);
    DB_POOL_CONNECTIONS
        .with_label_values(&["max"])
        .set(max as f64);
}
