//! Operational metrics, one set per index.

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Process-wide registry the per-index metrics register into.
pub static METRICS_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Counters maintained by the index updater.
pub struct UpdaterMetrics {
    /// Events processed (all outcomes).
    pub updates: IntCounter,
    /// Failures: failed events and skipped sub-items.
    pub errors: IntCounter,
    /// Unix millis of the last follow-up reindex request published.
    pub last_reindex_requested: IntGauge,
}

impl UpdaterMetrics {
    pub fn new(index_name: &str) -> Self {
        let updates = counter(index_name, "updates", "change-log events processed");
        let errors = counter(index_name, "errors", "event failures and skipped sub-items");
        let last_reindex_requested = gauge(
            index_name,
            "last_reindex_requested",
            "unix millis of the last published reindex request",
        );
        Self {
            updates,
            errors,
            last_reindex_requested,
        }
    }
}

/// Counters maintained by the indexer.
pub struct IndexerMetrics {
    pub adds: IntCounter,
    pub deletes: IntCounter,
}

impl IndexerMetrics {
    pub fn new(index_name: &str) -> Self {
        Self {
            adds: counter(index_name, "adds", "documents added to the index"),
            deletes: counter(index_name, "deletes", "delete operations against the index"),
        }
    }
}

fn counter(index_name: &str, name: &str, help: &str) -> IntCounter {
    let opts = Opts::new(format!("recidx_{name}"), help.to_string())
        .const_label("index", index_name.to_string());
    // Duplicate registration (same index restarted) falls back to an
    // unregistered counter; the value is still usable locally.
    let c = IntCounter::with_opts(opts).unwrap_or_else(|_| {
        IntCounter::new(format!("recidx_{name}_local"), help.to_string())
            .expect("valid metric name")
    });
    let _ = METRICS_REGISTRY.register(Box::new(c.clone()));
    c
}

fn gauge(index_name: &str, name: &str, help: &str) -> IntGauge {
    let opts = Opts::new(format!("recidx_{name}"), help.to_string())
        .const_label("index", index_name.to_string());
    let g = IntGauge::with_opts(opts).unwrap_or_else(|_| {
        IntGauge::new(format!("recidx_{name}_local"), help.to_string())
            .expect("valid metric name")
    });
    let _ = METRICS_REGISTRY.register(Box::new(g.clone()));
    g
}
