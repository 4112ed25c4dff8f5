//! Metrics collection with Prometheus
//!
//! This module provides Prometheus metrics for CacheGate:
//! - Dispatch counts by subsystem, method and outcome
//! - Dispatch latency histograms
//! - Transport failures and failover counts per connection
//! - Authorization denials
//! - Connection liveness gauges

use prometheus::{CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Outcome label for a finished dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    Denied,
    Failed,
    Partial,
    Cancelled,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Success => "success",
            DispatchOutcome::Denied => "denied",
            DispatchOutcome::Failed => "failed",
            DispatchOutcome::Partial => "partial",
            DispatchOutcome::Cancelled => "cancelled",
        }
    }
}

/// Metrics collector for the gateway
#[derive(Clone)]
pub struct DispatchMetrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Finished dispatches
    pub dispatch_total: CounterVec,
    /// End-to-end dispatch duration, failover attempts included
    pub dispatch_duration_seconds: HistogramVec,
    /// Transport failures observed per connection
    pub transport_failures_total: CounterVec,
    /// Times a strategy-selected call moved on to another connection
    pub failover_total: CounterVec,
    /// Authorization gate denials
    pub authorization_denied_total: CounterVec,
    /// Connection liveness (1=reachable, 0=failed)
    pub connection_reachable: GaugeVec,
}

impl DispatchMetrics {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let dispatch_total = CounterVec::new(
            Opts::new("cachegate_dispatch_total", "Total number of dispatched calls"),
            &["subsystem", "method", "outcome"],
        )?;

        let dispatch_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "cachegate_dispatch_duration_seconds",
                "Dispatch duration in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
            &["subsystem", "method"],
        )?;

        let transport_failures_total = CounterVec::new(
            Opts::new(
                "cachegate_transport_failures_total",
                "Transport-level failures per backend connection",
            ),
            &["tenant", "subsystem", "connection"],
        )?;

        let failover_total = CounterVec::new(
            Opts::new(
                "cachegate_failover_total",
                "Number of times a call failed over to another connection",
            ),
            &["tenant", "subsystem"],
        )?;

        let authorization_denied_total = CounterVec::new(
            Opts::new(
                "cachegate_authorization_denied_total",
                "Calls rejected by the authorization gate",
            ),
            &["tenant", "method"],
        )?;

        let connection_reachable = GaugeVec::new(
            Opts::new(
                "cachegate_connection_reachable",
                "Connection liveness (1=reachable, 0=failed)",
            ),
            &["tenant", "subsystem", "connection"],
        )?;

        registry.register(Box::new(dispatch_total.clone()))?;
        registry.register(Box::new(dispatch_duration_seconds.clone()))?;
        registry.register(Box::new(transport_failures_total.clone()))?;
        registry.register(Box::new(failover_total.clone()))?;
        registry.register(Box::new(authorization_denied_total.clone()))?;
        registry.register(Box::new(connection_reachable.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            dispatch_total,
            dispatch_duration_seconds,
            transport_failures_total,
            failover_total,
            authorization_denied_total,
            connection_reachable,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a finished dispatch
    pub fn record_dispatch(
        &self,
        subsystem: &str,
        method: &str,
        outcome: DispatchOutcome,
        duration_secs: f64,
    ) {
        self.dispatch_total
            .with_label_values(&[subsystem, method, outcome.as_str()])
            .inc();
        self.dispatch_duration_seconds
            .with_label_values(&[subsystem, method])
            .observe(duration_secs);
    }

    pub fn record_transport_failure(&self, tenant: &str, subsystem: &str, connection: &str) {
        self.transport_failures_total
            .with_label_values(&[tenant, subsystem, connection])
            .inc();
    }

    pub fn record_failover(&self, tenant: &str, subsystem: &str) {
        self.failover_total
            .with_label_values(&[tenant, subsystem])
            .inc();
    }

    pub fn record_denied(&self, tenant: &str, method: &str) {
        self.authorization_denied_total
            .with_label_values(&[tenant, method])
            .inc();
    }

    pub fn set_connection_reachable(
        &self,
        tenant: &str,
        subsystem: &str,
        connection: &str,
        reachable: bool,
    ) {
        self.connection_reachable
            .with_label_values(&[tenant, subsystem, connection])
            .set(if reachable { 1.0 } else { 0.0 });
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = DispatchMetrics::new().unwrap();
        metrics.record_dispatch("*caches", "CacheSv1.Ping", DispatchOutcome::Success, 0.01);
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_record_dispatch_counts_by_outcome() {
        let metrics = DispatchMetrics::new().unwrap();
        metrics.record_dispatch("*caches", "CacheSv1.Clear", DispatchOutcome::Success, 0.2);
        metrics.record_dispatch("*caches", "CacheSv1.Clear", DispatchOutcome::Success, 0.1);
        metrics.record_dispatch("*caches", "CacheSv1.Clear", DispatchOutcome::Partial, 0.3);

        let ok = metrics
            .dispatch_total
            .with_label_values(&["*caches", "CacheSv1.Clear", "success"])
            .get();
        let partial = metrics
            .dispatch_total
            .with_label_values(&["*caches", "CacheSv1.Clear", "partial"])
            .get();
        assert_eq!(ok, 2.0);
        assert_eq!(partial, 1.0);
    }

    #[test]
    fn test_connection_reachable_gauge() {
        let metrics = DispatchMetrics::new().unwrap();
        metrics.set_connection_reachable("cgrates.org", "*caches", "cache1", true);
        metrics.set_connection_reachable("cgrates.org", "*caches", "cache1", false);

        let value = metrics
            .connection_reachable
            .with_label_values(&["cgrates.org", "*caches", "cache1"])
            .get();
        assert_eq!(value, 0.0);
    }

    #[test]
    fn test_gather_text_contains_metric_names() {
        let metrics = DispatchMetrics::new().unwrap();
        metrics.record_denied("cgrates.org", "CacheSv1.FlushCache");
        metrics.record_failover("cgrates.org", "*caches");
        metrics.record_transport_failure("cgrates.org", "*caches", "cache2");

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("cachegate_authorization_denied_total"));
        assert!(text.contains("cachegate_failover_total"));
        assert!(text.contains("cachegate_transport_failures_total"));
    }
}
