//! Metrics and monitoring using Prometheus.
//!
//! Exposed on the gateway's `/metrics` endpoint:
//!
//! - **Counters**: messages published, publish failures, deliveries, acks,
//!   nacks, ack failures, subscriber channel failures
//! - **Histograms**: publish latency
//! - **Gauges**: open channels per kind

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use tracing::error;

/// Global metrics registry
static METRICS_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Global metrics instance
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    let metrics = Metrics::new();
    if let Err(e) = metrics.register(&METRICS_REGISTRY) {
        error!("Failed to register metrics: {}", e);
    }
    Arc::new(metrics)
});

/// Metrics collector for psgate
pub struct Metrics {
    /// Total messages published, by topic (counter)
    pub messages_published_total: IntCounterVec,
    /// Total publish failures, by topic and error kind (counter)
    pub publish_failures_total: IntCounterVec,
    /// Total messages delivered to the handler, by subscription (counter)
    pub messages_received_total: IntCounterVec,
    /// Total positive acknowledgments, by subscription (counter)
    pub acks_total: IntCounterVec,
    /// Total negative acknowledgments, by subscription (counter)
    pub nacks_total: IntCounterVec,
    /// Total failed acknowledgment RPCs, by subscription (counter)
    pub ack_failures_total: IntCounterVec,
    /// Total unrecoverable subscriber channel failures (counter)
    pub subscriber_failures_total: IntCounter,

    /// Publish latency in seconds, by topic (histogram)
    pub publish_latency_seconds: HistogramVec,

    /// Currently open channels, by kind (gauge)
    pub open_channels: IntGaugeVec,
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        let messages_published_total = IntCounterVec::new(
            Opts::new("psgate_messages_published_total", "Total messages published"),
            &["topic"],
        )
        .expect("Failed to create messages_published_total metric");

        let publish_failures_total = IntCounterVec::new(
            Opts::new("psgate_publish_failures_total", "Total publish failures"),
            &["topic", "kind"],
        )
        .expect("Failed to create publish_failures_total metric");

        let messages_received_total = IntCounterVec::new(
            Opts::new(
                "psgate_messages_received_total",
                "Total messages delivered to the handler",
            ),
            &["subscription"],
        )
        .expect("Failed to create messages_received_total metric");

        let acks_total = IntCounterVec::new(
            Opts::new("psgate_acks_total", "Total positive acknowledgments"),
            &["subscription"],
        )
        .expect("Failed to create acks_total metric");

        let nacks_total = IntCounterVec::new(
            Opts::new("psgate_nacks_total", "Total negative acknowledgments"),
            &["subscription"],
        )
        .expect("Failed to create nacks_total metric");

        let ack_failures_total = IntCounterVec::new(
            Opts::new(
                "psgate_ack_failures_total",
                "Total failed acknowledgment RPCs",
            ),
            &["subscription"],
        )
        .expect("Failed to create ack_failures_total metric");

        let subscriber_failures_total = IntCounter::new(
            "psgate_subscriber_failures_total",
            "Total unrecoverable subscriber channel failures",
        )
        .expect("Failed to create subscriber_failures_total metric");

        let publish_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "psgate_publish_latency_seconds",
                "Publish latency in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["topic"],
        )
        .expect("Failed to create publish_latency_seconds metric");

        let open_channels = IntGaugeVec::new(
            Opts::new("psgate_open_channels", "Currently open channels"),
            &["kind"],
        )
        .expect("Failed to create open_channels metric");

        Self {
            messages_published_total,
            publish_failures_total,
            messages_received_total,
            acks_total,
            nacks_total,
            ack_failures_total,
            subscriber_failures_total,
            publish_latency_seconds,
            open_channels,
        }
    }

    /// Register all metrics with the registry
    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.messages_published_total.clone()))?;
        registry.register(Box::new(self.publish_failures_total.clone()))?;
        registry.register(Box::new(self.messages_received_total.clone()))?;
        registry.register(Box::new(self.acks_total.clone()))?;
        registry.register(Box::new(self.nacks_total.clone()))?;
        registry.register(Box::new(self.ack_failures_total.clone()))?;
        registry.register(Box::new(self.subscriber_failures_total.clone()))?;
        registry.register(Box::new(self.publish_latency_seconds.clone()))?;
        registry.register(Box::new(self.open_channels.clone()))?;
        Ok(())
    }

    /// Gather metrics in Prometheus text format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = METRICS_REGISTRY.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the global metrics instance
pub fn get_metrics() -> Arc<Metrics> {
    METRICS.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        metrics
            .messages_published_total
            .with_label_values(&["test-topic"])
            .inc();
    }

    #[test]
    fn test_metrics_gather() {
        let metrics = get_metrics();
        metrics
            .messages_received_total
            .with_label_values(&["test-sub"])
            .inc();
        let output = metrics.gather().expect("Failed to gather metrics");
        assert!(output.contains("psgate_"));
    }

    #[test]
    fn test_global_metrics_lazy_initialization() {
        let metrics1 = get_metrics();
        let metrics2 = get_metrics();
        assert!(Arc::ptr_eq(&metrics1, &metrics2));
    }
}
