//! Prometheus metrics for notary message delivery.
//!
//! All metrics follow the naming convention: `otx_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Messages handed to the connection, by command
    pub static ref MESSAGES_SENT: CounterVec = CounterVec::new(
        Opts::new("otx_messages_sent_total", "Messages sent to a notary"),
        &["command"]
    ).expect("metric creation failed");

    /// Failed exchanges, by reason (timeout, invalid_reply, error, signature)
    pub static ref DELIVERY_FAILURES: CounterVec = CounterVec::new(
        Opts::new("otx_delivery_failures_total", "Failed notary exchanges"),
        &["reason"]
    ).expect("metric creation failed");

    /// Queued deliveries resolved, by final status
    pub static ref DELIVERIES_RESOLVED: CounterVec = CounterVec::new(
        Opts::new("otx_deliveries_resolved_total", "Queued deliveries resolved"),
        &["status"]
    ).expect("metric creation failed");

    /// Request-number resynchronizations
    pub static ref REQUEST_RESYNCS: IntCounter = IntCounter::new(
        "otx_request_resyncs_total",
        "Request number resynchronizations after a rejected reply"
    ).expect("metric creation failed");

    /// Available transaction numbers after the last bookkeeping change
    pub static ref AVAILABLE_NUMBERS: IntGauge = IntGauge::new(
        "otx_available_numbers",
        "Transaction numbers available for new requests"
    ).expect("metric creation failed");
}

/// Register all delivery metrics with the global registry.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(MESSAGES_SENT.clone()),
        Box::new(DELIVERY_FAILURES.clone()),
        Box::new(DELIVERIES_RESOLVED.clone()),
        Box::new(REQUEST_RESYNCS.clone()),
        Box::new(AVAILABLE_NUMBERS.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
