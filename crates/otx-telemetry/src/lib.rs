//! # OTX Telemetry
//!
//! Logging and metrics bootstrap for the Open-Transactions client.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use otx_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     init_telemetry(&TelemetryConfig::from_env()).expect("Failed to init telemetry");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTX_SERVICE_NAME` | `otx-client` | Service name in logs |
//! | `OTX_LOG_LEVEL` | `info` | Log level filter |
//! | `OTX_JSON_LOGS` | `false` | JSON log lines |
//! | `OTX_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

#![warn(missing_docs)]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{init_logging, init_test_logging};
pub use metrics::{
    encode_metrics, register_metrics, AVAILABLE_NUMBERS, DELIVERIES_RESOLVED, DELIVERY_FAILURES,
    MESSAGES_SENT, REQUEST_RESYNCS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The tracing subscriber could not be installed.
    #[error("Failed to initialize logger: {0}")]
    LoggerInit(String),

    /// Prometheus registration failed.
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Initialize logging and register metrics.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    register_metrics()?;
    init_logging(config)
}
