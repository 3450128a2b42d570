//! Error types for telemetry setup

use thiserror::Error;

/// Result type alias for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Collector URL could not be used as an OTLP endpoint
    #[error("Invalid collector endpoint {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// Token cannot be sent as an HTTP header value
    #[error("Invalid collector token: {0}")]
    InvalidHeader(String),

    #[error("Exporter error: {0}")]
    Exporter(String),

    /// The global `tracing` subscriber was already installed
    #[error("Subscriber error: {0}")]
    Subscriber(String),
}
