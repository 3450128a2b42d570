//! Telemetry module
//!
//! Sets up OpenTelemetry with:
//! - Trace provider (OTLP HTTP/protobuf, batched, always sampled)
//! - Meter provider (OTLP HTTP/protobuf, delta temporality)
//! - Logger provider (resource only, no exporter)
//! - tracing-subscriber integration

mod error;
mod init;

pub use error::{TelemetryError, TelemetryResult};
pub use init::{build_pipelines, init_telemetry, CollectorEndpoints, TelemetryGuard};
