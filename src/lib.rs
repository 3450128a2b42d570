//! Hello Telemetry
//!
//! A small HTTP service that traces every request, counts `/hello` calls and
//! ships both to an OTLP collector. The pieces are wired explicitly at
//! startup and handed to the router as state.

pub mod agent;
pub mod config;
pub mod instruments;
pub mod metadata;
pub mod server;
pub mod telemetry;

pub use agent::{AgentInfo, AgentMode, AgentState, DiagnosticAgent, TraceContextInfo};
pub use config::Settings;
pub use instruments::{RequestInstruments, RequestSpan, SpanLedger};
pub use server::{router, serve, AppState};
pub use telemetry::{init_telemetry, TelemetryError, TelemetryGuard};
