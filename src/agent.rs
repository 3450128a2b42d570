//! Diagnostic Agent Bridge
//!
//! A narrow view of the local diagnostic agent: who it is, whether it is
//! capturing, and which trace/span the current request belongs to. Nothing
//! here influences request handling; results are only logged.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use opentelemetry::trace::{SpanId, TraceContextExt, TraceId};
use opentelemetry::Context;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::TELEMETRY_SDK_VERSION;
use tracing::{info, warn};

/// SDK release line this bridge understands.
pub const SUPPORTED_SDK_SERIES: &str = "0.31.";

/// Snapshot of the agent's identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    pub found: bool,
    pub version: String,
    pub compatible: bool,
}

/// Capture state reported by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Active,
    /// Capturing is disabled for now; tracing calls can be spared.
    TemporarilyInactive,
    /// Capturing will never start in this process.
    PermanentlyInactive,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::Active => write!(f, "sdk active"),
            AgentState::TemporarilyInactive => write!(f, "sdk inactive"),
            AgentState::PermanentlyInactive => write!(f, "sdk permanently inactive"),
        }
    }
}

/// Trace and span ids of the active span, hex encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContextInfo {
    pub trace_id: String,
    pub span_id: String,
    pub is_valid: bool,
}

impl TraceContextInfo {
    /// Marker returned when no span is active.
    pub fn invalid() -> Self {
        Self {
            trace_id: TraceId::INVALID.to_string(),
            span_id: SpanId::INVALID.to_string(),
            is_valid: false,
        }
    }
}

/// Sink for the agent's own diagnostics
pub trait LoggingCallback: Send + Sync {
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Writes agent diagnostics to stderr.
pub struct StdErrLoggingCallback;

impl LoggingCallback for StdErrLoggingCallback {
    fn warn(&self, message: &str) {
        eprintln!("[Agent SDK] Warning: {}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("[Agent SDK] Error:   {}", message);
    }
}

/// Capabilities exposed by a diagnostic agent.
pub trait DiagnosticAgent: Send + Sync {
    fn agent_info(&self) -> AgentInfo;

    fn current_state(&self) -> AgentState;

    /// Ids of the span that is current on this thread.
    ///
    /// Must not fail; returns [`TraceContextInfo::invalid`] instead.
    fn trace_context(&self) -> TraceContextInfo;

    fn set_logging_callback(&self, callback: Arc<dyn LoggingCallback>);
}

/// Which agent implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentMode {
    #[default]
    Sdk,
    None,
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentMode::Sdk => write!(f, "sdk"),
            AgentMode::None => write!(f, "none"),
        }
    }
}

impl FromStr for AgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sdk" => Ok(AgentMode::Sdk),
            "none" | "off" => Ok(AgentMode::None),
            other => Err(format!("unknown agent mode: {}", other)),
        }
    }
}

// ============================================================
// In-process agent backed by the OpenTelemetry SDK
// ============================================================

pub struct SdkAgent {
    version: Option<String>,
    exporting: bool,
    callback: RwLock<Option<Arc<dyn LoggingCallback>>>,
}

impl SdkAgent {
    /// `resource` is inspected for the SDK version; `exporting` tells whether
    /// a collector is configured.
    pub fn new(resource: &Resource, exporting: bool) -> Self {
        let version = resource
            .iter()
            .find(|(key, _)| key.as_str() == TELEMETRY_SDK_VERSION)
            .map(|(_, value)| value.to_string());

        Self {
            version,
            exporting,
            callback: RwLock::new(None),
        }
    }

    fn warn(&self, message: &str) {
        if let Ok(guard) = self.callback.read() {
            if let Some(callback) = guard.as_ref() {
                callback.warn(message);
            }
        }
    }
}

impl DiagnosticAgent for SdkAgent {
    fn agent_info(&self) -> AgentInfo {
        match &self.version {
            Some(version) => AgentInfo {
                found: true,
                version: version.clone(),
                compatible: version.starts_with(SUPPORTED_SDK_SERIES),
            },
            None => AgentInfo {
                found: false,
                version: String::new(),
                compatible: false,
            },
        }
    }

    fn current_state(&self) -> AgentState {
        match (self.version.is_some(), self.exporting) {
            (false, _) => AgentState::PermanentlyInactive,
            (true, true) => AgentState::Active,
            (true, false) => AgentState::TemporarilyInactive,
        }
    }

    fn trace_context(&self) -> TraceContextInfo {
        let span_context = Context::map_current(|cx| cx.span().span_context().clone());
        if !span_context.is_valid() {
            self.warn("trace context requested outside of an active span");
            return TraceContextInfo::invalid();
        }

        TraceContextInfo {
            trace_id: span_context.trace_id().to_string(),
            span_id: span_context.span_id().to_string(),
            is_valid: true,
        }
    }

    fn set_logging_callback(&self, callback: Arc<dyn LoggingCallback>) {
        match self.callback.write() {
            Ok(mut guard) => *guard = Some(callback),
            Err(_) => callback.error("logging callback lock poisoned"),
        }
    }
}

/// Stand-in for hosts without an agent.
pub struct NoopAgent;

impl DiagnosticAgent for NoopAgent {
    fn agent_info(&self) -> AgentInfo {
        AgentInfo {
            found: false,
            version: String::new(),
            compatible: false,
        }
    }

    fn current_state(&self) -> AgentState {
        AgentState::PermanentlyInactive
    }

    fn trace_context(&self) -> TraceContextInfo {
        TraceContextInfo::invalid()
    }

    fn set_logging_callback(&self, _callback: Arc<dyn LoggingCallback>) {}
}

pub fn select_agent(mode: AgentMode, resource: &Resource, exporting: bool) -> Arc<dyn DiagnosticAgent> {
    match mode {
        AgentMode::Sdk => Arc::new(SdkAgent::new(resource, exporting)),
        AgentMode::None => Arc::new(NoopAgent),
    }
}

/// Log what the agent reports about itself.
pub fn report_agent(agent: &dyn DiagnosticAgent) {
    let agent_info = agent.agent_info();
    if agent_info.found {
        info!(version = %agent_info.version, "Agent found");
        if agent_info.compatible {
            info!("Agent is compatible");
        } else {
            warn!(version = %agent_info.version, "Agent version is not compatible");
        }
    } else {
        info!("Agent not found");
    }

    info!(state = ?agent.current_state(), "{}", agent.current_state());
}
