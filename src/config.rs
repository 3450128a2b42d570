//! Service Configuration
//!
//! Everything is read from the process environment once at startup.
//! Bad or missing values fall back to defaults; the fallbacks are collected
//! as warnings so they can be logged after the subscriber is installed.

use std::fmt;

use crate::agent::AgentMode;

pub const ENV_COLLECTOR_URL: &str = "DYINTRACE_API_URL";
pub const ENV_COLLECTOR_TOKEN: &str = "DYINTRACE_API_TOKEN";
pub const ENV_PORT: &str = "API_PORT";
pub const ENV_AGENT_MODE: &str = "DYINTRACE_AGENT";
pub const ENV_SERVICE_NAME: &str = "DYINTRACE_SERVICE_NAME";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_SERVICE_NAME: &str = "Mwatkins-Dyintrace-lab";

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub port_source: PortSource,
    pub agent_mode: AgentMode,
    pub telemetry: TelemetrySettings,
    warnings: Vec<String>,
}

/// Where the listening port came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSource {
    Env,
    DefaultUnset,
    DefaultUnparsable(String),
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub service_name: String,
    /// Collector base URL; `/v1/traces` and `/v1/metrics` are appended
    pub collector_url: String,
    pub collector_token: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        let (port, port_source) = parse_port(lookup(ENV_PORT));
        match &port_source {
            PortSource::Env => {}
            PortSource::DefaultUnset => warnings.push(format!(
                "{} not set in env, resorting to default {}",
                ENV_PORT, DEFAULT_PORT
            )),
            PortSource::DefaultUnparsable(raw) => warnings.push(format!(
                "{}={:?} is not a valid port, resorting to default {}",
                ENV_PORT, raw, DEFAULT_PORT
            )),
        }

        let agent_mode = match lookup(ENV_AGENT_MODE) {
            None => AgentMode::default(),
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warnings.push(format!(
                    "{}={:?} is not a known agent mode, using {}",
                    ENV_AGENT_MODE,
                    raw,
                    AgentMode::default()
                ));
                AgentMode::default()
            }),
        };

        let log_format = match lookup(ENV_LOG_FORMAT).as_deref().map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let collector_url = lookup(ENV_COLLECTOR_URL).unwrap_or_default();
        if collector_url.trim().is_empty() {
            warnings.push(format!(
                "{} not set in env, telemetry will not be exported",
                ENV_COLLECTOR_URL
            ));
        }

        let service_name = lookup(ENV_SERVICE_NAME)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        Self {
            port,
            port_source,
            agent_mode,
            telemetry: TelemetrySettings {
                service_name,
                collector_url,
                collector_token: lookup(ENV_COLLECTOR_TOKEN).unwrap_or_default(),
                log_format,
            },
            warnings,
        }
    }

    /// Fallbacks taken while reading the environment.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

fn parse_port(raw: Option<String>) -> (u16, PortSource) {
    match raw {
        None => (DEFAULT_PORT, PortSource::DefaultUnset),
        Some(raw) => match raw.trim().parse::<u16>() {
            Ok(port) => (port, PortSource::Env),
            Err(_) => (DEFAULT_PORT, PortSource::DefaultUnparsable(raw)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_port_defaults_when_unset() {
        let settings = settings_from(&[]);
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.port_source, PortSource::DefaultUnset);
        assert!(settings.warnings().iter().any(|w| w.contains("API_PORT")));
    }

    #[test]
    fn test_port_from_env() {
        let settings = settings_from(&[("API_PORT", "8080")]);
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.port_source, PortSource::Env);
        assert!(!settings.warnings().iter().any(|w| w.contains("API_PORT")));
    }

    #[test]
    fn test_unparsable_port_behaves_like_unset() {
        let unset = settings_from(&[]);
        let garbage = settings_from(&[("API_PORT", "abc")]);
        assert_eq!(garbage.port, unset.port);
        assert_eq!(
            garbage.port_source,
            PortSource::DefaultUnparsable("abc".to_string())
        );
        assert!(garbage.warnings().iter().any(|w| w.contains("API_PORT")));

        let overflow = settings_from(&[("API_PORT", "70000")]);
        assert_eq!(overflow.port, DEFAULT_PORT);
    }

    #[test]
    fn test_collector_settings() {
        let settings = settings_from(&[
            ("DYINTRACE_API_URL", "https://abc123.live.example.com/api/v2/otlp"),
            ("DYINTRACE_API_TOKEN", "dt0c01.secret"),
        ]);
        assert_eq!(
            settings.telemetry.collector_url,
            "https://abc123.live.example.com/api/v2/otlp"
        );
        assert_eq!(settings.telemetry.collector_token, "dt0c01.secret");
        assert_eq!(settings.telemetry.service_name, DEFAULT_SERVICE_NAME);
        assert!(!settings
            .warnings()
            .iter()
            .any(|w| w.contains("DYINTRACE_API_URL")));
    }

    #[test]
    fn test_empty_collector_url_warns() {
        let settings = settings_from(&[("DYINTRACE_API_URL", "  ")]);
        assert!(settings
            .warnings()
            .iter()
            .any(|w| w.contains("DYINTRACE_API_URL")));
    }

    #[test]
    fn test_agent_mode_and_log_format() {
        let settings = settings_from(&[("DYINTRACE_AGENT", "none"), ("LOG_FORMAT", "JSON")]);
        assert_eq!(settings.agent_mode, AgentMode::None);
        assert_eq!(settings.telemetry.log_format, LogFormat::Json);

        let settings = settings_from(&[("DYINTRACE_AGENT", "oneagent")]);
        assert_eq!(settings.agent_mode, AgentMode::Sdk);
        assert_eq!(settings.telemetry.log_format, LogFormat::Pretty);
        assert!(settings
            .warnings()
            .iter()
            .any(|w| w.contains("DYINTRACE_AGENT")));
    }
}
