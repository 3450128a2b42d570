//! Telemetry initialization
//!
//! One resource, three providers. Traces and metrics go to the collector over
//! OTLP HTTP/protobuf; the logger provider only carries the resource.

use std::collections::{BTreeMap, HashMap};

use axum::http::HeaderValue;
use opentelemetry::{global, KeyValue};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{MetricExporter, Protocol, SpanExporter, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider, Temporality};
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

use super::error::{TelemetryError, TelemetryResult};
use crate::config::{LogFormat, TelemetrySettings};
use crate::instruments::RequestInstruments;

const TRACES_PATH: &str = "/v1/traces";
const METRICS_PATH: &str = "/v1/metrics";

/// Signal endpoints and credentials derived from the collector base URL
pub struct CollectorEndpoints {
    pub traces: String,
    pub metrics: String,
    token: String,
}

impl CollectorEndpoints {
    /// Returns `None` when no collector is configured.
    pub fn resolve(base_url: &str, token: &str) -> TelemetryResult<Option<Self>> {
        let base_url = base_url.trim();
        if base_url.is_empty() {
            return Ok(None);
        }

        let invalid = |reason: String| TelemetryError::InvalidEndpoint {
            url: base_url.to_string(),
            reason,
        };

        let parsed = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {:?}", parsed.scheme())));
        }
        if parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(invalid("query and fragment are not allowed".to_string()));
        }

        HeaderValue::from_str(&authorization(token))
            .map_err(|e| TelemetryError::InvalidHeader(e.to_string()))?;

        let base = base_url.trim_end_matches('/');
        Ok(Some(Self {
            traces: format!("{}{}", base, TRACES_PATH),
            metrics: format!("{}{}", base, METRICS_PATH),
            token: token.to_string(),
        }))
    }

    pub fn headers(&self) -> HashMap<String, String> {
        HashMap::from([("Authorization".to_string(), authorization(&self.token))])
    }
}

fn authorization(token: &str) -> String {
    format!("Api-Token {}", token)
}

/// Owns the providers; dropping it flushes and shuts them down.
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    logger_provider: SdkLoggerProvider,
    resource: Resource,
    exporting: bool,
}

impl TelemetryGuard {
    /// Instruments for the HTTP service, bound to these providers.
    pub fn instruments(&self) -> RequestInstruments {
        RequestInstruments::new(&self.tracer_provider, &self.meter_provider)
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Whether traces and metrics leave the process.
    pub fn is_exporting(&self) -> bool {
        self.exporting
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.meter_provider.shutdown() {
            eprintln!("Failed to shutdown meter provider: {:?}", e);
        }
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("Failed to shutdown tracer provider: {:?}", e);
        }
        if let Err(e) = self.logger_provider.shutdown() {
            eprintln!("Failed to shutdown logger provider: {:?}", e);
        }
    }
}

/// Build the providers without touching any process-wide state.
pub fn build_pipelines(
    settings: &TelemetrySettings,
    attributes: &BTreeMap<String, String>,
) -> TelemetryResult<TelemetryGuard> {
    let endpoints = CollectorEndpoints::resolve(&settings.collector_url, &settings.collector_token)?;
    let resource = build_resource(&settings.service_name, attributes);

    let mut tracer_builder = SdkTracerProvider::builder()
        .with_resource(resource.clone())
        .with_sampler(Sampler::AlwaysOn);
    let mut meter_builder = SdkMeterProvider::builder().with_resource(resource.clone());

    if let Some(endpoints) = &endpoints {
        tracer_builder = tracer_builder.with_batch_exporter(span_exporter(endpoints)?);
        let reader = PeriodicReader::builder(metric_exporter(endpoints)?).build();
        meter_builder = meter_builder.with_reader(reader);
    }

    let logger_provider = SdkLoggerProvider::builder()
        .with_resource(resource.clone())
        .build();

    Ok(TelemetryGuard {
        tracer_provider: tracer_builder.build(),
        meter_provider: meter_builder.build(),
        logger_provider,
        resource,
        exporting: endpoints.is_some(),
    })
}

/// Build the providers, register them globally and install the subscriber.
///
/// Keep the returned guard alive for the lifetime of the process.
pub fn init_telemetry(
    settings: &TelemetrySettings,
    attributes: &BTreeMap<String, String>,
) -> TelemetryResult<TelemetryGuard> {
    let guard = build_pipelines(settings, attributes)?;

    global::set_tracer_provider(guard.tracer_provider.clone());
    global::set_meter_provider(guard.meter_provider.clone());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_bridge = OpenTelemetryTracingBridge::new(&guard.logger_provider);

    let installed = match settings.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(log_bridge)
            .with(fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(log_bridge)
            .with(fmt::layer())
            .try_init(),
    };
    installed.map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    tracing::info!(
        service.name = %settings.service_name,
        otel.exporting = guard.exporting,
        log.format = %settings.log_format,
        resource.attributes = attributes.len(),
        "Telemetry initialized"
    );

    Ok(guard)
}

fn build_resource(service_name: &str, attributes: &BTreeMap<String, String>) -> Resource {
    Resource::builder()
        .with_service_name(service_name.to_string())
        .with_attribute(KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")))
        .with_attributes(
            attributes
                .iter()
                .map(|(key, value)| KeyValue::new(key.clone(), value.clone())),
        )
        .build()
}

fn span_exporter(endpoints: &CollectorEndpoints) -> TelemetryResult<SpanExporter> {
    SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoints.traces.clone())
        .with_headers(endpoints.headers())
        .build()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))
}

fn metric_exporter(endpoints: &CollectorEndpoints) -> TelemetryResult<MetricExporter> {
    MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoints.metrics.clone())
        .with_headers(endpoints.headers())
        .with_temporality(Temporality::Delta)
        .build()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::metrics::exporter::PushMetricExporter;

    fn settings(url: &str, token: &str) -> TelemetrySettings {
        TelemetrySettings {
            service_name: "hello-telemetry-test".to_string(),
            collector_url: url.to_string(),
            collector_token: token.to_string(),
            log_format: LogFormat::Pretty,
        }
    }

    fn attribute(resource: &Resource, key: &str) -> Option<String> {
        resource
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v.to_string())
    }

    #[test]
    fn test_resolve_endpoints() {
        let endpoints = CollectorEndpoints::resolve("https://abc.example.com/api/v2/otlp/", "tok")
            .unwrap()
            .unwrap();
        assert_eq!(endpoints.traces, "https://abc.example.com/api/v2/otlp/v1/traces");
        assert_eq!(endpoints.metrics, "https://abc.example.com/api/v2/otlp/v1/metrics");
        assert_eq!(
            endpoints.headers().get("Authorization").map(String::as_str),
            Some("Api-Token tok")
        );
    }

    #[test]
    fn test_resolve_empty_url_disables_export() {
        assert!(CollectorEndpoints::resolve("", "tok").unwrap().is_none());
        assert!(CollectorEndpoints::resolve("   ", "").unwrap().is_none());
    }

    #[test]
    fn test_resolve_rejects_malformed_url() {
        for url in ["not a url", "ftp://collector.example.com", "http://host/otlp?x=1"] {
            let err = CollectorEndpoints::resolve(url, "tok").err();
            assert!(
                matches!(err, Some(TelemetryError::InvalidEndpoint { .. })),
                "{} should be rejected",
                url
            );
        }
    }

    #[test]
    fn test_resolve_rejects_unsendable_token() {
        let err = CollectorEndpoints::resolve("http://localhost:4318", "bad\ntoken").err();
        assert!(matches!(err, Some(TelemetryError::InvalidHeader(_))));
    }

    #[test]
    fn test_metric_exporter_uses_delta() {
        let endpoints = CollectorEndpoints::resolve("http://127.0.0.1:4318", "tok")
            .unwrap()
            .unwrap();
        let exporter = metric_exporter(&endpoints).unwrap();
        assert_eq!(exporter.temporality(), Temporality::Delta);
    }

    #[test]
    fn test_resource_carries_metadata() {
        let attributes = BTreeMap::from([
            ("dt.entity.host".to_string(), "HOST-1".to_string()),
            ("dt.host_group.id".to_string(), "lab".to_string()),
        ]);
        let guard = build_pipelines(&settings("", ""), &attributes).unwrap();

        let resource = guard.resource();
        assert_eq!(
            attribute(resource, "service.name").as_deref(),
            Some("hello-telemetry-test")
        );
        assert_eq!(attribute(resource, "dt.entity.host").as_deref(), Some("HOST-1"));
        assert_eq!(attribute(resource, "dt.host_group.id").as_deref(), Some("lab"));
        assert!(!guard.is_exporting());
    }

    #[test]
    fn test_build_pipelines_with_collector() {
        let guard = build_pipelines(&settings("http://127.0.0.1:4318", "tok"), &BTreeMap::new())
            .unwrap();
        assert!(guard.is_exporting());

        let instruments = guard.instruments();
        instruments.record_hello();
        drop(instruments.start_span(
            "Call to /hello",
            &axum::http::Method::GET,
            axum::http::Version::HTTP_11,
        ));
        assert_eq!(instruments.ledger().closed(), 1);
    }

    #[test]
    fn test_build_pipelines_rejects_bad_url() {
        let result = build_pipelines(&settings("::nope::", "tok"), &BTreeMap::new());
        assert!(matches!(result, Err(TelemetryError::InvalidEndpoint { .. })));
    }
}
