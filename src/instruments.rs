//! Request Instruments
//!
//! The tracer, the `/hello` counter and the span ledger, built once from the
//! telemetry providers and shared by every request through `AppState`.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::{Method, Version};
use opentelemetry::metrics::{Counter, MeterProvider as _};
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry::{Context, InstrumentationScope, KeyValue};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};

pub const TRACER_NAME: &str = "MWatkins.DyinTrace.Lab";
pub const METER_NAME: &str = "hello-count";
pub const METER_VERSION: &str = "1.0.0";
pub const COUNTER_NAME: &str = "request_counter";

const HELLO_DIMENSION: (&str, &str) = ("hello", "hello was called!");

/// Opened/closed span counts
///
/// The two values are equal whenever no request is in flight.
#[derive(Debug, Default)]
pub struct SpanLedger {
    opened: AtomicU64,
    closed: AtomicU64,
}

impl SpanLedger {
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> u64 {
        self.opened().saturating_sub(self.closed())
    }
}

pub struct RequestInstruments {
    tracer: SdkTracer,
    counter: Counter<u64>,
    ledger: SpanLedger,
}

impl RequestInstruments {
    pub fn new(tracer_provider: &SdkTracerProvider, meter_provider: &SdkMeterProvider) -> Self {
        let tracer = tracer_provider.tracer(TRACER_NAME);

        let scope = InstrumentationScope::builder(METER_NAME)
            .with_version(METER_VERSION)
            .build();
        let counter = meter_provider
            .meter_with_scope(scope)
            .u64_counter(COUNTER_NAME)
            .with_description("Number of /hello requests served")
            .build();

        Self {
            tracer,
            counter,
            ledger: SpanLedger::default(),
        }
    }

    /// Open a root server span tagged with the request's method and protocol.
    pub fn start_span(
        &self,
        name: impl Into<Cow<'static, str>>,
        method: &Method,
        version: Version,
    ) -> RequestSpan<'_> {
        let span = self
            .tracer
            .span_builder(name)
            .with_kind(SpanKind::Server)
            .with_attributes([
                KeyValue::new("http.method", method.as_str().to_string()),
                KeyValue::new("net.protocol.version", protocol_version(version)),
            ])
            .start_with_context(&self.tracer, &Context::new());

        self.ledger.opened.fetch_add(1, Ordering::SeqCst);

        RequestSpan {
            cx: Context::new().with_span(span),
            ledger: &self.ledger,
        }
    }

    pub fn record_hello(&self) {
        let (key, value) = HELLO_DIMENSION;
        self.counter.add(1, &[KeyValue::new(key, value)]);
    }

    pub fn ledger(&self) -> &SpanLedger {
        &self.ledger
    }
}

/// Span of one request; ended when dropped.
pub struct RequestSpan<'a> {
    cx: Context,
    ledger: &'a SpanLedger,
}

impl RequestSpan<'_> {
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// Mark the span failed when `result` is an error.
    pub fn observe<T, E: std::fmt::Display>(&self, result: Result<T, E>) -> Result<T, E> {
        if let Err(e) = &result {
            self.cx.span().set_status(Status::error(e.to_string()));
        }
        result
    }
}

impl Drop for RequestSpan<'_> {
    fn drop(&mut self) {
        self.cx.span().end();
        self.ledger.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn protocol_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_11 => "1.1",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "unknown",
    }
}
