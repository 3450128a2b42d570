//! HTTP Service
//!
//! Two routes, each wrapped in a request span:
//! - `GET /hello` counts the call and answers with a fixed JSON message
//! - `GET /ready` answers 200 with an empty body

use std::future::Future;
use std::sync::Arc;

use anyhow::Context as _;
use axum::{
    extract::State,
    http::{header, Method, StatusCode, Version},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, Level};

use crate::agent::DiagnosticAgent;
use crate::instruments::{RequestInstruments, RequestSpan};

#[derive(Clone)]
pub struct AppState {
    pub instruments: Arc<RequestInstruments>,
    pub agent: Arc<dyn DiagnosticAgent>,
}

impl AppState {
    pub fn new(instruments: Arc<RequestInstruments>, agent: Arc<dyn DiagnosticAgent>) -> Self {
        Self { instruments, agent }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/hello", get(hello))
        .route("/ready", get(ready))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Serve `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error occurred")
}

// ============================================================
// Handlers
// ============================================================

#[derive(Serialize)]
struct HelloMessage {
    message: &'static str,
}

async fn hello(
    State(state): State<AppState>,
    method: Method,
    version: Version,
) -> Result<Response, AppError> {
    let span = state
        .instruments
        .start_span("Call to /hello", &method, version);
    span.observe(hello_response(&state, &span))
}

fn hello_response(state: &AppState, span: &RequestSpan<'_>) -> Result<Response, AppError> {
    state.instruments.record_hello();

    let trace = {
        let _attached = span.context().clone().attach();
        state.agent.trace_context()
    };
    info!(
        trace_id = %trace.trace_id,
        span_id = %trace.span_id,
        valid = trace.is_valid,
        "TID:{}, SID:{} valid?:{}",
        trace.trace_id,
        trace.span_id,
        trace.is_valid
    );

    let body = serde_json::to_vec(&HelloMessage {
        message: "Hello World",
    })?;

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

async fn ready(
    State(state): State<AppState>,
    method: Method,
    version: Version,
) -> Result<Response, AppError> {
    let _span = state
        .instruments
        .start_span("Call to /ready", &method, version);
    Ok(StatusCode::OK.into_response())
}

// ============================================================
// Handler errors
// ============================================================

/// Any handler failure, rendered as a 500.
pub struct AppError(anyhow::Error);

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!(error = %self, "Request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Something went wrong: {}", self),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
