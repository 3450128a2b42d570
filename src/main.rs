//! Hello Telemetry
//!
//! Starts the `/hello` + `/ready` service with OpenTelemetry export.
//! Configuration comes from the environment (see `config`).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use hello_telemetry::agent::{report_agent, select_agent, StdErrLoggingCallback};
use hello_telemetry::metadata::{default_sources, load_metadata};
use hello_telemetry::{init_telemetry, serve, AppState, Settings};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env();
    let metadata = load_metadata(&default_sources());

    let telemetry = init_telemetry(&settings.telemetry, &metadata)
        .context("Failed to initialize telemetry")?;

    for warning in settings.warnings() {
        warn!("{}", warning);
    }

    info!("🚀 Starting {}", settings.telemetry.service_name);

    let agent = select_agent(settings.agent_mode, telemetry.resource(), telemetry.is_exporting());
    agent.set_logging_callback(Arc::new(StdErrLoggingCallback));
    report_agent(agent.as_ref());

    let state = AppState::new(Arc::new(telemetry.instruments()), agent);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("📡 Listening on {}", addr);

    serve(listener, state, shutdown_signal()).await?;

    info!("Flushing telemetry");
    drop(telemetry);

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    warn!("Received shutdown signal");
}
