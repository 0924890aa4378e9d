//! Server startup and lifecycle

use crate::{routes, AppState, GatewayConfig, HealthMonitor, HealthReporter};
use anyhow::Context;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Run the gateway server until the process exits
pub async fn run_server(config: GatewayConfig) -> anyhow::Result<()> {
    run_server_with_shutdown(config, std::future::pending()).await
}

/// Run server with graceful shutdown
pub async fn run_server_with_shutdown(
    config: GatewayConfig,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let (state, reporter) = AppState::new(config.clone())?;

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    serve(listener, state, reporter, shutdown_signal).await
}

/// Serve on an already bound listener.
///
/// The health monitor runs for as long as the server does.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    reporter: HealthReporter,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let monitor = HealthMonitor::new(
        Arc::clone(&state.store),
        reporter,
        state.config.health_check_interval(),
    )
    .spawn();

    let app = routes::create_router(Arc::new(state));

    info!("Partstream gateway listening on http://{}", listener.local_addr()?);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await;
    monitor.abort();
    result?;

    info!("Gateway shutdown complete");

    Ok(())
}
