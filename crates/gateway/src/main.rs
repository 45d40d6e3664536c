use anyhow::Context;
use common::{OtlpExport, TelemetryGuard, setup_logging};
use gateway::{config::get_configuration, routes::create_router, state::AppState};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_configuration().context("failed to load configuration")?;

    let _telemetry = match &config.otel_endpoint {
        Some(endpoint) => Some(TelemetryGuard::init(
            OtlpExport {
                service_name: "gateway",
                endpoint,
                metrics_interval: Duration::from_millis(config.metrics_interval_ms),
            },
            config.log_level,
            config.environment,
        )?),
        None => {
            setup_logging(config.log_level, config.environment);
            None
        }
    };

    let state = AppState::build(&config).await?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let sampler = {
        let metrics = state.metrics.clone();
        tokio::spawn(async move {
            metrics
                .run(async move {
                    let _ = shutdown_rx.wait_for(|stop| *stop).await;
                })
                .await
        })
    };

    let app = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = sampler.await;
    state.shutdown().await;

    info!("Gateway shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}
