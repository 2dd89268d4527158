use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use order_claim::api;
use order_claim::config::Config;
use order_claim::engine::expiry::run_expiry_sweeper;
use order_claim::error::AppError;
use order_claim::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let shared_state = Arc::new(AppState::from_config(&config));

    let app = api::rest::router(shared_state.clone());

    match config.offer_expiry() {
        Some(expiry) => {
            tokio::spawn(run_expiry_sweeper(
                shared_state.clone(),
                expiry,
                Duration::from_secs(config.expiry_sweep_interval_secs),
            ));
        }
        None => tracing::warn!("server-side offer expiry disabled"),
    }

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
