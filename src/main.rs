use std::sync::Arc;

use ride_lifecycle::api;
use ride_lifecycle::config::Config;
use ride_lifecycle::engine::dispatch::run_offer_dispatcher;
use ride_lifecycle::error::AppError;
use ride_lifecycle::state::AppState;
use ride_lifecycle::store::RideStore;
use ride_lifecycle::store::memory::MemoryStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let store: Arc<dyn RideStore> = Arc::new(MemoryStore::new(config.event_buffer_size));
    let (app_state, dispatch_rx) = AppState::new(config.clone(), store.clone());
    let shared_state = Arc::new(app_state);

    tokio::spawn(run_offer_dispatcher(
        store,
        config.clone(),
        shared_state.metrics.clone(),
        shared_state.dispatch_tx.clone(),
        dispatch_rx,
    ));

    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    for entry in shared_state.sessions.iter() {
        entry.value().controller().close();
    }
    shared_state.sessions.clear();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
