use std::sync::{Arc, RwLock};

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use driftwatch::config::Config;
use driftwatch::dispatch::{self, QUEUE_CAPACITY, SharedStore};
use driftwatch::hub::Hub;
use driftwatch::server::{self, AppState};
use driftwatch::store::VesselStore;
use driftwatch::stream;

#[tokio::main]
async fn main() -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let crate_name = env!("CARGO_PKG_NAME").replace('-', "_");
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(format!("{crate_name}=debug").parse()?);
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();

    // A missing upstream API key is fatal before anything is spawned.
    let config = Config::from_env()?;
    info!("starting {crate_name}");
    if config.llm_api_key.is_none() {
        debug!("LLM_API_KEY not set; chat assistant disabled");
    }

    let store: SharedStore = Arc::new(RwLock::new(VesselStore::new()));
    let hub = Hub::new();
    let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ingest = tokio::spawn(stream::run_ingest(
        config.ais_api_key.clone(),
        queue_tx.clone(),
    ));
    let dispatcher = tokio::spawn(dispatch::run_dispatcher(
        store.clone(),
        hub.clone(),
        queue_rx,
        shutdown_rx,
    ));

    let state = AppState {
        store,
        hub,
        queue: queue_tx,
    };
    let app = server::router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("server running on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Ingestion stops immediately; the dispatcher drains what is queued.
    ingest.abort();
    let _ = shutdown_tx.send(true);
    let _ = dispatcher.await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
