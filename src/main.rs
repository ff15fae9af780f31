//! Word relay client binary: serves the local HTTP/SSE interface of one participant.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use word_relay::{
    config::EngineConfig,
    dao::game_store::memory::MemoryGameStore,
    routes,
    services::sse_service,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let app_state = AppState::new(EngineConfig::load());

    tokio::spawn(sse_service::forward_system_status(app_state.clone()));
    install_store(&app_state).await;

    let app = build_router(app_state.clone());

    let port = env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    app_state.shutdown().await;
    Ok(())
}

/// Connect to CouchDB when it is configured, otherwise play against an in-process store.
#[cfg(feature = "couch-store")]
async fn install_store(state: &SharedState) {
    use word_relay::dao::{
        game_store::{
            GameStore,
            couchdb::{CouchConfig, CouchGameStore},
        },
        storage::StorageError,
    };
    use word_relay::services::storage_supervisor;

    match CouchConfig::from_env() {
        Ok(config) => {
            info!(base_url = %config.base_url, database = %config.database, "using CouchDB store");
            tokio::spawn(storage_supervisor::run(state.clone(), move || {
                let config = config.clone();
                async move {
                    CouchGameStore::connect(config)
                        .await
                        .map(|store| Arc::new(store) as Arc<dyn GameStore>)
                        .map_err(StorageError::from)
                }
            }));
        }
        Err(err) => {
            warn!(error = %err, "CouchDB not configured; sessions are local to this process");
            state.set_game_store(Arc::new(MemoryGameStore::new())).await;
        }
    }
}

#[cfg(not(feature = "couch-store"))]
async fn install_store(state: &SharedState) {
    warn!("built without a shared store; sessions are local to this process");
    state.set_game_store(Arc::new(MemoryGameStore::new())).await;
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
