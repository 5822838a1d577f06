//! NexusX dynamic auction pricing service
//!
//! Runs the Price Updater worker on a timer and exposes a minimal HTTP
//! surface: a health check and a WebSocket that mirrors the `prices`
//! pub/sub channel for local development and smoke testing. A production
//! deployment replaces the in-memory adapters constructed here with
//! database- and broker-backed ones; the Price Updater itself is unaware
//! of the difference.

use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
    routing::get,
    Router,
};
use dotenv::dotenv;
use nexusx_pricing::pricing::adapters::{
    BroadcastTickPublisher, InMemoryHistoryStore, InMemoryListingStore, InMemoryQualityStore,
    InMemorySnapshotStore, InMemorySupplyStore,
};
use nexusx_pricing::pricing::{
    DemandTracker, ErrorReporter, PriceUpdater, PricingEngine, PricingServiceConfig, SystemClock,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
struct AppState {
    publisher: Arc<BroadcastTickPublisher>,
    engine: Arc<PricingEngine>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    info!("NexusX pricing service starting");

    let config = PricingServiceConfig::from_env().context("invalid pricing configuration")?;
    info!(preset = ?config.preset, update_interval_ms = config.pricing.update_interval_ms, "loaded pricing configuration");

    let clock = Arc::new(SystemClock);
    let engine = Arc::new(PricingEngine::new(config.pricing, clock.clone()));
    let demand_tracker = Arc::new(DemandTracker::new(config.pricing.demand_window_ms, clock.clone()));

    let listing_store = Arc::new(InMemoryListingStore::new());
    let quality_store = Arc::new(InMemoryQualityStore::new());
    let supply_store = Arc::new(InMemorySupplyStore::new());
    let history_store = Arc::new(InMemoryHistoryStore::new());
    let snapshot_store = Arc::new(InMemorySnapshotStore::new());
    let publisher = Arc::new(BroadcastTickPublisher::new(1024));
    let error_reporter = Arc::new(ErrorReporter::spawn(256));

    let updater = Arc::new(PriceUpdater::new(
        config.clone(),
        engine.clone(),
        demand_tracker.clone(),
        listing_store.clone(),
        quality_store.clone(),
        supply_store.clone(),
        None,
        publisher.clone(),
        history_store.clone(),
        snapshot_store.clone(),
        clock.clone(),
        error_reporter,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = {
        let updater = updater.clone();
        tokio::spawn(async move {
            if let Err(e) = updater.run(shutdown_rx).await {
                error!(error = %e, "price updater worker exited with error");
            }
        })
    };

    let app_state = AppState {
        publisher: publisher.clone(),
        engine: engine.clone(),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ws/prices", get(prices_ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr: SocketAddr = env::var("PRICING_BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3100".to_string())
        .parse()
        .context("invalid PRICING_BIND_ADDR")?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "pricing service HTTP surface listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("HTTP server error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        warn!(error = %e, "price updater task panicked during shutdown");
    }

    Ok(())
}

async fn health_check(State(state): State<AppState>) -> &'static str {
    let _ = state.engine.config();
    "ok"
}

async fn prices_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_prices_socket(socket, state))
}

async fn handle_prices_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.publisher.subscribe();
    loop {
        tokio::select! {
            tick = rx.recv() => {
                let tick = match tick {
                    Ok(tick) => tick,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "price tick websocket subscriber lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                let payload = match serde_json::to_string(&tick) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize price tick");
                        continue;
                    }
                };
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                if msg.is_none() {
                    break;
                }
            }
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nexusx_pricing=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    let _ = dotenv();
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    for candidate in [manifest_dir.join(".env"), manifest_dir.join("../.env")] {
        if candidate.exists() {
            let _ = dotenv::from_path(&candidate);
        }
    }
}
