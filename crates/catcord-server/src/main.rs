//! # catcord-server
//!
//! Stub HTTP server for the hosted Catcord deployment.
//!
//! Every piece of application data flows through the document store, so
//! this binary carries no protocol and no state. It provides:
//! - **`GET /`** greeting used as a liveness probe
//! - **`GET /ws`** WebSocket endpoint that logs connections and drains
//!   inbound frames

mod config;
mod ws;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,catcord_server=debug")),
        )
        .init();

    info!("Starting Catcord API server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(greeting))
        .route("/ws", get(ws::upgrade))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = config.socket_addr();
    info!(addr = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

async fn greeting() -> &'static str {
    "Bienvenue sur Catcord API !"
}
