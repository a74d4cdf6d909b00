//! # Parley Server
//!
//! Main binary that orchestrates both Parley services:
//! - REST API (HTTP): auth, users, message history
//! - WebSocket Gateway: presence, chat delivery, call signaling
//!
//! Both run in a single process on separate ports.

use parley_api::AppState;
use parley_db::Database;
use parley_gateway::GatewayState;
use parley_gateway::store::Store;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = parley_common::config::init()?;

    // Initialize tracing (structured logging)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .with_target(true)
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));

    // Connect to the database and run migrations
    let db = Database::connect(config).await?;
    db.migrate().await?;

    // Startup reconciliation: no connection handle from a previous process
    // incarnation can be valid, so force every user offline before accepting
    // connections.
    let store: Arc<dyn Store> = Arc::new(db.clone());
    let reset = store.reset_presence().await?;
    if reset > 0 {
        tracing::info!(users = reset, "Cleared stale presence state");
    }

    // === REST API Server ===
    let api_state = AppState { db: db.clone() };
    let api_router = parley_api::build_router(api_state);
    let api_addr = SocketAddr::new(config.server.host.parse()?, config.server.port);

    // === WebSocket Gateway ===
    let gateway_state = GatewayState::new(store);
    let gateway_router = parley_gateway::build_router(gateway_state);
    let gateway_addr = SocketAddr::new(config.server.host.parse()?, config.server.gateway_port);

    tracing::info!("REST API listening on http://{api_addr}");
    tracing::info!("Gateway listening on ws://{gateway_addr}");

    // Run both servers concurrently
    tokio::try_join!(
        async {
            let listener = tokio::net::TcpListener::bind(api_addr).await?;
            axum::serve(listener, api_router).await?;
            Ok::<_, anyhow::Error>(())
        },
        async {
            let listener = tokio::net::TcpListener::bind(gateway_addr).await?;
            axum::serve(listener, gateway_router).await?;
            Ok::<_, anyhow::Error>(())
        },
    )?;

    Ok(())
}
