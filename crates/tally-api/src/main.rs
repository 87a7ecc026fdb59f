//! # tally-api entry point
//!
//! Builds the settlement engine over an in-memory ledger and job store,
//! mounts the router, and serves until interrupted. Shutdown drains
//! in-flight settlement jobs before the process exits.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use tally_api::{app, AppState};
use tally_ledger::LedgerStore;
use tally_settlement::{EngineConfig, InstantRail, SettlementEngine, TracingSink};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let ledger = LedgerStore::new();
    let engine = SettlementEngine::start(
        ledger,
        Arc::new(InstantRail::new()),
        Arc::new(TracingSink),
        EngineConfig::default(),
    )?;

    let addr: SocketAddr = std::env::var("TALLY_API_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "tally-api listening");

    let router = app(AppState::new(Arc::clone(&engine)));
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("interrupt received; draining");
        })
        .await?;

    engine.shutdown().await;
    Ok(())
}
