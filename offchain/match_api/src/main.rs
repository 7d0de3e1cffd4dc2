use anyhow::Context;
use clap::Parser;
use match_api::feed::spawn_synthetic;
use match_api::{router, AppState, ServerConfig};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let state = AppState::new(config.clone());
    state.settlement.clone().spawn(state.ledger.clone());
    if !config.no_synthetic_feed {
        for symbol in &config.symbols {
            spawn_synthetic(state.feed.clone(), symbol.to_uppercase(), config.start_price, config.feed_interval());
        }
    }

    let listener = TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("binding {}", config.addr))?;
    info!(
        addr = %config.addr,
        symbols = ?config.symbols,
        server_clock = !config.client_clock,
        settlement = state.settlement.is_active(),
        "match api listening"
    );
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("match api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // no signal handler available; run until killed
        std::future::pending::<()>().await;
    }
}
