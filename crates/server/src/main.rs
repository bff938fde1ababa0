mod api;
mod bootstrap;
mod health;
mod rates;

use std::time::Duration;

use anyhow::Result;
use receiptpath_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;
use tracing::{info, warn};

fn init_logging(config: &AppConfig) {
    use receiptpath_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = app.config.server_address();
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);

    let routes = api::router(app.state.clone()).merge(health::router(app.db_pool.clone()));
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "receiptpath-server listening"
    );

    // Stop accepting on ctrl-c, then give in-flight requests `grace` to drain.
    let (stopping_tx, mut stopping_rx) = watch::channel(false);
    let shutdown = async move {
        wait_for_shutdown().await;
        let _ = stopping_tx.send(true);
    };
    let serve = axum::serve(listener, routes).with_graceful_shutdown(shutdown);
    let mut server = tokio::spawn(async move { serve.await });

    tokio::select! {
        joined = &mut server => joined??,
        _ = async {
            let _ = stopping_rx.wait_for(|stopping| *stopping).await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                event_name = "system.server.drain_timeout",
                grace_secs = grace.as_secs(),
                "in-flight requests did not finish before the shutdown deadline"
            );
            server.abort();
        }
    }

    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "receiptpath-server stopping"
    );
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(event_name = "system.server.signal_error", error = %error, "ctrl-c handler failed");
    }
}
