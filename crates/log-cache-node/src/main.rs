//! Log-Cache node binary: wires configuration, the core subsystems, and
//! the HTTP surface together, and serves until asked to shut down.

mod config;
mod http;
mod metrics_text;
mod reader;
mod state;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::FutureExt;

use config::Config;
use state::AppState;

fn main() -> anyhow::Result<()> {
    log_cache_ops::init_tracing();

    let config = Config::parse();
    tracing::info!(?config, "starting log-cache node");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let task = runtime.spawn(async move { async_main(config).await });
    let result = runtime.block_on(task);

    tracing::info!(?result, "main function completed, shutting down runtime");
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result?
}

async fn async_main(config: Config) -> anyhow::Result<()> {
    // Bind early so requests that dispatch as soon as the process is up
    // don't fail waiting on the rest of startup.
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    let state = AppState::new(config).context("constructing node state")?;
    let router = http::build_router(state.clone());

    let shutdown = tokio::signal::ctrl_c().map(|_| ()).shared();
    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown);

    server.await.context("serving HTTP")?;

    let _ = state._shutdown_tx.send(true);
    Ok(())
}
