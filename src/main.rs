mod config;
mod console;
mod data;
mod engine;
mod error;
mod monitoring;
mod scan;
mod store;
mod stream;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use config::{Config, EnvConfig};
use data::api::HttpSignalApi;
use engine::Engine;
use store::preferences::{PreferenceStore, SqlitePreferenceStore};
use stream::transport::WsTransport;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("🚀 Signal desk starting...");

    // Load configuration
    let config = Config::load("config.toml")?.apply_env(EnvConfig::load());
    tracing::info!("API: {}", config.api.base_url);
    tracing::info!("Signal stream: {}", config.streams.signal_url);
    tracing::info!("Progress stream: {}", config.streams.progress_url);

    tracing::info!("Opening preferences: {}", config.preferences.database_path);
    let preferences: Arc<dyn PreferenceStore> = Arc::new(
        SqlitePreferenceStore::open(&config.preferences.database_path)
            .with_context(|| format!("Failed to open {}", config.preferences.database_path))?,
    );

    let api = Arc::new(HttpSignalApi::new(config.api.base_url.clone()));
    let transport = Arc::new(WsTransport);
    let (engine, handle) = Engine::new(&config, api, transport, preferences.clone());

    let engine_task = tokio::spawn(engine.run());
    let mut console_task = tokio::spawn(console::run(handle.clone(), preferences));

    tracing::info!("✅ Ready. Commands: scan, interval N, reload, view, logs, status, watch/unwatch SYM, dismiss ID, quit");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            console_task.abort();
        }
        _ = &mut console_task => {}
    }

    tracing::info!("Shutting down...");
    handle.shutdown().await;
    engine_task.await?;

    Ok(())
}
