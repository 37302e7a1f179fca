use anyhow::Result;
use disparador_api::run as run_api;
use disparador_core::{Config, DispatchContext};
use disparador_dispatch::{DispatchService, HttpRelay};
use std::sync::Arc;
use tokio;
use tracing;
use tracing_subscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Disparador A.I dispatch server");

    let config = Config::from_env();
    let relay = Arc::new(HttpRelay::new(&config.relay)?);
    let ctx = DispatchContext::new(config).await?;

    tracing::info!("Dispatch context initialized");

    let service = DispatchService::new(ctx, relay);

    tokio::select! {
        result = run_api(service) => {
            if let Err(e) = &result {
                tracing::error!("API server error: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, stopping");
        }
    }

    Ok(())
}
