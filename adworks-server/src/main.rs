mod catalog;
mod config;
mod genai;
mod handlers;
mod pipeline;
mod routes;
mod state;
mod storage;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use catalog::CatalogClient;
use config::ServerConfig;
use genai::{GenerationClient, RenderServiceClient};
use state::AppState;

const DEFAULT_CONFIG_PATH: &str = "/etc/adworks/server.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    info!("adworks-server starting");

    let config_path = std::env::var("ADWORKS_CONFIG")
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = ServerConfig::load(Path::new(&config_path))?;
    info!(config = %config_path, provider = %config.storage.provider, "Configuration loaded");

    let catalog = Arc::new(CatalogClient::new(
        &config.catalog.url,
        &config.catalog.api_key,
    ));
    let storage = storage::from_config(&config.storage)?;
    let backend = Arc::new(RenderServiceClient::new(
        &config.render.api_url,
        &config.render.api_key,
    ));
    let generator = Arc::new(GenerationClient::new(
        backend,
        config.render.max_attempts,
        Duration::from_millis(config.render.base_delay_ms),
    ));

    let state = Arc::new(AppState::new(catalog, storage, generator, &config));
    let app = routes::build_router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(port = config.port, "Listening on http://0.0.0.0:{}", config.port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
