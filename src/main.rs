//! Main entry point for the image generation orchestrator

use imggen_orchestrator::{
    api,
    artifacts::ArtifactStore,
    config::Settings,
    engine::registry::EngineRegistry,
    orchestrator::Orchestrator,
    service::ImageGenerationService,
    AppState,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();

    info!("Starting image generation orchestrator");

    // Load configuration
    let settings = Settings::load()?;
    settings.validate()?;
    info!(
        "Loaded configuration: server={}:{}, engines={}",
        settings.server.host,
        settings.server.port,
        settings.engines.len()
    );

    // Build the registry and orchestrator
    let registry = Arc::new(EngineRegistry::new(&settings.storage.base_path));
    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        &settings.orchestrator,
        settings.preferences(),
    ));
    let service = Arc::new(ImageGenerationService::new(registry, orchestrator));

    // Bring up enabled engines
    service.initialize(&settings).await?;

    let artifacts = Arc::new(ArtifactStore::new(
        settings.storage.base_path.clone(),
        settings.storage.url_prefix.clone(),
    ));

    let addr = format!("{}:{}", settings.server.host, settings.server.port);

    let app_state = Arc::new(AppState {
        settings: Arc::new(RwLock::new(settings)),
        service: service.clone(),
        artifacts,
    });

    // Build the router
    let app = api::routes::create_router(app_state).await;

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Release engine sessions before exiting.
    service.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
