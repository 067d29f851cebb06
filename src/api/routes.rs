//! HTTP route definitions

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::handlers;
use crate::api::models::*;
use crate::engine::contracts::{EngineDescriptor, EngineKind, EngineStatus, Quality};
use crate::engine::traits::{CountersSnapshot, EngineReport};
use crate::middleware::{AuthLayer, RateLimitLayer};
use crate::orchestrator::{ManagerStatus, PreferenceView, RoutingStrategy, StatsSnapshot};

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Image Generation Orchestrator API",
        version = "0.2.0",
        description = "Multi-engine image generation with routing, retry and admission control.",
        license(name = "MIT"),
    ),
    paths(
        handlers::generate_image,
        handlers::list_engines,
        handlers::remove_engine,
        handlers::test_engines,
        handlers::list_models,
        handlers::set_policy,
        handlers::get_status,
        handlers::cancel_request,
        handlers::health_check,
    ),
    components(schemas(
        GenerateImageRequest,
        GenerateImageResponse,
        ImageData,
        EngineListResponse,
        TestAllResponse,
        ModelsResponse,
        SetPolicyRequest,
        CancelResponse,
        HealthResponse,
        EngineHealthSummary,
        SuccessResponse,
        EngineKind,
        EngineStatus,
        EngineDescriptor,
        EngineReport,
        CountersSnapshot,
        Quality,
        RoutingStrategy,
        ManagerStatus,
        PreferenceView,
        StatsSnapshot,
    )),
    tags(
        (name = "Images", description = "Image generation endpoints"),
        (name = "Engines", description = "Engine management endpoints"),
        (name = "Orchestrator", description = "Routing policy and status endpoints"),
        (name = "Health", description = "Health endpoints"),
    )
)]
pub struct ApiDoc;

/// Create the main application router
pub async fn create_router(state: Arc<crate::AppState>) -> Router {
    // Get configuration for middleware and static file serving
    let (auth_enabled, api_keys, rate_limit_enabled, rps, burst, files_dir) = {
        let config = state.settings.read().await;
        (
            config.auth.enabled,
            config.auth.api_keys.clone(),
            config.rate_limit.enabled,
            config.rate_limit.requests_per_second,
            config.rate_limit.burst_size,
            config.storage.base_path.clone(),
        )
    };

    // API routes behind authentication and rate limiting
    let api_routes = Router::new()
        .route("/images/generations", post(handlers::generate_image))
        .route("/engines", get(handlers::list_engines))
        .route("/engines/test", post(handlers::test_engines))
        .route("/engines/:kind", delete(handlers::remove_engine))
        .route("/engines/:kind/models", get(handlers::list_models))
        .route("/orchestrator/policy", put(handlers::set_policy))
        .route("/orchestrator/status", get(handlers::get_status))
        .route("/requests/:id/cancel", post(handlers::cancel_request));

    let api_routes = if rate_limit_enabled {
        api_routes.layer(RateLimitLayer::new(rps, burst))
    } else {
        api_routes
    };

    let api_routes = if auth_enabled {
        api_routes.layer(AuthLayer::new(api_keys))
    } else {
        api_routes
    };

    Router::new()
        // Health check endpoint (no auth required)
        .route("/health", get(handlers::health_check))
        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Static file serving for generated images
        .nest_service("/files", tower_http::services::ServeDir::new(files_dir))
        // API routes under /v1 prefix
        .nest("/v1", api_routes)
        // Add shared state
        .with_state(state)
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
}
