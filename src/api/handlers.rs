//! HTTP request handlers

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::api::models::{
    CancelResponse, EngineHealthSummary, EngineListResponse, GenerateImageRequest,
    GenerateImageResponse, HealthResponse, ImageData, ModelsResponse, SetPolicyRequest,
    SuccessResponse, TestAllResponse,
};
use crate::engine::contracts::{EngineKind, GenerationConfig};
use crate::error::AppError;
use crate::orchestrator::ManagerStatus;
use crate::AppState;

fn parse_kind(raw: &str) -> Result<EngineKind, AppError> {
    raw.parse()
        .map_err(|e: String| AppError::InvalidRequest(e))
}

/// Generate images from a prompt
#[utoipa::path(
    post,
    path = "/v1/images/generations",
    tag = "Images",
    request_body = GenerateImageRequest,
    responses(
        (status = 200, description = "Generation outcome", body = GenerateImageResponse),
        (status = 400, description = "Invalid request"),
        (status = 503, description = "No engine available"),
    )
)]
pub async fn generate_image(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateImageRequest>,
) -> Result<Json<GenerateImageResponse>, AppError> {
    info!(prompt = %request.prompt, n = request.n, "Received image generation request");

    let (width, height) = request.parse_size();
    let preferred = match &request.engine {
        Some(raw) => Some(vec![parse_kind(raw)?]),
        None => None,
    };

    let mut config = GenerationConfig::new(request.prompt.clone());
    config.negative_prompt = request.negative_prompt.clone().unwrap_or_default();
    config.width = width;
    config.height = height;
    config.batch_size = request.n;
    if let Some(steps) = request.num_inference_steps {
        config.steps = steps;
    }
    if let Some(guidance) = request.guidance_scale {
        config.guidance_scale = guidance;
    }
    if let Some(seed) = request.seed {
        config.seed = seed;
    }
    config.model = request.model.clone().unwrap_or_default();
    config.style = request.style.clone().unwrap_or_default();
    config.quality = request.quality.unwrap_or_default();
    config.extras = request.extras.clone();

    let result = state.service.generate(config, preferred, None).await?;

    let data: Vec<ImageData> = result
        .artifact_paths
        .iter()
        .map(|path| ImageData {
            url: state.artifacts.url_for(path),
            path: path.display().to_string(),
        })
        .collect();

    info!(
        success = result.success,
        images = data.len(),
        engine = ?result.engine_kind,
        "Image generation completed"
    );

    Ok(Json(GenerateImageResponse {
        created: Utc::now().timestamp(),
        success: result.success,
        engine: result.engine_kind,
        elapsed_seconds: result.elapsed_seconds,
        cost: result.cost,
        error: (!result.error_message.is_empty()).then(|| result.error_message.clone()),
        data,
        metadata: result.metadata,
    }))
}

/// List all constructed engines with status and capabilities
#[utoipa::path(
    get,
    path = "/v1/engines",
    tag = "Engines",
    responses((status = 200, description = "Engine list", body = EngineListResponse))
)]
pub async fn list_engines(
    State(state): State<Arc<AppState>>,
) -> Result<Json<EngineListResponse>, AppError> {
    Ok(Json(EngineListResponse {
        engines: state.service.list_engines(),
    }))
}

/// Clean up and evict one engine
#[utoipa::path(
    delete,
    path = "/v1/engines/{kind}",
    tag = "Engines",
    params(("kind" = String, Path, description = "Engine kind")),
    responses(
        (status = 200, description = "Engine removed", body = SuccessResponse),
        (status = 404, description = "Engine not found"),
    )
)]
pub async fn remove_engine(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    let kind = parse_kind(&kind)?;
    info!(engine = %kind, "Removing engine");

    state.service.remove_engine(kind).await?;

    Ok(Json(SuccessResponse {
        success: true,
        message: format!("Engine '{}' removed", kind),
    }))
}

/// Run a shallow connection test on every constructed engine
#[utoipa::path(
    post,
    path = "/v1/engines/test",
    tag = "Engines",
    responses((status = 200, description = "Per-engine reachability", body = TestAllResponse))
)]
pub async fn test_engines(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TestAllResponse>, AppError> {
    Ok(Json(TestAllResponse {
        results: state.service.test_all().await,
    }))
}

/// List the models one engine accepts
#[utoipa::path(
    get,
    path = "/v1/engines/{kind}/models",
    tag = "Engines",
    params(("kind" = String, Path, description = "Engine kind")),
    responses(
        (status = 200, description = "Model list", body = ModelsResponse),
        (status = 404, description = "Engine not found"),
    )
)]
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<ModelsResponse>, AppError> {
    let kind = parse_kind(&kind)?;
    let models = state.service.list_models(kind)?;
    Ok(Json(ModelsResponse { engine: kind, models }))
}

/// Change the routing strategy
#[utoipa::path(
    put,
    path = "/v1/orchestrator/policy",
    tag = "Orchestrator",
    request_body = SetPolicyRequest,
    responses((status = 200, description = "Policy updated", body = SuccessResponse))
)]
pub async fn set_policy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetPolicyRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.service.set_policy(request.strategy);
    Ok(Json(SuccessResponse {
        success: true,
        message: format!("Routing strategy set to '{}'", request.strategy),
    }))
}

/// Orchestrator status: active tasks, queue depth, per-engine stats
#[utoipa::path(
    get,
    path = "/v1/orchestrator/status",
    tag = "Orchestrator",
    responses((status = 200, description = "Manager status", body = ManagerStatus))
)]
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ManagerStatus>, AppError> {
    Ok(Json(state.service.manager_status()))
}

/// Cancel a queued or in-flight request
#[utoipa::path(
    post,
    path = "/v1/requests/{id}/cancel",
    tag = "Orchestrator",
    params(("id" = String, Path, description = "Request id")),
    responses((status = 200, description = "Cancellation outcome", body = CancelResponse))
)]
pub async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, AppError> {
    let cancelled = state.service.cancel(id);
    info!(request_id = %id, cancelled, "Cancellation requested");
    Ok(Json(CancelResponse { cancelled }))
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Service health", body = HealthResponse))
)]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, AppError> {
    let registry = state.service.registry();
    let registered = registry.len();
    let active = registry.active_kinds().len();

    Ok(Json(HealthResponse {
        status: if registered == 0 || active > 0 {
            "healthy"
        } else {
            "degraded"
        }
        .to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        engines: EngineHealthSummary { registered, active },
    }))
}
