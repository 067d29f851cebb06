//! API request and response models

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::engine::contracts::{EngineKind, Quality};
use crate::engine::traits::EngineReport;
use crate::orchestrator::RoutingStrategy;

/// Image generation request
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct GenerateImageRequest {
    /// The prompt to generate images from
    pub prompt: String,

    /// Things the image should not contain
    #[serde(default)]
    pub negative_prompt: Option<String>,

    /// The model to use for generation (backend specific)
    #[serde(default)]
    pub model: Option<String>,

    /// Number of images to generate
    #[serde(default = "default_n")]
    pub n: u32,

    /// The size of the generated images (e.g. "1024x1024")
    #[serde(default = "default_size")]
    pub size: String,

    /// Number of inference steps
    #[serde(default)]
    pub num_inference_steps: Option<u32>,

    /// Guidance scale / CFG scale
    #[serde(default)]
    pub guidance_scale: Option<f32>,

    /// Random seed for reproducibility; negative lets the backend pick
    #[serde(default)]
    pub seed: Option<i64>,

    /// Style preset
    #[serde(default)]
    pub style: Option<String>,

    /// Quality tier: standard, hd or ultra
    #[serde(default)]
    pub quality: Option<Quality>,

    /// Restrict routing to one engine kind
    #[serde(default)]
    pub engine: Option<String>,

    /// Backend-specific extension parameters
    #[serde(default)]
    #[schema(value_type = Object)]
    pub extras: HashMap<String, serde_json::Value>,
}

fn default_n() -> u32 {
    1
}

fn default_size() -> String {
    "1024x1024".to_string()
}

impl GenerateImageRequest {
    /// Parse the size string into width and height
    pub fn parse_size(&self) -> (u32, u32) {
        let parts: Vec<&str> = self.size.split('x').collect();
        if parts.len() == 2 {
            let width = parts[0].parse().unwrap_or(1024);
            let height = parts[1].parse().unwrap_or(1024);
            (width, height)
        } else {
            (1024, 1024)
        }
    }
}

/// One generated image in the response
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct ImageData {
    /// URL the stored image is served from
    pub url: String,

    /// Absolute path of the stored artifact
    pub path: String,
}

/// Image generation response
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GenerateImageResponse {
    /// Unix timestamp of completion
    pub created: i64,

    pub success: bool,

    /// Engine that produced (or last attempted) the images
    pub engine: Option<EngineKind>,

    pub elapsed_seconds: f64,

    /// Estimated cost of this call
    pub cost: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub data: Vec<ImageData>,

    #[serde(skip_serializing_if = "HashMap::is_empty")]
    #[schema(value_type = Object)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Engine list response
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EngineListResponse {
    pub engines: Vec<EngineReport>,
}

/// Connection test result per engine
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TestAllResponse {
    pub results: HashMap<EngineKind, bool>,
}

/// Models offered by one engine
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModelsResponse {
    pub engine: EngineKind,
    pub models: Vec<String>,
}

/// Routing policy update
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SetPolicyRequest {
    pub strategy: RoutingStrategy,
}

/// Cancellation outcome
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Health check response
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub engines: EngineHealthSummary,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EngineHealthSummary {
    pub registered: usize,
    pub active: usize,
}

/// Generic success response
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}
