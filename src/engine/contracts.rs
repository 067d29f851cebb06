//! Core data contracts shared by engines, orchestrator and the API layer

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

/// Closed set of backend identities known to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Pollinations,
    ComfyuiLocal,
    ComfyuiCloud,
    OpenaiDalle,
    StabilityAi,
    CogviewFlash,
}

impl EngineKind {
    /// Every kind the registry knows how to construct.
    pub const ALL: [EngineKind; 6] = [
        EngineKind::Pollinations,
        EngineKind::ComfyuiLocal,
        EngineKind::ComfyuiCloud,
        EngineKind::OpenaiDalle,
        EngineKind::StabilityAi,
        EngineKind::CogviewFlash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Pollinations => "pollinations",
            EngineKind::ComfyuiLocal => "comfyui_local",
            EngineKind::ComfyuiCloud => "comfyui_cloud",
            EngineKind::OpenaiDalle => "openai_dalle",
            EngineKind::StabilityAi => "stability_ai",
            EngineKind::CogviewFlash => "cogview_flash",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pollinations" => Ok(EngineKind::Pollinations),
            "comfyui_local" => Ok(EngineKind::ComfyuiLocal),
            "comfyui_cloud" => Ok(EngineKind::ComfyuiCloud),
            "openai_dalle" => Ok(EngineKind::OpenaiDalle),
            "stability_ai" => Ok(EngineKind::StabilityAi),
            "cogview_flash" => Ok(EngineKind::CogviewFlash),
            other => Err(format!("unknown engine kind: {}", other)),
        }
    }
}

/// Lifecycle state of one live engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Offline,
    Idle,
    Busy,
    Error,
    Maintenance,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineStatus::Offline => "offline",
            EngineStatus::Idle => "idle",
            EngineStatus::Busy => "busy",
            EngineStatus::Error => "error",
            EngineStatus::Maintenance => "maintenance",
        };
        f.write_str(s)
    }
}

/// Output quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Standard,
    Hd,
    Ultra,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Standard => "standard",
            Quality::Hd => "hd",
            Quality::Ultra => "ultra",
        }
    }
}

/// Unified generation request, immutable once handed to the core
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_guidance")]
    pub guidance_scale: f32,
    /// Negative means "let the backend pick".
    #[serde(default = "default_seed")]
    pub seed: i64,
    #[serde(default = "default_batch")]
    pub batch_size: u32,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub quality: Quality,
    /// Open extension map for backend-specific knobs.
    #[serde(default)]
    pub extras: HashMap<String, serde_json::Value>,
}

fn default_dimension() -> u32 {
    1024
}

fn default_steps() -> u32 {
    20
}

fn default_guidance() -> f32 {
    7.0
}

fn default_seed() -> i64 {
    -1
}

fn default_batch() -> u32 {
    1
}

impl GenerationConfig {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            width: default_dimension(),
            height: default_dimension(),
            steps: default_steps(),
            guidance_scale: default_guidance(),
            seed: default_seed(),
            batch_size: default_batch(),
            model: String::new(),
            style: String::new(),
            quality: Quality::Standard,
            extras: HashMap::new(),
        }
    }
}

/// Outcome of one top-level generate call
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationResult {
    pub success: bool,
    pub artifact_paths: Vec<PathBuf>,
    pub error_message: String,
    pub elapsed_seconds: f64,
    pub cost: f64,
    pub engine_kind: Option<EngineKind>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl GenerationResult {
    /// Successful result. `artifacts` must be non-empty: success implies at
    /// least one artifact.
    pub fn completed(kind: EngineKind, artifacts: Vec<PathBuf>, elapsed: f64, cost: f64) -> Self {
        debug_assert!(!artifacts.is_empty(), "success requires artifacts");
        Self {
            success: !artifacts.is_empty(),
            artifact_paths: artifacts,
            elapsed_seconds: elapsed,
            cost,
            engine_kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: message.into(),
            ..Default::default()
        }
    }

    pub fn failure_for(kind: EngineKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: message.into(),
            engine_kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// True when the request was accepted but deferred to the queue.
    pub fn is_queued(&self) -> bool {
        self.metadata
            .get("outcome")
            .and_then(|v| v.as_str())
            .map(|s| s == "queued")
            .unwrap_or(false)
    }

    /// True when the request was stopped on caller demand.
    pub fn is_cancelled(&self) -> bool {
        self.metadata
            .get("outcome")
            .and_then(|v| v.as_str())
            .map(|s| s == "cancelled")
            .unwrap_or(false)
    }
}

/// Static capability card for one engine, computed once at `describe()` time
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EngineDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
    pub is_free: bool,
    pub supports_batch: bool,
    pub supports_negative_prompt: bool,
    pub max_batch_size: u32,
    #[schema(value_type = Vec<Vec<u32>>)]
    pub supported_resolutions: Vec<(u32, u32)>,
    pub cost_per_image: f64,
    /// Requests per minute the backend tolerates; 0 = unknown/unlimited.
    pub rate_limit: u32,
}

/// Progress message sink handed through to engines
pub type ProgressSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-call context: progress reporting plus cooperative cancellation
#[derive(Clone, Default)]
pub struct GenerationContext {
    pub progress: Option<ProgressSink>,
    pub cancel: CancellationToken,
}

impl GenerationContext {
    pub fn new(progress: Option<ProgressSink>, cancel: CancellationToken) -> Self {
        Self { progress, cancel }
    }

    pub fn report(&self, message: &str) {
        if let Some(sink) = &self.progress {
            sink(message);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
