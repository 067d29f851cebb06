//! Stability AI engine: paid request/response API returning base64
//! artifacts.

use async_trait::async_trait;
use base64::Engine as _;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::artifacts::{resolve_output_dir, write_artifact};
use crate::config::EngineSettings;
use crate::engine::adapter;
use crate::engine::contracts::{
    EngineDescriptor, EngineKind, EngineStatus, GenerationConfig, GenerationContext,
    GenerationResult,
};
use crate::engine::traits::{EngineCore, ImageEngine};

const DEFAULT_BASE_URL: &str = "https://api.stability.ai";
const DEFAULT_ENGINE_ID: &str = "stable-diffusion-xl-1024-v1-0";

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    base64: String,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

pub struct StabilityEngine {
    core: EngineCore,
    base_url: String,
    api_key: Option<String>,
    engine_id: String,
    output_dir: PathBuf,
    timeout: Duration,
    client: RwLock<Option<Client>>,
}

impl StabilityEngine {
    pub fn new(settings: &EngineSettings, default_output: &Path) -> Self {
        let timeout_secs: u64 = settings
            .option("timeout_secs")
            .and_then(|v| v.parse().ok())
            .unwrap_or(180);

        Self {
            core: EngineCore::new(EngineKind::StabilityAi),
            base_url: settings
                .option_or("base_url", DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: settings.api_key(),
            engine_id: settings.option_or("engine_id", DEFAULT_ENGINE_ID),
            output_dir: resolve_output_dir(settings, default_output),
            timeout: Duration::from_secs(timeout_secs),
            client: RwLock::new(None),
        }
    }

    fn client(&self) -> Option<Client> {
        self.client.read().clone()
    }
}

#[async_trait]
impl ImageEngine for StabilityEngine {
    fn core(&self) -> &EngineCore {
        &self.core
    }

    async fn initialize(&self) -> bool {
        if self.api_key.is_none() {
            self.core.fail("missing Stability API key");
            return false;
        }

        let client = match Client::builder().timeout(self.timeout).build() {
            Ok(client) => client,
            Err(e) => {
                self.core.fail(format!("failed to build HTTP client: {}", e));
                return false;
            }
        };
        *self.client.write() = Some(client);

        if self.test_connection().await {
            self.core.set_status(EngineStatus::Idle);
            true
        } else {
            self.core.fail("connection test failed");
            false
        }
    }

    async fn generate(
        &self,
        config: &GenerationConfig,
        ctx: &GenerationContext,
    ) -> GenerationResult {
        let _gate = self.core.gate().lock().await;
        let start = Instant::now();
        self.core.set_status(EngineStatus::Busy);

        let Some(client) = self.client() else {
            self.core.finish(false, 0.0, "engine not initialized");
            return GenerationResult::failure_for(self.kind(), "engine not initialized");
        };

        let params = adapter::to_stability(config);
        ctx.report("submitting request to Stability AI");

        let url = format!(
            "{}/v1/generation/{}/text-to-image",
            self.base_url, self.engine_id
        );
        let response = match client
            .post(&url)
            .bearer_auth(self.api_key.as_deref().unwrap_or_default())
            .json(&params)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let message = format!("request failed: {}", e);
                self.core.finish(false, 0.0, &message);
                return GenerationResult::failure_for(self.kind(), message);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let message = if status.as_u16() == 401 || status.as_u16() == 403 {
                format!("authentication rejected (HTTP {})", status.as_u16())
            } else {
                format!(
                    "backend returned HTTP {}: {}",
                    status.as_u16(),
                    detail.chars().take(200).collect::<String>()
                )
            };
            self.core.finish(false, 0.0, &message);
            return GenerationResult::failure_for(self.kind(), message)
                .with_metadata("http_status", serde_json::json!(status.as_u16()));
        }

        let parsed: GenerationResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                let message = format!("failed to parse response: {}", e);
                self.core.finish(false, 0.0, &message);
                return GenerationResult::failure_for(self.kind(), message);
            }
        };

        ctx.report("storing generated images");
        let mut paths = Vec::new();
        for artifact in parsed.artifacts {
            if ctx.is_cancelled() {
                self.core.finish(false, 0.0, "generation cancelled");
                return GenerationResult::failure_for(self.kind(), "generation cancelled")
                    .with_metadata("outcome", serde_json::json!("cancelled"));
            }
            if artifact.finish_reason.as_deref() == Some("ERROR") {
                warn!(engine = %self.kind(), "Artifact flagged with error finish reason");
                continue;
            }
            match base64::engine::general_purpose::STANDARD.decode(&artifact.base64) {
                Ok(bytes) => {
                    match write_artifact(&self.output_dir, self.kind(), "png", &bytes).await {
                        Ok(path) => paths.push(path),
                        Err(e) => {
                            warn!(engine = %self.kind(), error = %e, "Failed to store artifact")
                        }
                    }
                }
                Err(e) => warn!(engine = %self.kind(), error = %e, "Invalid base64 image data"),
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        if paths.is_empty() {
            let message = "response contained no usable artifacts".to_string();
            self.core.finish(false, 0.0, &message);
            return GenerationResult::failure_for(self.kind(), message);
        }

        let cost = paths.len() as f64 * self.describe().cost_per_image;
        self.core.finish(true, cost, "");
        debug!(engine = %self.kind(), images = paths.len(), cost, "Generation complete");

        GenerationResult::completed(self.kind(), paths, elapsed, cost)
    }

    async fn test_connection(&self) -> bool {
        let Some(client) = self.client() else {
            return false;
        };
        match client
            .get(format!("{}/v1/engines/list", self.base_url))
            .bearer_auth(self.api_key.as_deref().unwrap_or_default())
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(engine = %self.kind(), error = %e, "Connection test failed");
                false
            }
        }
    }

    fn available_models(&self) -> Vec<String> {
        vec![
            "stable-diffusion-xl-1024-v1-0".into(),
            "stable-diffusion-v1-6".into(),
        ]
    }

    fn describe(&self) -> EngineDescriptor {
        EngineDescriptor {
            name: "Stability AI".into(),
            version: "1.0".into(),
            description: "Stability AI text-to-image API, billed per image".into(),
            is_free: false,
            supports_batch: true,
            supports_negative_prompt: true,
            max_batch_size: 10,
            supported_resolutions: vec![
                (1024, 1024),
                (1152, 896),
                (896, 1152),
                (1216, 832),
                (832, 1216),
            ],
            cost_per_image: 0.03,
            rate_limit: 150,
        }
    }

    async fn cleanup(&self) {
        *self.client.write() = None;
        self.core.set_status(EngineStatus::Offline);
    }
}
