//! OpenAI DALL-E engine: paid request/response API billed per image.

use async_trait::async_trait;
use base64::Engine as _;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::artifacts::{resolve_output_dir, write_artifact};
use crate::config::EngineSettings;
use crate::engine::adapter::{self, DALLE_RESOLUTIONS};
use crate::engine::contracts::{
    EngineDescriptor, EngineKind, EngineStatus, GenerationConfig, GenerationContext,
    GenerationResult, Quality,
};
use crate::engine::traits::{EngineCore, ImageEngine};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

pub struct DalleEngine {
    core: EngineCore,
    base_url: String,
    api_key: Option<String>,
    model: String,
    output_dir: PathBuf,
    timeout: Duration,
    client: RwLock<Option<Client>>,
}

impl DalleEngine {
    pub fn new(settings: &EngineSettings, default_output: &Path) -> Self {
        let timeout_secs: u64 = settings
            .option("timeout_secs")
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        Self {
            core: EngineCore::new(EngineKind::OpenaiDalle),
            base_url: settings
                .option_or("base_url", DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: settings.api_key(),
            model: settings.option_or("model", "dall-e-3"),
            output_dir: resolve_output_dir(settings, default_output),
            timeout: Duration::from_secs(timeout_secs),
            client: RwLock::new(None),
        }
    }

    fn client(&self) -> Option<Client> {
        self.client.read().clone()
    }

    fn cost_per_image(&self, quality: Quality) -> f64 {
        match quality {
            Quality::Standard => 0.04,
            Quality::Hd | Quality::Ultra => 0.08,
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", key)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }
}

#[async_trait]
impl ImageEngine for DalleEngine {
    fn core(&self) -> &EngineCore {
        &self.core
    }

    async fn initialize(&self) -> bool {
        if self.api_key.is_none() {
            self.core.fail("missing OpenAI API key");
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

        let params = adapter::to_dalle(config);
        ctx.report("submitting request to DALL-E");

        let body = serde_json::json!({
            "model": self.model,
            "prompt": params.prompt,
            "n": params.n,
            "size": params.size,
            "quality": params.quality,
            "style": params.style,
            "response_format": "b64_json",
        });

        let response = match client
            .post(format!("{}/images/generations", self.base_url))
            .headers(self.headers())
            .json(&body)
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
                format!("backend returned HTTP {}: {}", status.as_u16(), truncate(&detail))
            };
            self.core.finish(false, 0.0, &message);
            return GenerationResult::failure_for(self.kind(), message)
                .with_metadata("http_status", serde_json::json!(status.as_u16()));
        }

        let parsed: ImagesResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                let message = format!("failed to parse response: {}", e);
                self.core.finish(false, 0.0, &message);
                return GenerationResult::failure_for(self.kind(), message);
            }
        };

        ctx.report("storing generated images");
        let mut paths = Vec::new();
        let mut revised = None;
        for datum in parsed.data {
            if ctx.is_cancelled() {
                self.core.finish(false, 0.0, "generation cancelled");
                return GenerationResult::failure_for(self.kind(), "generation cancelled")
                    .with_metadata("outcome", serde_json::json!("cancelled"));
            }
            if datum.revised_prompt.is_some() {
                revised = datum.revised_prompt.clone();
            }
            let bytes = if let Some(encoded) = &datum.b64_json {
                match base64::engine::general_purpose::STANDARD.decode(encoded) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        warn!(engine = %self.kind(), error = %e, "Invalid base64 image data");
                        None
                    }
                }
            } else if let Some(url) = &datum.url {
                match download(&client, url).await {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        warn!(engine = %self.kind(), error = %e, "Image download failed");
                        None
                    }
                }
            } else {
                None
            };

            if let Some(bytes) = bytes {
                match write_artifact(&self.output_dir, self.kind(), "png", &bytes).await {
                    Ok(path) => paths.push(path),
                    Err(e) => warn!(engine = %self.kind(), error = %e, "Failed to store artifact"),
                }
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        if paths.is_empty() {
            let message = "response contained no decodable images".to_string();
            self.core.finish(false, 0.0, &message);
            return GenerationResult::failure_for(self.kind(), message);
        }

        let cost = paths.len() as f64 * self.cost_per_image(config.quality);
        self.core.finish(true, cost, "");
        debug!(engine = %self.kind(), images = paths.len(), cost, "Generation complete");

        let mut result = GenerationResult::completed(self.kind(), paths, elapsed, cost);
        if params.size_substituted {
            result.metadata.insert(
                "size_substituted".into(),
                serde_json::json!({
                    "requested": format!("{}x{}", config.width, config.height),
                    "used": params.size,
                }),
            );
        }
        if let Some(revised) = revised {
            result
                .metadata
                .insert("revised_prompt".into(), serde_json::json!(revised));
        }
        result
    }

    async fn test_connection(&self) -> bool {
        let Some(client) = self.client() else {
            return false;
        };
        match client
            .get(format!("{}/models", self.base_url))
            .headers(self.headers())
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
        vec!["dall-e-3".into(), "dall-e-2".into()]
    }

    fn describe(&self) -> EngineDescriptor {
        EngineDescriptor {
            name: "OpenAI DALL-E".into(),
            version: "3.0".into(),
            description: "OpenAI image generation API, billed per image".into(),
            is_free: false,
            supports_batch: true,
            supports_negative_prompt: false,
            max_batch_size: 10,
            supported_resolutions: DALLE_RESOLUTIONS.to_vec(),
            cost_per_image: 0.04,
            rate_limit: 50,
        }
    }

    async fn cleanup(&self) {
        *self.client.write() = None;
        self.core.set_status(EngineStatus::Offline);
    }
}

async fn download(client: &Client, url: &str) -> Result<Vec<u8>, String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("request failed: {}", e))?;
    if !response.status().is_success() {
        return Err(format!("download returned HTTP {}", response.status()));
    }
    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| format!("failed to read body: {}", e))
}

fn truncate(s: &str) -> String {
    s.chars().take(200).collect()
}
