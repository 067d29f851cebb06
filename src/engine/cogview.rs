//! CogView-3 Flash engine: free cloud API returning image URLs that are
//! downloaded into the artifact store.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::artifacts::{resolve_output_dir, write_artifact};
use crate::config::EngineSettings;
use crate::engine::adapter::{self, COGVIEW_RESOLUTIONS};
use crate::engine::contracts::{
    EngineDescriptor, EngineKind, EngineStatus, GenerationConfig, GenerationContext,
    GenerationResult,
};
use crate::engine::traits::{EngineCore, ImageEngine};

const DEFAULT_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4/images/generations";

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    url: String,
}

pub struct CogViewEngine {
    core: EngineCore,
    base_url: String,
    api_key: Option<String>,
    output_dir: PathBuf,
    timeout: Duration,
    client: RwLock<Option<Client>>,
}

impl CogViewEngine {
    pub fn new(settings: &EngineSettings, default_output: &Path) -> Self {
        let timeout_secs: u64 = settings
            .option("timeout_secs")
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);

        Self {
            core: EngineCore::new(EngineKind::CogviewFlash),
            base_url: settings
                .option_or("base_url", DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: settings.api_key(),
            output_dir: resolve_output_dir(settings, default_output),
            timeout: Duration::from_secs(timeout_secs),
            client: RwLock::new(None),
        }
    }

    fn client(&self) -> Option<Client> {
        self.client.read().clone()
    }

    async fn generate_single(&self, client: &Client, prompt: &str, size: &str) -> Result<Vec<u8>, String> {
        let body = json!({
            "model": "cogview-3-flash",
            "prompt": prompt,
            "size": size,
        });

        let response = client
            .post(&self.base_url)
            .bearer_auth(self.api_key.as_deref().unwrap_or_default())
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(format!("authentication rejected (HTTP {})", status.as_u16()));
            }
            return Err(format!(
                "backend returned HTTP {}: {}",
                status.as_u16(),
                detail.chars().take(200).collect::<String>()
            ));
        }

        let parsed: ImagesResponse = response
            .json()
            .await
            .map_err(|e| format!("failed to parse response: {}", e))?;
        let Some(datum) = parsed.data.into_iter().next() else {
            return Err("response contained no image".to_string());
        };

        let image = client
            .get(&datum.url)
            .send()
            .await
            .map_err(|e| format!("image download failed: {}", e))?;
        if !image.status().is_success() {
            return Err(format!("image download returned HTTP {}", image.status()));
        }
        image
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| format!("failed to read image body: {}", e))
    }
}

#[async_trait]
impl ImageEngine for CogViewEngine {
    fn core(&self) -> &EngineCore {
        &self.core
    }

    async fn initialize(&self) -> bool {
        if self.api_key.is_none() {
            self.core.fail("missing Zhipu API key");
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

        let params = adapter::to_cogview(config);
        let batch = config.batch_size.min(self.describe().max_batch_size);
        let mut paths = Vec::new();
        let mut last_error = String::new();
        let mut cancelled = false;

        for index in 0..batch {
            if ctx.is_cancelled() {
                cancelled = true;
                break;
            }
            ctx.report(&format!("generating image {}/{}", index + 1, batch));

            match self.generate_single(&client, &params.prompt, &params.size).await {
                Ok(bytes) => match write_artifact(&self.output_dir, self.kind(), "png", &bytes).await
                {
                    Ok(path) => paths.push(path),
                    Err(e) => warn!(engine = %self.kind(), error = %e, "Failed to store artifact"),
                },
                Err(e) => {
                    warn!(engine = %self.kind(), index, error = %e, "Image generation failed");
                    last_error = e;
                }
            }
        }

        let elapsed = start.elapsed().as_secs_f64();

        if cancelled {
            self.core.finish(false, 0.0, "generation cancelled");
            return GenerationResult::failure_for(self.kind(), "generation cancelled")
                .with_metadata("outcome", serde_json::json!("cancelled"));
        }

        if paths.is_empty() {
            let message = if last_error.is_empty() {
                format!("0/{} images generated", batch)
            } else {
                last_error
            };
            self.core.finish(false, 0.0, &message);
            return GenerationResult::failure_for(self.kind(), message);
        }

        self.core.finish(true, 0.0, "");
        debug!(engine = %self.kind(), images = paths.len(), elapsed, "Generation complete");

        let mut result = GenerationResult::completed(self.kind(), paths, elapsed, 0.0);
        if params.size_substituted {
            result.metadata.insert(
                "size_substituted".into(),
                serde_json::json!({
                    "requested": format!("{}x{}", config.width, config.height),
                    "used": params.size,
                }),
            );
        }
        result
    }

    async fn test_connection(&self) -> bool {
        let Some(client) = self.client() else {
            return false;
        };
        // The endpoint only answers POST; any HTTP response at all proves
        // the host is reachable and TLS works.
        match client
            .get(&self.base_url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!(engine = %self.kind(), error = %e, "Connection test failed");
                false
            }
        }
    }

    fn available_models(&self) -> Vec<String> {
        vec!["cogview-3-flash".into()]
    }

    fn describe(&self) -> EngineDescriptor {
        EngineDescriptor {
            name: "CogView-3 Flash".into(),
            version: "1.0".into(),
            description: "Zhipu AI free image generation API".into(),
            is_free: true,
            supports_batch: true,
            supports_negative_prompt: false,
            max_batch_size: 5,
            supported_resolutions: COGVIEW_RESOLUTIONS.to_vec(),
            cost_per_image: 0.0,
            rate_limit: 30,
        }
    }

    async fn cleanup(&self) {
        *self.client.write() = None;
        self.core.set_status(EngineStatus::Offline);
    }
}
