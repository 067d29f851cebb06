//! Pollinations engine: free request/response image API.
//!
//! One HTTP GET per image; the response body is the image itself.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::artifacts::{resolve_output_dir, write_artifact};
use crate::config::EngineSettings;
use crate::engine::adapter::{self, PollinationsParams};
use crate::engine::contracts::{
    EngineDescriptor, EngineKind, EngineStatus, GenerationConfig, GenerationContext,
    GenerationResult,
};
use crate::engine::traits::{EngineCore, ImageEngine};

const DEFAULT_BASE_URL: &str = "https://image.pollinations.ai/prompt";

pub struct PollinationsEngine {
    core: EngineCore,
    base_url: String,
    output_dir: PathBuf,
    timeout: Duration,
    client: RwLock<Option<Client>>,
}

impl PollinationsEngine {
    pub fn new(settings: &EngineSettings, default_output: &Path) -> Self {
        let timeout_secs: u64 = settings
            .option("timeout_secs")
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        Self {
            core: EngineCore::new(EngineKind::Pollinations),
            base_url: settings
                .option_or("base_url", DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            output_dir: resolve_output_dir(settings, default_output),
            timeout: Duration::from_secs(timeout_secs),
            client: RwLock::new(None),
        }
    }

    fn client(&self) -> Option<Client> {
        self.client.read().clone()
    }

    /// Fetch one image; `index` offsets the seed so batch entries differ.
    async fn fetch_single(
        &self,
        client: &Client,
        params: &PollinationsParams,
        index: u32,
    ) -> Result<Vec<u8>, String> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| format!("invalid base URL: {}", e))?;
        url.path_segments_mut()
            .map_err(|_| "base URL cannot carry path segments".to_string())?
            .push(&params.prompt);

        let mut query: Vec<(&str, String)> = vec![
            ("width", params.width.to_string()),
            ("height", params.height.to_string()),
            ("model", params.model.clone()),
            ("nologo", params.nologo.to_string()),
            ("enhance", params.enhance.to_string()),
            ("safe", params.safe.to_string()),
        ];
        if let Some(seed) = params.seed {
            query.push(("seed", (seed + index as i64).to_string()));
        }

        let response = client
            .get(url)
            .query(&query)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("backend returned HTTP {}", status));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| format!("failed to read image body: {}", e))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageEngine for PollinationsEngine {
    fn core(&self) -> &EngineCore {
        &self.core
    }

    async fn initialize(&self) -> bool {
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

        let params = adapter::to_pollinations(config);
        let mut paths = Vec::new();
        let mut cancelled = false;

        for index in 0..config.batch_size {
            if ctx.is_cancelled() {
                cancelled = true;
                break;
            }
            ctx.report(&format!("generating image {}/{}", index + 1, config.batch_size));

            match self.fetch_single(&client, &params, index).await {
                Ok(bytes) => match write_artifact(&self.output_dir, self.kind(), "png", &bytes).await
                {
                    Ok(path) => paths.push(path),
                    Err(e) => warn!(engine = %self.kind(), error = %e, "Failed to store artifact"),
                },
                // One failed image does not abort the rest of the batch.
                Err(e) => warn!(engine = %self.kind(), index, error = %e, "Image fetch failed"),
            }
        }

        let elapsed = start.elapsed().as_secs_f64();

        if cancelled {
            self.core.finish(false, 0.0, "generation cancelled");
            return GenerationResult::failure_for(self.kind(), "generation cancelled")
                .with_metadata("outcome", serde_json::json!("cancelled"));
        }

        let generated = paths.len() as u32;
        if generated == 0 {
            let message = format!("0/{} images generated", config.batch_size);
            self.core.finish(false, 0.0, &message);
            return GenerationResult::failure_for(self.kind(), message);
        }

        self.core.finish(true, 0.0, "");
        debug!(engine = %self.kind(), generated, elapsed, "Generation complete");

        let mut result = GenerationResult::completed(self.kind(), paths, elapsed, 0.0);
        result
            .metadata
            .insert("total_requested".into(), serde_json::json!(config.batch_size));
        result
            .metadata
            .insert("total_generated".into(), serde_json::json!(generated));
        if generated < config.batch_size {
            result.error_message = format!(
                "only {}/{} images generated",
                generated, config.batch_size
            );
        }
        result
    }

    async fn test_connection(&self) -> bool {
        let Some(client) = self.client() else {
            return false;
        };
        let url = format!("{}/test?width=64&height=64", self.base_url);
        match client.get(&url).timeout(Duration::from_secs(10)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(engine = %self.kind(), error = %e, "Connection test failed");
                false
            }
        }
    }

    fn available_models(&self) -> Vec<String> {
        vec![
            "flux".into(),
            "flux-realism".into(),
            "flux-anime".into(),
            "flux-3d".into(),
            "any-dark".into(),
            "flux-pro".into(),
        ]
    }

    fn describe(&self) -> EngineDescriptor {
        EngineDescriptor {
            name: "Pollinations AI".into(),
            version: "1.0".into(),
            description: "Free image generation service with several hosted models".into(),
            is_free: true,
            supports_batch: true,
            supports_negative_prompt: false,
            max_batch_size: 10,
            supported_resolutions: vec![
                (512, 512),
                (768, 768),
                (1024, 1024),
                (1024, 768),
                (768, 1024),
                (1280, 720),
                (720, 1280),
            ],
            cost_per_image: 0.0,
            rate_limit: 60,
        }
    }

    async fn cleanup(&self) {
        *self.client.write() = None;
        self.core.set_status(EngineStatus::Offline);
    }
}
