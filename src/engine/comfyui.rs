//! ComfyUI engine: submit a workflow to the job queue, poll for completion,
//! download the produced images. Covers both the local instance and the
//! hosted (paid) variant; the poll loop is fully encapsulated here and the
//! orchestrator only ever sees one coarse generate call.

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::artifacts::{resolve_output_dir, write_artifact};
use crate::config::EngineSettings;
use crate::engine::adapter::{self, ComfyUiParams};
use crate::engine::contracts::{
    EngineDescriptor, EngineKind, EngineStatus, GenerationConfig, GenerationContext,
    GenerationResult,
};
use crate::engine::traits::{EngineCore, ImageEngine};

const DEFAULT_LOCAL_URL: &str = "http://127.0.0.1:8188";

#[derive(Debug, Deserialize)]
struct PromptResponse {
    prompt_id: String,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    outputs: HashMap<String, NodeOutput>,
}

#[derive(Debug, Deserialize)]
struct NodeOutput {
    #[serde(default)]
    images: Vec<OutputImage>,
}

#[derive(Debug, Deserialize)]
struct OutputImage {
    filename: String,
    #[serde(default)]
    subfolder: String,
    #[serde(rename = "type", default)]
    image_type: String,
}

pub struct ComfyUiEngine {
    core: EngineCore,
    api_url: String,
    api_key: Option<String>,
    client_id: String,
    cost_per_image: f64,
    default_checkpoint: String,
    output_dir: PathBuf,
    poll_interval: Duration,
    poll_timeout: Duration,
    client: RwLock<Option<Client>>,
}

impl ComfyUiEngine {
    pub fn local(settings: &EngineSettings, default_output: &Path) -> Self {
        Self::build(
            EngineKind::ComfyuiLocal,
            settings,
            default_output,
            DEFAULT_LOCAL_URL,
            0.0,
        )
    }

    pub fn cloud(settings: &EngineSettings, default_output: &Path) -> Self {
        Self::build(EngineKind::ComfyuiCloud, settings, default_output, "", 0.1)
    }

    fn build(
        kind: EngineKind,
        settings: &EngineSettings,
        default_output: &Path,
        default_url: &str,
        cost_per_image: f64,
    ) -> Self {
        let poll_timeout_secs: u64 = settings
            .option("poll_timeout_secs")
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);

        Self {
            core: EngineCore::new(kind),
            api_url: settings
                .option_or("base_url", default_url)
                .trim_end_matches('/')
                .to_string(),
            api_key: settings.api_key(),
            client_id: Uuid::new_v4().to_string(),
            cost_per_image,
            default_checkpoint: settings.option_or("checkpoint", "sd_xl_base_1.0.safetensors"),
            output_dir: resolve_output_dir(settings, default_output),
            poll_interval: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(poll_timeout_secs),
            client: RwLock::new(None),
        }
    }

    fn client(&self) -> Option<Client> {
        self.client.read().clone()
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Minimal txt2img workflow graph: checkpoint → prompt encodes →
    /// sampler → VAE decode → SaveImage.
    fn workflow_json(&self, params: &ComfyUiParams, model: &str) -> serde_json::Value {
        let checkpoint = if model.is_empty() || model == "default" {
            self.default_checkpoint.as_str()
        } else {
            model
        };
        let seed = if params.seed >= 0 {
            params.seed as u64
        } else {
            rand::thread_rng().gen_range(0..u32::MAX as u64)
        };

        json!({
            "1": {
                "class_type": "CheckpointLoaderSimple",
                "inputs": { "ckpt_name": checkpoint }
            },
            "2": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": params.prompt, "clip": ["1", 1] }
            },
            "3": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": params.negative_prompt, "clip": ["1", 1] }
            },
            "4": {
                "class_type": "EmptyLatentImage",
                "inputs": {
                    "width": params.width,
                    "height": params.height,
                    "batch_size": params.batch_size
                }
            },
            "5": {
                "class_type": "KSampler",
                "inputs": {
                    "model": ["1", 0],
                    "positive": ["2", 0],
                    "negative": ["3", 0],
                    "latent_image": ["4", 0],
                    "seed": seed,
                    "steps": params.steps,
                    "cfg": params.cfg_scale,
                    "sampler_name": params.sampler_name,
                    "scheduler": params.scheduler,
                    "denoise": 1.0
                }
            },
            "6": {
                "class_type": "VAEDecode",
                "inputs": { "samples": ["5", 0], "vae": ["1", 2] }
            },
            "7": {
                "class_type": "SaveImage",
                "inputs": { "images": ["6", 0], "filename_prefix": "generated" }
            }
        })
    }

    async fn submit(&self, client: &Client, workflow: &serde_json::Value) -> Result<String, String> {
        let payload = json!({
            "prompt": workflow,
            "client_id": self.client_id,
        });

        let response = self
            .request(client.post(format!("{}/prompt", self.api_url)))
            .json(&payload)
            .send()
            .await
            .map_err(|e| format!("job submission failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(format!(
                "job submission returned HTTP {}: {}",
                status.as_u16(),
                detail.chars().take(200).collect::<String>()
            ));
        }

        let parsed: PromptResponse = response
            .json()
            .await
            .map_err(|e| format!("job submission response unreadable: {}", e))?;
        Ok(parsed.prompt_id)
    }

    /// Poll the history endpoint until the job reports outputs, the poll
    /// timeout expires, or the caller cancels.
    async fn wait_for_outputs(
        &self,
        client: &Client,
        prompt_id: &str,
        ctx: &GenerationContext,
    ) -> Result<HashMap<String, NodeOutput>, PollError> {
        let deadline = Instant::now() + self.poll_timeout;

        loop {
            if Instant::now() >= deadline {
                return Err(PollError::TimedOut(self.poll_timeout));
            }

            let response = self
                .request(client.get(format!("{}/history/{}", self.api_url, prompt_id)))
                .send()
                .await
                .map_err(|e| PollError::Failed(format!("status poll failed: {}", e)))?;

            if response.status().is_success() {
                let mut history: HashMap<String, HistoryEntry> = response
                    .json()
                    .await
                    .map_err(|e| PollError::Failed(format!("status response unreadable: {}", e)))?;
                if let Some(entry) = history.remove(prompt_id) {
                    if !entry.outputs.is_empty() {
                        return Ok(entry.outputs);
                    }
                }
            }

            ctx.report(&format!(
                "waiting for job {} ({}s remaining)",
                prompt_id,
                deadline.saturating_duration_since(Instant::now()).as_secs()
            ));

            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(PollError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn download_outputs(
        &self,
        client: &Client,
        outputs: HashMap<String, NodeOutput>,
    ) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for output in outputs.into_values() {
            for image in output.images {
                let response = self
                    .request(client.get(format!("{}/view", self.api_url)))
                    .query(&[
                        ("filename", image.filename.as_str()),
                        ("subfolder", image.subfolder.as_str()),
                        ("type", image.image_type.as_str()),
                    ])
                    .send()
                    .await;

                match response {
                    Ok(response) if response.status().is_success() => {
                        match response.bytes().await {
                            Ok(bytes) => {
                                match write_artifact(&self.output_dir, self.kind(), "png", &bytes)
                                    .await
                                {
                                    Ok(path) => paths.push(path),
                                    Err(e) => warn!(
                                        engine = %self.kind(),
                                        error = %e,
                                        "Failed to store artifact"
                                    ),
                                }
                            }
                            Err(e) => {
                                warn!(engine = %self.kind(), error = %e, "Image body unreadable")
                            }
                        }
                    }
                    Ok(response) => warn!(
                        engine = %self.kind(),
                        status = %response.status(),
                        file = %image.filename,
                        "Image download rejected"
                    ),
                    Err(e) => {
                        warn!(engine = %self.kind(), error = %e, "Image download failed")
                    }
                }
            }
        }
        paths
    }
}

enum PollError {
    TimedOut(Duration),
    Cancelled,
    Failed(String),
}

#[async_trait]
impl ImageEngine for ComfyUiEngine {
    fn core(&self) -> &EngineCore {
        &self.core
    }

    async fn initialize(&self) -> bool {
        if self.api_url.is_empty() {
            self.core.fail("missing base_url");
            return false;
        }

        let client = match Client::builder().timeout(Duration::from_secs(60)).build() {
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
            self.core.fail(format!("connection test failed: {}", self.api_url));
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

        let params = adapter::to_comfyui(config);
        let workflow = self.workflow_json(&params, &config.model);

        ctx.report("submitting workflow");
        let prompt_id = match self.submit(&client, &workflow).await {
            Ok(id) => id,
            Err(message) => {
                self.core.finish(false, 0.0, &message);
                return GenerationResult::failure_for(self.kind(), message);
            }
        };
        debug!(engine = %self.kind(), prompt_id = %prompt_id, "Workflow submitted");

        let outputs = match self.wait_for_outputs(&client, &prompt_id, ctx).await {
            Ok(outputs) => outputs,
            Err(PollError::Cancelled) => {
                self.core.finish(false, 0.0, "generation cancelled");
                return GenerationResult::failure_for(self.kind(), "generation cancelled")
                    .with_metadata("outcome", serde_json::json!("cancelled"));
            }
            Err(PollError::TimedOut(timeout)) => {
                let message = format!("job timed out after {}s", timeout.as_secs());
                self.core.finish(false, 0.0, &message);
                return GenerationResult::failure_for(self.kind(), message);
            }
            Err(PollError::Failed(message)) => {
                self.core.finish(false, 0.0, &message);
                return GenerationResult::failure_for(self.kind(), message);
            }
        };

        ctx.report("downloading outputs");
        let paths = self.download_outputs(&client, outputs).await;
        let elapsed = start.elapsed().as_secs_f64();

        if paths.is_empty() {
            let message = "job produced no downloadable images".to_string();
            self.core.finish(false, 0.0, &message);
            return GenerationResult::failure_for(self.kind(), message);
        }

        let cost = paths.len() as f64 * self.cost_per_image;
        self.core.finish(true, cost, "");

        GenerationResult::completed(self.kind(), paths, elapsed, cost)
            .with_metadata("prompt_id", serde_json::json!(prompt_id))
            .with_metadata("client_id", serde_json::json!(self.client_id))
    }

    async fn test_connection(&self) -> bool {
        let Some(client) = self.client() else {
            return false;
        };
        match self
            .request(client.get(format!("{}/queue", self.api_url)))
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
            self.default_checkpoint.clone(),
            "sd_xl_refiner_1.0.safetensors".into(),
            "v1-5-pruned-emaonly.safetensors".into(),
        ]
    }

    fn describe(&self) -> EngineDescriptor {
        let local = self.kind() == EngineKind::ComfyuiLocal;
        EngineDescriptor {
            name: if local {
                "ComfyUI (local)".into()
            } else {
                "ComfyUI (cloud)".into()
            },
            version: "1.0".into(),
            description: if local {
                "Local ComfyUI workflow executor".into()
            } else {
                "Hosted ComfyUI workflow executor".into()
            },
            is_free: local,
            supports_batch: true,
            supports_negative_prompt: true,
            max_batch_size: 8,
            supported_resolutions: vec![
                (512, 512),
                (768, 768),
                (1024, 1024),
                (1152, 896),
                (896, 1152),
                (1216, 832),
                (832, 1216),
            ],
            cost_per_image: self.cost_per_image,
            rate_limit: 0,
        }
    }

    async fn cleanup(&self) {
        *self.client.write() = None;
        self.core.set_status(EngineStatus::Offline);
    }
}
