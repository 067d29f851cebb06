//! Application settings and configuration management

use crate::engine::contracts::EngineKind;
use crate::error::Result;
use crate::orchestrator::{EnginePreference, RoutingStrategy};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub engines: Vec<EngineSettings>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_keys: Vec<String>,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst")]
    pub burst_size: u32,
}

fn default_rps() -> u32 {
    100
}

fn default_burst() -> u32 {
    200
}

/// Artifact storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory generated images are written under.
    #[serde(default = "default_storage_path")]
    pub base_path: String,
    /// Public URL prefix the stored files are served from.
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
}

fn default_storage_path() -> String {
    "./generated".to_string()
}

fn default_url_prefix() -> String {
    "http://localhost:8080/files".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Retry schedule applied to a selected engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: f64,
    #[serde(default = "default_backoff")]
    pub backoff_factor: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

fn default_backoff() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            backoff_factor: default_backoff(),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default)]
    pub routing_strategy: RoutingStrategy,
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_concurrency_limit() -> usize {
    5
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            routing_strategy: RoutingStrategy::default(),
            retry: RetrySettings::default(),
        }
    }
}

/// Per-engine configuration: enablement, routing preference and the flat
/// option map handed to the engine constructor. Unknown option keys are
/// ignored by engines.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    pub kind: EngineKind,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lower rank wins under the priority strategy.
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Per-image cost ceiling; omitted means unlimited.
    #[serde(default)]
    pub max_cost_per_image: Option<f64>,

    /// Wait ceiling for one generate attempt.
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: f64,

    #[serde(default)]
    pub options: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u32 {
    1
}

fn default_max_wait() -> f64 {
    60.0
}

impl EngineSettings {
    pub fn new(kind: EngineKind) -> Self {
        Self {
            kind,
            enabled: true,
            priority: default_priority(),
            max_cost_per_image: None,
            max_wait_secs: default_max_wait(),
            options: HashMap::new(),
        }
    }

    pub fn preference(&self) -> EnginePreference {
        EnginePreference {
            kind: self.kind,
            priority: self.priority,
            max_cost_per_image: self.max_cost_per_image,
            max_wait: Duration::from_secs_f64(self.max_wait_secs),
            enabled: self.enabled,
        }
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn option_or(&self, key: &str, default: &str) -> String {
        self.option(key).unwrap_or(default).to_string()
    }

    /// Resolve a credential: a literal `api_key` wins, otherwise the
    /// environment variable named by `api_key_env` is consulted.
    pub fn api_key(&self) -> Option<String> {
        if let Some(key) = self.option("api_key") {
            if !key.is_empty() {
                return Some(key.to_string());
            }
        }
        self.option("api_key_env")
            .and_then(|var| std::env::var(var).ok())
            .filter(|v| !v.is_empty())
    }
}

impl Settings {
    /// Load settings from the default configuration file and environment.
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/orchestrator.yaml")
    }

    /// Load settings from a configuration file path, with `IMG_ORCH`
    /// prefixed environment variables layered on top.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let format = if path
            .extension()
            .map_or(false, |ext| ext == "yaml" || ext == "yml")
        {
            FileFormat::Yaml
        } else {
            FileFormat::Toml
        };

        let mut builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("auth.enabled", false)?
            .set_default("rate_limit.enabled", false)?
            .set_default("rate_limit.requests_per_second", default_rps() as i64)?
            .set_default("rate_limit.burst_size", default_burst() as i64)?
            .set_default("storage.base_path", default_storage_path())?
            .set_default("storage.url_prefix", default_url_prefix())?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?;

        if path.exists() {
            builder = builder.add_source(File::from(path).format(format));
        }

        builder = builder.add_source(
            Environment::with_prefix("IMG_ORCH")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(crate::error::AppError::Config(
                config::ConfigError::Message("Server port cannot be 0".to_string()),
            ));
        }

        if self.orchestrator.concurrency_limit == 0 {
            return Err(crate::error::AppError::Config(
                config::ConfigError::Message(
                    "Orchestrator concurrency limit cannot be 0".to_string(),
                ),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for engine in &self.engines {
            if !seen.insert(engine.kind) {
                return Err(crate::error::AppError::Config(
                    config::ConfigError::Message(format!(
                        "Engine '{}' configured more than once",
                        engine.kind
                    )),
                ));
            }
        }

        Ok(())
    }

    /// Engines that should be brought up at startup
    pub fn enabled_engines(&self) -> Vec<&EngineSettings> {
        self.engines.iter().filter(|e| e.enabled).collect()
    }

    /// Routing preferences for every configured engine, rank order preserved
    pub fn preferences(&self) -> Vec<EnginePreference> {
        self.engines.iter().map(|e| e.preference()).collect()
    }

    pub fn engine(&self, kind: EngineKind) -> Option<&EngineSettings> {
        self.engines.iter().find(|e| e.kind == kind)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
            },
            auth: AuthConfig {
                enabled: false,
                api_keys: vec![],
            },
            rate_limit: RateLimitConfig {
                enabled: false,
                requests_per_second: default_rps(),
                burst_size: default_burst(),
            },
            storage: StorageConfig {
                base_path: default_storage_path(),
                url_prefix: default_url_prefix(),
            },
            logging: LoggingConfig {
                level: default_log_level(),
                format: default_log_format(),
            },
            orchestrator: OrchestratorConfig::default(),
            engines: vec![],
        }
    }
}
