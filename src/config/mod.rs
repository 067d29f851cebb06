//! Configuration loading and validation

pub mod settings;

pub use settings::{
    AuthConfig, EngineSettings, LoggingConfig, OrchestratorConfig, RateLimitConfig,
    RetrySettings, ServerConfig, Settings, StorageConfig,
};
