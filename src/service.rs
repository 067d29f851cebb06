//! Service façade: wires declarative configuration to the registry and
//! orchestrator and exposes the operations external callers consume. This
//! is the only component that mutates routing strategy or preferences at
//! runtime.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::engine::contracts::{
    EngineKind, GenerationConfig, GenerationResult, ProgressSink,
};
use crate::engine::registry::EngineRegistry;
use crate::engine::traits::EngineReport;
use crate::error::{AppError, Result};
use crate::orchestrator::{EnginePreference, ManagerStatus, Orchestrator, RoutingStrategy};

pub struct ImageGenerationService {
    registry: Arc<EngineRegistry>,
    orchestrator: Arc<Orchestrator>,
}

impl ImageGenerationService {
    pub fn new(registry: Arc<EngineRegistry>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            registry,
            orchestrator,
        }
    }

    /// Bring up every enabled engine from configuration and apply the
    /// configured routing strategy and preferences. Engines that fail
    /// initialization stay registered in error state and are skipped by
    /// selection until re-initialized.
    pub async fn initialize(&self, settings: &Settings) -> Result<()> {
        for engine_settings in &settings.engines {
            self.registry.configure(engine_settings.clone());
        }

        for engine_settings in settings.enabled_engines() {
            let engine = self.registry.get(engine_settings.kind).await;
            if engine.status() == crate::engine::contracts::EngineStatus::Error {
                warn!(
                    engine = %engine_settings.kind,
                    error = %engine.last_error(),
                    "Engine unavailable at startup"
                );
            }
        }

        self.orchestrator
            .set_strategy(settings.orchestrator.routing_strategy);
        self.orchestrator.set_preferences(settings.preferences());

        info!(
            engines = settings.enabled_engines().len(),
            strategy = %settings.orchestrator.routing_strategy,
            "Image generation service initialized"
        );
        Ok(())
    }

    /// Run one generation request. Empty prompts are rejected before any
    /// engine is touched.
    pub async fn generate(
        &self,
        config: GenerationConfig,
        preferred: Option<Vec<EngineKind>>,
        progress: Option<ProgressSink>,
    ) -> Result<GenerationResult> {
        if config.prompt.trim().is_empty() {
            return Err(AppError::InvalidRequest("prompt must not be empty".into()));
        }

        Ok(self.orchestrator.generate(config, preferred, progress).await)
    }

    /// Shallow connection probe across every constructed engine.
    pub async fn test_all(&self) -> HashMap<EngineKind, bool> {
        self.registry.test_all().await
    }

    /// Status report for every constructed engine.
    pub fn list_engines(&self) -> Vec<EngineReport> {
        self.registry.reports()
    }

    /// Model identifiers one engine accepts.
    pub fn list_models(&self, kind: EngineKind) -> Result<Vec<String>> {
        match self.registry.active(kind) {
            Some(engine) => Ok(engine.available_models()),
            None => Err(AppError::EngineNotFound(kind.to_string())),
        }
    }

    pub fn set_policy(&self, strategy: RoutingStrategy) {
        self.orchestrator.set_strategy(strategy);
    }

    pub fn update_preferences(&self, preferences: Vec<EnginePreference>) {
        self.orchestrator.set_preferences(preferences);
    }

    pub fn manager_status(&self) -> ManagerStatus {
        self.orchestrator.status()
    }

    pub fn cancel(&self, request_id: Uuid) -> bool {
        self.orchestrator.cancel(request_id)
    }

    /// Clean up and evict one engine.
    pub async fn remove_engine(&self, kind: EngineKind) -> Result<()> {
        if self.registry.remove(kind).await {
            Ok(())
        } else {
            Err(AppError::EngineNotFound(kind.to_string()))
        }
    }

    /// Registry-wide cleanup; called on shutdown.
    pub async fn shutdown(&self) {
        self.registry.cleanup_all().await;
        info!("Image generation service shut down");
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }
}
