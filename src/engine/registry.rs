//! Engine registry: lazily constructs and caches one live instance per
//! engine kind.

use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::EngineSettings;
use crate::engine::cogview::CogViewEngine;
use crate::engine::comfyui::ComfyUiEngine;
use crate::engine::contracts::{EngineKind, EngineStatus};
use crate::engine::dalle::DalleEngine;
use crate::engine::pollinations::PollinationsEngine;
use crate::engine::stability::StabilityEngine;
use crate::engine::traits::{EngineReport, ImageEngine};

type EngineCell = Arc<OnceCell<Arc<dyn ImageEngine>>>;

/// Registry owning at most one live engine instance per kind.
///
/// Construction is lazy and single-flight: concurrent first requests for
/// the same kind share one construct-and-initialize; losers await the
/// winner's instance. Engines failing initialization stay cached in
/// `Error` status so they can be re-initialized instead of re-built.
pub struct EngineRegistry {
    configs: parking_lot::RwLock<HashMap<EngineKind, EngineSettings>>,
    cells: DashMap<EngineKind, EngineCell>,
    default_output_dir: PathBuf,
}

impl EngineRegistry {
    pub fn new(default_output_dir: impl Into<PathBuf>) -> Self {
        Self {
            configs: parking_lot::RwLock::new(HashMap::new()),
            cells: DashMap::new(),
            default_output_dir: default_output_dir.into(),
        }
    }

    /// Store the construction options for one kind. Applies to the next
    /// construction; an already-live instance is not reconfigured.
    pub fn configure(&self, settings: EngineSettings) {
        self.configs.write().insert(settings.kind, settings);
    }

    /// Every kind the compiled-in catalog can construct.
    pub fn available_kinds(&self) -> Vec<EngineKind> {
        EngineKind::ALL.to_vec()
    }

    /// Constructed kinds whose status is not `Offline`.
    pub fn active_kinds(&self) -> Vec<EngineKind> {
        self.cells
            .iter()
            .filter_map(|entry| {
                let engine = entry.value().get()?;
                (engine.status() != EngineStatus::Offline).then(|| *entry.key())
            })
            .collect()
    }

    /// Get the live instance for `kind`, constructing and initializing it on
    /// first request.
    pub async fn get(&self, kind: EngineKind) -> Arc<dyn ImageEngine> {
        let cell = self
            .cells
            .entry(kind)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        cell.get_or_init(|| async {
            let settings = self
                .configs
                .read()
                .get(&kind)
                .cloned()
                .unwrap_or_else(|| EngineSettings::new(kind));
            let engine = build_engine(kind, &settings, &self.default_output_dir);
            if engine.initialize().await {
                info!(engine = %kind, "Engine initialized");
            } else {
                warn!(engine = %kind, error = %engine.last_error(), "Engine failed to initialize");
            }
            engine
        })
        .await
        .clone()
    }

    /// Already-constructed instance for `kind`, without triggering
    /// construction.
    pub fn active(&self, kind: EngineKind) -> Option<Arc<dyn ImageEngine>> {
        self.cells
            .get(&kind)
            .and_then(|cell| cell.value().get().cloned())
    }

    /// Re-run initialization on a constructed engine (e.g. after `Error`).
    pub async fn reinitialize(&self, kind: EngineKind) -> bool {
        match self.active(kind) {
            Some(engine) => engine.initialize().await,
            None => false,
        }
    }

    /// Replace the instance for `kind` with a pre-built engine. Intended
    /// for custom implementations and test doubles.
    pub fn register_custom(&self, engine: Arc<dyn ImageEngine>) {
        let kind = engine.kind();
        let cell = OnceCell::new();
        cell.set(engine)
            .unwrap_or_else(|_| unreachable!("fresh cell is empty"));
        self.cells.insert(kind, Arc::new(cell));
        info!(engine = %kind, "Custom engine registered");
    }

    /// Clean up and evict the instance for `kind`.
    pub async fn remove(&self, kind: EngineKind) -> bool {
        match self.cells.remove(&kind) {
            Some((_, cell)) => {
                if let Some(engine) = cell.get() {
                    engine.cleanup().await;
                }
                info!(engine = %kind, "Engine removed");
                true
            }
            None => false,
        }
    }

    /// Status report for every constructed engine.
    pub fn reports(&self) -> Vec<EngineReport> {
        self.cells
            .iter()
            .filter_map(|entry| {
                let engine = entry.value().get()?;
                Some(EngineReport {
                    kind: engine.kind(),
                    status: engine.status(),
                    last_error: engine.last_error(),
                    counters: engine.counters(),
                    descriptor: engine.describe(),
                })
            })
            .collect()
    }

    /// Shallow connection probe across every constructed engine.
    pub async fn test_all(&self) -> HashMap<EngineKind, bool> {
        let engines: Vec<_> = self
            .cells
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect();

        let mut results = HashMap::new();
        for engine in engines {
            let reachable = engine.test_connection().await;
            info!(engine = %engine.kind(), reachable, "Connection test");
            results.insert(engine.kind(), reachable);
        }
        results
    }

    /// Clean up every constructed engine and clear the cache.
    pub async fn cleanup_all(&self) {
        let kinds: Vec<EngineKind> = self.cells.iter().map(|e| *e.key()).collect();
        for kind in kinds {
            self.remove(kind).await;
        }
        info!("All engines cleaned up");
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

fn build_engine(
    kind: EngineKind,
    settings: &EngineSettings,
    default_output_dir: &std::path::Path,
) -> Arc<dyn ImageEngine> {
    match kind {
        EngineKind::Pollinations => {
            Arc::new(PollinationsEngine::new(settings, default_output_dir))
        }
        EngineKind::ComfyuiLocal => Arc::new(ComfyUiEngine::local(settings, default_output_dir)),
        EngineKind::ComfyuiCloud => Arc::new(ComfyUiEngine::cloud(settings, default_output_dir)),
        EngineKind::OpenaiDalle => Arc::new(DalleEngine::new(settings, default_output_dir)),
        EngineKind::StabilityAi => Arc::new(StabilityEngine::new(settings, default_output_dir)),
        EngineKind::CogviewFlash => Arc::new(CogViewEngine::new(settings, default_output_dir)),
    }
}
