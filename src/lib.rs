//! Image Generation Orchestrator
//!
//! Dispatches text-to-image requests across heterogeneous backend engines
//! behind one uniform call, with policy-driven engine selection, bounded
//! retry with backoff, admission control and per-engine performance
//! telemetry.

pub mod api;
pub mod artifacts;
pub mod config;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod orchestrator;
pub mod service;

pub use error::{AppError, Result};

use std::sync::Arc;
use tokio::sync::RwLock;

use artifacts::ArtifactStore;
use service::ImageGenerationService;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<RwLock<config::Settings>>,
    pub service: Arc<ImageGenerationService>,
    pub artifacts: Arc<ArtifactStore>,
}
