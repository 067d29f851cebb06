//! Engine capability contract and the shared per-engine state block

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use utoipa::ToSchema;

use crate::engine::contracts::{
    EngineDescriptor, EngineKind, EngineStatus, GenerationConfig, GenerationContext,
    GenerationResult,
};

/// Point-in-time view of an engine's own counters
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CountersSnapshot {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Percentage in [0, 100]; 100 when no requests have been made yet.
    pub success_rate: f64,
    pub total_cost: f64,
}

struct StateInner {
    status: EngineStatus,
    last_error: String,
}

/// State every engine embeds: lifecycle status, last error, request counters
/// and the busy gate that serializes generate calls on one instance.
pub struct EngineCore {
    kind: EngineKind,
    state: RwLock<StateInner>,
    requests: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    total_cost: parking_lot::Mutex<f64>,
    gate: tokio::sync::Mutex<()>,
}

impl EngineCore {
    pub fn new(kind: EngineKind) -> Self {
        Self {
            kind,
            state: RwLock::new(StateInner {
                status: EngineStatus::Offline,
                last_error: String::new(),
            }),
            requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            total_cost: parking_lot::Mutex::new(0.0),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn status(&self) -> EngineStatus {
        self.state.read().status
    }

    pub fn set_status(&self, status: EngineStatus) {
        self.state.write().status = status;
    }

    pub fn last_error(&self) -> String {
        self.state.read().last_error.clone()
    }

    /// Record a failure and move to `Error`.
    pub fn fail(&self, error: impl Into<String>) {
        let mut state = self.state.write();
        state.status = EngineStatus::Error;
        state.last_error = error.into();
    }

    /// Serializes generate calls: one instance is never driven twice
    /// concurrently.
    pub fn gate(&self) -> &tokio::sync::Mutex<()> {
        &self.gate
    }

    /// Bookkeeping after one generate call. Sets `Idle` on success, `Error`
    /// with the message otherwise.
    pub fn finish(&self, success: bool, cost: f64, error: &str) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
            let mut state = self.state.write();
            state.status = EngineStatus::Idle;
        } else {
            self.errors.fetch_add(1, Ordering::Relaxed);
            let mut state = self.state.write();
            state.status = EngineStatus::Error;
            state.last_error = error.to_string();
        }
        *self.total_cost.lock() += cost;
    }

    pub fn counters(&self) -> CountersSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let success_rate = if requests == 0 {
            100.0
        } else {
            successes as f64 / requests as f64 * 100.0
        };
        CountersSnapshot {
            request_count: requests,
            success_count: successes,
            error_count: self.errors.load(Ordering::Relaxed),
            success_rate,
            total_cost: *self.total_cost.lock(),
        }
    }
}

/// One backend capable of producing images from a prompt.
///
/// Implementations must not let expected failures escape `generate` as
/// panics or errors: the only failure channel is a result with
/// `success == false` and a populated message.
#[async_trait]
pub trait ImageEngine: Send + Sync {
    /// Shared state block; the provided methods below read through it.
    fn core(&self) -> &EngineCore;

    /// Idempotent setup: build clients, verify credentials, probe the
    /// backend. `Idle` on success, `Error` with last_error set on failure.
    async fn initialize(&self) -> bool;

    /// Produce images for `config`. `Busy` for the duration, `Idle` or
    /// `Error` at completion.
    async fn generate(
        &self,
        config: &GenerationConfig,
        ctx: &GenerationContext,
    ) -> GenerationResult;

    /// Fast, shallow reachability probe independent of `generate`.
    async fn test_connection(&self) -> bool;

    /// Model identifiers this backend accepts.
    fn available_models(&self) -> Vec<String>;

    /// Static capability card, cheap to call repeatedly.
    fn describe(&self) -> EngineDescriptor;

    /// Release sessions and go `Offline`. Safe to call repeatedly.
    async fn cleanup(&self);

    fn kind(&self) -> EngineKind {
        self.core().kind()
    }

    fn status(&self) -> EngineStatus {
        self.core().status()
    }

    fn last_error(&self) -> String {
        self.core().last_error()
    }

    fn counters(&self) -> CountersSnapshot {
        self.core().counters()
    }
}

/// Registry-level view of one engine used by listings and the API layer
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EngineReport {
    pub kind: EngineKind,
    pub status: EngineStatus,
    pub last_error: String,
    pub counters: CountersSnapshot,
    pub descriptor: EngineDescriptor,
}
