//! Shared test helpers: a scriptable engine double and orchestrator setup.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use imggen_orchestrator::config::{OrchestratorConfig, RetrySettings};
use imggen_orchestrator::engine::contracts::{
    EngineDescriptor, EngineKind, EngineStatus, GenerationConfig, GenerationContext,
    GenerationResult,
};
use imggen_orchestrator::engine::registry::EngineRegistry;
use imggen_orchestrator::engine::traits::{EngineCore, ImageEngine};
use imggen_orchestrator::orchestrator::{EnginePreference, Orchestrator, RoutingStrategy};

/// Observable side of a [`MockEngine`], usable after the engine moved into
/// the registry.
#[derive(Default)]
pub struct MockState {
    calls: Mutex<u32>,
    spans: Mutex<Vec<(Instant, Instant)>>,
}

impl MockState {
    pub fn calls(&self) -> u32 {
        *self.calls.lock()
    }

    /// (start, end) of every generate invocation, in call order.
    pub fn spans(&self) -> Vec<(Instant, Instant)> {
        self.spans.lock().clone()
    }
}

/// Scriptable engine double: fails the first N calls, then succeeds after
/// an optional artificial delay.
pub struct MockEngine {
    core: EngineCore,
    state: Arc<MockState>,
    fail_first: u32,
    always_fail: bool,
    delay: Duration,
    cost_per_image: f64,
    reachable: bool,
}

impl MockEngine {
    pub fn new(kind: EngineKind) -> Self {
        let core = EngineCore::new(kind);
        core.set_status(EngineStatus::Idle);
        Self {
            core,
            state: Arc::new(MockState::default()),
            fail_first: 0,
            always_fail: false,
            delay: Duration::ZERO,
            cost_per_image: 0.0,
            reachable: true,
        }
    }

    pub fn failing_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    pub fn always_failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_cost(mut self, cost_per_image: f64) -> Self {
        self.cost_per_image = cost_per_image;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn handle(&self) -> Arc<MockState> {
        self.state.clone()
    }
}

#[async_trait]
impl ImageEngine for MockEngine {
    fn core(&self) -> &EngineCore {
        &self.core
    }

    async fn initialize(&self) -> bool {
        self.core.set_status(EngineStatus::Idle);
        true
    }

    async fn generate(
        &self,
        config: &GenerationConfig,
        ctx: &GenerationContext,
    ) -> GenerationResult {
        let _gate = self.core.gate().lock().await;
        let started = Instant::now();
        self.core.set_status(EngineStatus::Busy);

        if !self.delay.is_zero() {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    self.core.finish(false, 0.0, "generation cancelled");
                    return GenerationResult::failure_for(self.kind(), "generation cancelled")
                        .with_metadata("outcome", serde_json::json!("cancelled"));
                }
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        let call = {
            let mut calls = self.state.calls.lock();
            *calls += 1;
            *calls
        };
        self.state.spans.lock().push((started, Instant::now()));

        if self.always_fail || call <= self.fail_first {
            self.core.finish(false, 0.0, "simulated failure");
            return GenerationResult::failure_for(self.kind(), "simulated failure");
        }

        let cost = self.cost_per_image * config.batch_size as f64;
        self.core.finish(true, cost, "");
        GenerationResult::completed(
            self.kind(),
            vec![PathBuf::from(format!("/tmp/{}_{}.png", self.kind(), call))],
            started.elapsed().as_secs_f64(),
            cost,
        )
    }

    async fn test_connection(&self) -> bool {
        self.reachable
    }

    fn available_models(&self) -> Vec<String> {
        vec!["mock-model".to_string()]
    }

    fn describe(&self) -> EngineDescriptor {
        EngineDescriptor {
            name: format!("mock {}", self.kind()),
            version: "0.0".into(),
            description: "test double".into(),
            is_free: self.cost_per_image == 0.0,
            supports_batch: true,
            supports_negative_prompt: true,
            max_batch_size: 10,
            supported_resolutions: vec![(1024, 1024)],
            cost_per_image: self.cost_per_image,
            rate_limit: 0,
        }
    }

    async fn cleanup(&self) {
        self.core.set_status(EngineStatus::Offline);
    }
}

/// Fast retry schedule so tests do not sleep for real seconds.
pub fn fast_retry(max_retries: u32) -> RetrySettings {
    RetrySettings {
        max_retries,
        retry_delay_secs: 0.02,
        backoff_factor: 2.0,
    }
}

pub fn orchestrator_config(
    concurrency_limit: usize,
    strategy: RoutingStrategy,
    retry: RetrySettings,
) -> OrchestratorConfig {
    OrchestratorConfig {
        concurrency_limit,
        routing_strategy: strategy,
        retry,
    }
}

/// Registry plus orchestrator wired over the given mock engines.
pub fn setup(
    engines: Vec<MockEngine>,
    preferences: Vec<EnginePreference>,
    config: OrchestratorConfig,
) -> (Arc<EngineRegistry>, Arc<Orchestrator>) {
    let registry = Arc::new(EngineRegistry::new("./generated-test"));
    for engine in engines {
        registry.register_custom(Arc::new(engine));
    }
    let orchestrator = Arc::new(Orchestrator::new(registry.clone(), &config, preferences));
    (registry, orchestrator)
}

pub fn pref(kind: EngineKind, priority: u32) -> EnginePreference {
    EnginePreference::new(kind, priority)
}
