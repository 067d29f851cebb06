//! Engine orchestration: selection policy, admission control, retry with
//! backoff and per-engine performance telemetry.

pub mod retry;
pub mod stats;

pub use retry::{RetryPolicy, RotationCounter};
pub use stats::{PerformanceStats, StatsSnapshot};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::engine::contracts::{
    EngineKind, EngineStatus, GenerationConfig, GenerationContext, GenerationResult, ProgressSink,
};
use crate::engine::registry::EngineRegistry;
use crate::engine::traits::ImageEngine;

/// How long a cancelled attempt may keep running before it is aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// How the orchestrator picks among candidate engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    #[default]
    Priority,
    Fastest,
    Cheapest,
    LoadBalanced,
    Random,
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RoutingStrategy::Priority => "priority",
            RoutingStrategy::Fastest => "fastest",
            RoutingStrategy::Cheapest => "cheapest",
            RoutingStrategy::LoadBalanced => "load_balanced",
            RoutingStrategy::Random => "random",
        };
        f.write_str(s)
    }
}

impl FromStr for RoutingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "priority" => Ok(RoutingStrategy::Priority),
            "fastest" => Ok(RoutingStrategy::Fastest),
            "cheapest" => Ok(RoutingStrategy::Cheapest),
            "load_balanced" => Ok(RoutingStrategy::LoadBalanced),
            "random" => Ok(RoutingStrategy::Random),
            other => Err(format!("unknown routing strategy: {}", other)),
        }
    }
}

/// Routing preference for one engine kind
#[derive(Debug, Clone, PartialEq)]
pub struct EnginePreference {
    pub kind: EngineKind,
    /// Lower rank wins under the priority strategy.
    pub priority: u32,
    /// Per-image cost ceiling; `None` means unlimited.
    pub max_cost_per_image: Option<f64>,
    /// Wait ceiling applied to each generate attempt.
    pub max_wait: Duration,
    pub enabled: bool,
}

impl EnginePreference {
    pub fn new(kind: EngineKind, priority: u32) -> Self {
        Self {
            kind,
            priority,
            max_cost_per_image: None,
            max_wait: Duration::from_secs(60),
            enabled: true,
        }
    }
}

/// Serializable view of a preference for status reporting
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PreferenceView {
    pub kind: EngineKind,
    pub priority: u32,
    pub max_cost_per_image: Option<f64>,
    pub max_wait_secs: f64,
    pub enabled: bool,
}

impl From<&EnginePreference> for PreferenceView {
    fn from(pref: &EnginePreference) -> Self {
        Self {
            kind: pref.kind,
            priority: pref.priority,
            max_cost_per_image: pref.max_cost_per_image,
            max_wait_secs: pref.max_wait.as_secs_f64(),
            enabled: pref.enabled,
        }
    }
}

/// Orchestrator status surfaced to callers
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ManagerStatus {
    pub routing_strategy: RoutingStrategy,
    pub active_tasks: usize,
    pub queue_size: usize,
    pub concurrency_limit: usize,
    pub performance_stats: HashMap<EngineKind, StatsSnapshot>,
    pub preferences: Vec<PreferenceView>,
}

/// A deferred generate invocation held while admission control is saturated
struct QueuedTask {
    request_id: Uuid,
    config: GenerationConfig,
    preferred: Option<Vec<EngineKind>>,
    progress: Option<ProgressSink>,
    cancel: CancellationToken,
}

struct Candidate {
    engine: Arc<dyn ImageEngine>,
    preference: EnginePreference,
}

struct Inner {
    registry: Arc<EngineRegistry>,
    strategy: RwLock<RoutingStrategy>,
    preferences: RwLock<Vec<EnginePreference>>,
    retry: RetryPolicy,
    concurrency_limit: usize,
    active: AtomicUsize,
    queue: Mutex<VecDeque<QueuedTask>>,
    stats: Mutex<HashMap<EngineKind, PerformanceStats>>,
    cancellations: DashMap<Uuid, CancellationToken>,
}

/// Selects, invokes, retries and load-tracks engines.
///
/// Cheap to clone (shared state behind one `Arc`). Shared mutable state is
/// limited to the queue, the stats table and the cancellation map; all are
/// guarded for atomic read-then-write.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<EngineRegistry>,
        config: &OrchestratorConfig,
        preferences: Vec<EnginePreference>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                strategy: RwLock::new(config.routing_strategy),
                preferences: RwLock::new(preferences),
                retry: RetryPolicy::from(&config.retry),
                concurrency_limit: config.concurrency_limit.max(1),
                active: AtomicUsize::new(0),
                queue: Mutex::new(VecDeque::new()),
                stats: Mutex::new(HashMap::new()),
                cancellations: DashMap::new(),
            }),
        }
    }

    pub fn strategy(&self) -> RoutingStrategy {
        *self.inner.strategy.read()
    }

    pub fn set_strategy(&self, strategy: RoutingStrategy) {
        *self.inner.strategy.write() = strategy;
        info!(strategy = %strategy, "Routing strategy updated");
    }

    pub fn set_preferences(&self, preferences: Vec<EnginePreference>) {
        *self.inner.preferences.write() = preferences;
        info!("Engine preferences updated");
    }

    pub fn active_tasks(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn queue_size(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Run one generation request.
    ///
    /// At capacity the request is queued and a deferred-acceptance result is
    /// returned immediately (`metadata.outcome == "queued"`); the queued task
    /// runs when a slot frees and its result is discarded.
    pub async fn generate(
        &self,
        config: GenerationConfig,
        preferred: Option<Vec<EngineKind>>,
        progress: Option<ProgressSink>,
    ) -> GenerationResult {
        let request_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.inner.cancellations.insert(request_id, cancel.clone());

        if !self.try_admit() {
            let position = {
                let mut queue = self.inner.queue.lock();
                queue.push_back(QueuedTask {
                    request_id,
                    config,
                    preferred,
                    progress,
                    cancel,
                });
                queue.len()
            };
            debug!(request_id = %request_id, position, "Request queued, concurrency limit reached");
            // A slot may have freed between the admit check and the push.
            self.drain();
            return GenerationResult::failure("request queued for deferred execution")
                .with_metadata("outcome", serde_json::json!("queued"))
                .with_metadata("request_id", serde_json::json!(request_id.to_string()))
                .with_metadata("queue_position", serde_json::json!(position));
        }

        let ctx = GenerationContext::new(progress, cancel);
        let result = self.execute(request_id, &config, preferred.as_deref(), &ctx).await;
        self.inner.cancellations.remove(&request_id);
        self.inner.active.fetch_sub(1, Ordering::Release);
        self.drain();
        result
    }

    /// Cancel a request: queued tasks are dropped, in-flight tasks get their
    /// token cancelled. Returns false for unknown ids.
    pub fn cancel(&self, request_id: Uuid) -> bool {
        {
            let mut queue = self.inner.queue.lock();
            if let Some(pos) = queue.iter().position(|t| t.request_id == request_id) {
                queue.remove(pos);
                self.inner.cancellations.remove(&request_id);
                info!(request_id = %request_id, "Removed queued request");
                return true;
            }
        }

        if let Some((_, token)) = self.inner.cancellations.remove(&request_id) {
            token.cancel();
            info!(request_id = %request_id, "Cancelled in-flight request");
            true
        } else {
            false
        }
    }

    pub fn status(&self) -> ManagerStatus {
        let stats = self.inner.stats.lock();
        ManagerStatus {
            routing_strategy: self.strategy(),
            active_tasks: self.active_tasks(),
            queue_size: self.queue_size(),
            concurrency_limit: self.inner.concurrency_limit,
            performance_stats: stats.iter().map(|(k, v)| (*k, v.snapshot())).collect(),
            preferences: self
                .inner
                .preferences
                .read()
                .iter()
                .map(PreferenceView::from)
                .collect(),
        }
    }

    /// Stats row for one kind, if any call has completed.
    pub fn stats_for(&self, kind: EngineKind) -> Option<StatsSnapshot> {
        self.inner.stats.lock().get(&kind).map(|s| s.snapshot())
    }

    fn try_admit(&self) -> bool {
        let mut current = self.inner.active.load(Ordering::Acquire);
        loop {
            if current >= self.inner.concurrency_limit {
                return false;
            }
            match self.inner.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Start queued tasks while capacity is free, strictly FIFO.
    fn drain(&self) {
        loop {
            if !self.try_admit() {
                return;
            }
            let task = self.inner.queue.lock().pop_front();
            let Some(task) = task else {
                self.inner.active.fetch_sub(1, Ordering::Release);
                // Re-check: a task may have been enqueued while the slot
                // was still held here.
                if self.inner.queue.lock().is_empty() {
                    return;
                }
                continue;
            };

            let this = self.clone();
            tokio::spawn(async move {
                let request_id = task.request_id;
                let ctx = GenerationContext::new(task.progress, task.cancel);
                let result = this
                    .execute(request_id, &task.config, task.preferred.as_deref(), &ctx)
                    .await;
                this.inner.cancellations.remove(&request_id);
                this.inner.active.fetch_sub(1, Ordering::Release);
                this.drain();
                // Queued results are discarded; artifacts and stats remain.
                if result.success {
                    debug!(request_id = %request_id, "Queued request completed");
                } else {
                    warn!(
                        request_id = %request_id,
                        error = %result.error_message,
                        "Queued request failed"
                    );
                }
            });
        }
    }

    /// One full attempt chain: select, retry with backoff, record telemetry.
    async fn execute(
        &self,
        request_id: Uuid,
        config: &GenerationConfig,
        preferred: Option<&[EngineKind]>,
        ctx: &GenerationContext,
    ) -> GenerationResult {
        let start = Instant::now();

        let Some(candidate) = self.select_engine(config, preferred) else {
            warn!(request_id = %request_id, "No engine available for request");
            return GenerationResult::failure("no engine available")
                .with_metadata("outcome", serde_json::json!("no_engine"))
                .with_metadata("request_id", serde_json::json!(request_id.to_string()));
        };

        let kind = candidate.engine.kind();
        debug!(
            request_id = %request_id,
            engine = %kind,
            strategy = %self.strategy(),
            "Engine selected"
        );

        let result = self.generate_with_retry(candidate, config, ctx).await;

        let elapsed = start.elapsed().as_secs_f64();
        let success_rate = self
            .inner
            .registry
            .active(kind)
            .map(|e| e.counters().success_rate)
            .unwrap_or(100.0);
        self.inner
            .stats
            .lock()
            .entry(kind)
            .or_default()
            .record(elapsed, success_rate);

        result.with_metadata("request_id", serde_json::json!(request_id.to_string()))
    }

    /// Candidate set: preferred kinds if given, otherwise every enabled
    /// preference; intersected with registered engines in Idle or Busy
    /// status and filtered by the per-image cost ceiling. A disabled
    /// preference excludes its kind even when explicitly preferred.
    fn candidates(&self, preferred: Option<&[EngineKind]>) -> Vec<Candidate> {
        let preferences = self.inner.preferences.read();
        let pref_for = |kind: EngineKind| preferences.iter().find(|p| p.kind == kind);

        let kinds: Vec<(EngineKind, EnginePreference)> = match preferred {
            Some(list) => list
                .iter()
                .filter_map(|kind| match pref_for(*kind) {
                    Some(pref) if !pref.enabled => None,
                    Some(pref) => Some((*kind, pref.clone())),
                    None => Some((*kind, EnginePreference::new(*kind, u32::MAX))),
                })
                .collect(),
            None => preferences
                .iter()
                .filter(|p| p.enabled)
                .map(|p| (p.kind, p.clone()))
                .collect(),
        };

        kinds
            .into_iter()
            .filter_map(|(kind, preference)| {
                let engine = self.inner.registry.active(kind)?;
                if !matches!(engine.status(), EngineStatus::Idle | EngineStatus::Busy) {
                    return None;
                }
                if let Some(ceiling) = preference.max_cost_per_image {
                    if engine.describe().cost_per_image > ceiling {
                        return None;
                    }
                }
                Some(Candidate { engine, preference })
            })
            .collect()
    }

    fn select_engine(
        &self,
        config: &GenerationConfig,
        preferred: Option<&[EngineKind]>,
    ) -> Option<Candidate> {
        let mut candidates = self.candidates(preferred);
        if candidates.is_empty() {
            return None;
        }

        let index = match self.strategy() {
            RoutingStrategy::Priority => candidates
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| c.preference.priority)
                .map(|(i, _)| i)?,
            RoutingStrategy::Fastest => {
                let stats = self.inner.stats.lock();
                candidates
                    .iter()
                    .enumerate()
                    .min_by(|(_, a), (_, b)| {
                        let time_a = avg_time(&stats, a.engine.kind());
                        let time_b = avg_time(&stats, b.engine.kind());
                        time_a
                            .total_cmp(&time_b)
                            .then(a.preference.priority.cmp(&b.preference.priority))
                    })
                    .map(|(i, _)| i)?
            }
            RoutingStrategy::Cheapest => candidates
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    let cost_a = a.engine.describe().cost_per_image * config.batch_size as f64;
                    let cost_b = b.engine.describe().cost_per_image * config.batch_size as f64;
                    cost_a.total_cmp(&cost_b)
                })
                .map(|(i, _)| i)?,
            RoutingStrategy::LoadBalanced => {
                let stats = self.inner.stats.lock();
                candidates
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, c)| {
                        stats
                            .get(&c.engine.kind())
                            .and_then(|s| s.last_used)
                            // Never-used engines rank oldest.
                            .map_or(Duration::MAX, |t| t.elapsed())
                    })
                    .map(|(i, _)| i)?
            }
            RoutingStrategy::Random => rand::thread_rng().gen_range(0..candidates.len()),
        };

        Some(candidates.swap_remove(index))
    }

    /// Retry the selected engine with exponential backoff. No failover to
    /// another kind mid-chain: exhaustion reports the last error and the
    /// attempt count.
    async fn generate_with_retry(
        &self,
        candidate: Candidate,
        config: &GenerationConfig,
        ctx: &GenerationContext,
    ) -> GenerationResult {
        let Candidate { engine, preference } = candidate;
        let kind = engine.kind();
        let total = self.inner.retry.total_attempts();
        let mut delay = self.inner.retry.retry_delay;
        let mut last_error = String::new();

        for attempt in 1..=total {
            if ctx.is_cancelled() {
                return cancelled_result(kind);
            }

            ctx.report(&format!("attempt {}/{} on {}", attempt, total, kind));
            let result = self
                .run_attempt(engine.clone(), preference.max_wait, config.clone(), ctx)
                .await;

            if result.success {
                return result.with_metadata("attempts", serde_json::json!(attempt));
            }
            if result.is_cancelled() {
                return result;
            }

            last_error = result.error_message.clone();
            warn!(
                engine = %kind,
                attempt,
                error = %last_error,
                "Generation attempt failed"
            );

            if attempt < total {
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(self.inner.retry.backoff_factor);
            }
        }

        GenerationResult::failure_for(
            kind,
            format!(
                "generation failed after {} retries; last error: {}",
                self.inner.retry.max_retries, last_error
            ),
        )
        .with_metadata("attempts", serde_json::json!(total))
    }

    /// One attempt, spawned so an engine fault cannot take down the
    /// dispatch loop, and bounded by the preference wait ceiling. A
    /// timed-out attempt is cancelled through a child token and the engine
    /// is given a grace period to run its own cancellation path, keeping
    /// its status and counters consistent; only an unresponsive task is
    /// aborted, with the engine forced into a terminal error state.
    async fn run_attempt(
        &self,
        engine: Arc<dyn ImageEngine>,
        max_wait: Duration,
        config: GenerationConfig,
        ctx: &GenerationContext,
    ) -> GenerationResult {
        let kind = engine.kind();
        let attempt_ctx = GenerationContext::new(ctx.progress.clone(), ctx.cancel.child_token());
        let cancel = attempt_ctx.cancel.clone();
        let task_engine = engine.clone();
        let mut handle =
            tokio::spawn(async move { task_engine.generate(&config, &attempt_ctx).await });

        match tokio::time::timeout(max_wait, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                let message = format!("engine task failed: {}", join_error);
                // The task died before its own bookkeeping could run.
                engine.core().fail(message.clone());
                GenerationResult::failure_for(kind, message)
            }
            Err(_) => {
                let message = format!(
                    "attempt exceeded wait ceiling of {:.1}s",
                    max_wait.as_secs_f64()
                );
                cancel.cancel();
                if tokio::time::timeout(CANCEL_GRACE, &mut handle).await.is_err() {
                    handle.abort();
                    engine.core().fail(message.clone());
                }
                GenerationResult::failure_for(kind, message)
            }
        }
    }
}

fn avg_time(stats: &HashMap<EngineKind, PerformanceStats>, kind: EngineKind) -> f64 {
    stats
        .get(&kind)
        .filter(|s| s.total_requests > 0)
        .map(|s| s.avg_generation_time)
        .unwrap_or(f64::INFINITY)
}

fn cancelled_result(kind: EngineKind) -> GenerationResult {
    GenerationResult::failure_for(kind, "generation cancelled")
        .with_metadata("outcome", serde_json::json!("cancelled"))
}
