//! Unit tests for the orchestrator: selection strategies, retry behavior
//! and admission control.

#[path = "../common/mod.rs"]
mod common;

use common::{fast_retry, orchestrator_config, pref, setup, MockEngine};
use imggen_orchestrator::engine::contracts::{EngineKind, GenerationConfig};
use imggen_orchestrator::orchestrator::RoutingStrategy;
use std::time::Duration;
use uuid::Uuid;

fn config() -> GenerationConfig {
    GenerationConfig::new("a lighthouse at dusk")
}

#[tokio::test]
async fn test_priority_selects_smallest_rank() {
    let (_, orchestrator) = setup(
        vec![
            MockEngine::new(EngineKind::Pollinations),
            MockEngine::new(EngineKind::OpenaiDalle),
        ],
        vec![
            pref(EngineKind::Pollinations, 2),
            pref(EngineKind::OpenaiDalle, 1),
        ],
        orchestrator_config(5, RoutingStrategy::Priority, fast_retry(0)),
    );

    let result = orchestrator.generate(config(), None, None).await;
    assert!(result.success);
    assert_eq!(result.engine_kind, Some(EngineKind::OpenaiDalle));
}

#[tokio::test]
async fn test_fastest_prefers_lower_average_time() {
    let slow = MockEngine::new(EngineKind::OpenaiDalle).with_delay(Duration::from_millis(80));
    let fast = MockEngine::new(EngineKind::Pollinations).with_delay(Duration::from_millis(5));

    let (_, orchestrator) = setup(
        vec![slow, fast],
        vec![
            pref(EngineKind::OpenaiDalle, 1),
            pref(EngineKind::Pollinations, 2),
        ],
        orchestrator_config(5, RoutingStrategy::Fastest, fast_retry(0)),
    );

    // Seed one sample per engine through explicit hints (equal sample counts).
    orchestrator
        .generate(config(), Some(vec![EngineKind::OpenaiDalle]), None)
        .await;
    orchestrator
        .generate(config(), Some(vec![EngineKind::Pollinations]), None)
        .await;

    let result = orchestrator.generate(config(), None, None).await;
    assert!(result.success);
    assert_eq!(result.engine_kind, Some(EngineKind::Pollinations));
}

#[tokio::test]
async fn test_fastest_tie_breaks_by_rank() {
    // No samples at all: both averages are unknown, rank decides.
    let (_, orchestrator) = setup(
        vec![
            MockEngine::new(EngineKind::Pollinations),
            MockEngine::new(EngineKind::OpenaiDalle),
        ],
        vec![
            pref(EngineKind::Pollinations, 3),
            pref(EngineKind::OpenaiDalle, 1),
        ],
        orchestrator_config(5, RoutingStrategy::Fastest, fast_retry(0)),
    );

    let result = orchestrator.generate(config(), None, None).await;
    assert_eq!(result.engine_kind, Some(EngineKind::OpenaiDalle));
}

#[tokio::test]
async fn test_cheapest_picks_free_engine_regardless_of_rank() {
    let free = MockEngine::new(EngineKind::Pollinations).with_cost(0.0);
    let paid = MockEngine::new(EngineKind::OpenaiDalle).with_cost(0.04);

    let (_, orchestrator) = setup(
        vec![free, paid],
        vec![
            // The paid engine has the better rank; cheapest must ignore it.
            pref(EngineKind::OpenaiDalle, 1),
            pref(EngineKind::Pollinations, 9),
        ],
        orchestrator_config(5, RoutingStrategy::Cheapest, fast_retry(0)),
    );

    for _ in 0..5 {
        let result = orchestrator.generate(config(), None, None).await;
        assert_eq!(result.engine_kind, Some(EngineKind::Pollinations));
    }
}

#[tokio::test]
async fn test_load_balanced_picks_least_recently_used() {
    let (_, orchestrator) = setup(
        vec![
            MockEngine::new(EngineKind::Pollinations),
            MockEngine::new(EngineKind::OpenaiDalle),
        ],
        vec![
            pref(EngineKind::Pollinations, 1),
            pref(EngineKind::OpenaiDalle, 2),
        ],
        orchestrator_config(5, RoutingStrategy::LoadBalanced, fast_retry(0)),
    );

    // First call goes to a never-used engine; the follow-up must pick the
    // other never-used one, then they alternate.
    let first = orchestrator.generate(config(), None, None).await;
    let second = orchestrator.generate(config(), None, None).await;
    assert_ne!(first.engine_kind, second.engine_kind);

    let third = orchestrator.generate(config(), None, None).await;
    assert_eq!(third.engine_kind, first.engine_kind);
}

#[tokio::test]
async fn test_disabled_preference_never_selected() {
    let enabled = MockEngine::new(EngineKind::Pollinations);
    let disabled = MockEngine::new(EngineKind::OpenaiDalle);
    let disabled_state = disabled.handle();

    let mut disabled_pref = pref(EngineKind::OpenaiDalle, 1);
    disabled_pref.enabled = false;

    let (_, orchestrator) = setup(
        vec![enabled, disabled],
        vec![disabled_pref, pref(EngineKind::Pollinations, 5)],
        orchestrator_config(5, RoutingStrategy::Priority, fast_retry(0)),
    );

    for _ in 0..5 {
        let result = orchestrator.generate(config(), None, None).await;
        assert_eq!(result.engine_kind, Some(EngineKind::Pollinations));
    }

    // Even an explicit hint cannot resurrect a disabled engine.
    let hinted = orchestrator
        .generate(config(), Some(vec![EngineKind::OpenaiDalle]), None)
        .await;
    assert!(!hinted.success);
    assert_eq!(disabled_state.calls(), 0);
}

#[tokio::test]
async fn test_cost_ceiling_filters_candidates() {
    let expensive = MockEngine::new(EngineKind::OpenaiDalle).with_cost(0.5);
    let cheap = MockEngine::new(EngineKind::Pollinations).with_cost(0.0);

    let mut capped = pref(EngineKind::OpenaiDalle, 1);
    capped.max_cost_per_image = Some(0.1);

    let (_, orchestrator) = setup(
        vec![expensive, cheap],
        vec![capped, pref(EngineKind::Pollinations, 2)],
        orchestrator_config(5, RoutingStrategy::Priority, fast_retry(0)),
    );

    let result = orchestrator.generate(config(), None, None).await;
    assert_eq!(result.engine_kind, Some(EngineKind::Pollinations));
}

#[tokio::test]
async fn test_empty_candidate_set_fails_immediately() {
    let (_, orchestrator) = setup(
        vec![],
        vec![pref(EngineKind::Pollinations, 1)],
        orchestrator_config(5, RoutingStrategy::Priority, fast_retry(3)),
    );

    let result = orchestrator.generate(config(), None, None).await;
    assert!(!result.success);
    assert!(result.error_message.contains("no engine available"));
    // Never retried: no attempts metadata is recorded.
    assert!(result.metadata.get("attempts").is_none());
}

#[tokio::test]
async fn test_retry_exhaustion_invokes_max_retries_plus_one() {
    let engine = MockEngine::new(EngineKind::Pollinations).always_failing();
    let state = engine.handle();

    let (_, orchestrator) = setup(
        vec![engine],
        vec![pref(EngineKind::Pollinations, 1)],
        orchestrator_config(5, RoutingStrategy::Priority, fast_retry(3)),
    );

    let result = orchestrator.generate(config(), None, None).await;
    assert!(!result.success);
    assert_eq!(state.calls(), 4);
    assert_eq!(result.metadata["attempts"], serde_json::json!(4));
    assert!(result.error_message.contains("simulated failure"));
}

#[tokio::test]
async fn test_two_failures_then_success_takes_three_attempts() {
    let engine = MockEngine::new(EngineKind::Pollinations).failing_first(2);
    let state = engine.handle();

    let (_, orchestrator) = setup(
        vec![engine],
        vec![pref(EngineKind::Pollinations, 1)],
        orchestrator_config(5, RoutingStrategy::Priority, fast_retry(3)),
    );

    let result = orchestrator.generate(config(), None, None).await;
    assert!(result.success);
    assert_eq!(state.calls(), 3);
    assert_eq!(result.metadata["attempts"], serde_json::json!(3));
}

#[tokio::test]
async fn test_backoff_delays_accumulate() {
    let engine = MockEngine::new(EngineKind::Pollinations).failing_first(2);

    let (_, orchestrator) = setup(
        vec![engine],
        vec![pref(EngineKind::Pollinations, 1)],
        orchestrator_config(5, RoutingStrategy::Priority, fast_retry(3)),
    );

    let started = std::time::Instant::now();
    let result = orchestrator.generate(config(), None, None).await;
    assert!(result.success);
    // Two failures sleep 20 ms then 40 ms before the third attempt.
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[tokio::test]
async fn test_admission_queues_at_capacity() {
    let engine = MockEngine::new(EngineKind::Pollinations).with_delay(Duration::from_millis(150));
    let state = engine.handle();

    let (_, orchestrator) = setup(
        vec![engine],
        vec![pref(EngineKind::Pollinations, 1)],
        orchestrator_config(1, RoutingStrategy::Priority, fast_retry(0)),
    );

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.generate(config(), None, None).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Capacity is taken: the second call is deferred, not run.
    let second = orchestrator.generate(config(), None, None).await;
    assert!(second.is_queued());
    assert_eq!(second.metadata["queue_position"], serde_json::json!(1));
    assert!(orchestrator.active_tasks() <= 1);

    let first = first.await.unwrap();
    assert!(first.success);

    // The queued task drains and runs after the first completes.
    tokio::time::timeout(Duration::from_secs(2), async {
        while state.calls() < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("queued task never ran");

    let spans = state.spans();
    assert_eq!(spans.len(), 2);
    // Serialized execution: the second invocation starts after the first ends.
    assert!(spans[1].0 >= spans[0].1);
}

#[tokio::test]
async fn test_queued_request_can_be_cancelled() {
    let engine = MockEngine::new(EngineKind::Pollinations).with_delay(Duration::from_millis(120));
    let state = engine.handle();

    let (_, orchestrator) = setup(
        vec![engine],
        vec![pref(EngineKind::Pollinations, 1)],
        orchestrator_config(1, RoutingStrategy::Priority, fast_retry(0)),
    );

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.generate(config(), None, None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let queued = orchestrator.generate(config(), None, None).await;
    assert!(queued.is_queued());
    let request_id: Uuid = queued.metadata["request_id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    assert!(orchestrator.cancel(request_id));
    assert_eq!(orchestrator.queue_size(), 0);

    first.await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    // The cancelled task never reached the engine.
    assert_eq!(state.calls(), 1);
}

#[tokio::test]
async fn test_wait_ceiling_converts_to_retryable_failure() {
    let engine = MockEngine::new(EngineKind::Pollinations).with_delay(Duration::from_millis(200));

    let mut tight = pref(EngineKind::Pollinations, 1);
    tight.max_wait = Duration::from_millis(40);

    let (_, orchestrator) = setup(
        vec![engine],
        vec![tight],
        orchestrator_config(5, RoutingStrategy::Priority, fast_retry(1)),
    );

    let result = orchestrator.generate(config(), None, None).await;
    assert!(!result.success);
    assert!(result.error_message.contains("wait ceiling"));
}

#[tokio::test]
async fn test_telemetry_records_every_top_level_call() {
    let engine = MockEngine::new(EngineKind::Pollinations).failing_first(1);

    let (_, orchestrator) = setup(
        vec![engine],
        vec![pref(EngineKind::Pollinations, 1)],
        orchestrator_config(5, RoutingStrategy::Priority, fast_retry(1)),
    );

    orchestrator.generate(config(), None, None).await;
    orchestrator.generate(config(), None, None).await;

    let stats = orchestrator.stats_for(EngineKind::Pollinations).unwrap();
    assert_eq!(stats.total_requests, 2);
    assert!(stats.seconds_since_last_use.is_some());
    assert!(stats.avg_generation_time > 0.0);
}

#[tokio::test]
async fn test_status_reports_strategy_and_limits() {
    let (_, orchestrator) = setup(
        vec![MockEngine::new(EngineKind::Pollinations)],
        vec![pref(EngineKind::Pollinations, 1)],
        orchestrator_config(7, RoutingStrategy::Cheapest, fast_retry(2)),
    );

    let status = orchestrator.status();
    assert_eq!(status.routing_strategy, RoutingStrategy::Cheapest);
    assert_eq!(status.concurrency_limit, 7);
    assert_eq!(status.active_tasks, 0);
    assert_eq!(status.queue_size, 0);
    assert_eq!(status.preferences.len(), 1);
}
