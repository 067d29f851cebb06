//! Functional tests driving the service façade end to end over mock
//! engines: routing scenarios, admission serialization and runtime policy
//! updates.

#[path = "../common/mod.rs"]
mod common;

use common::{fast_retry, orchestrator_config, pref, setup, MockEngine};
use imggen_orchestrator::engine::contracts::{EngineKind, GenerationConfig};
use imggen_orchestrator::orchestrator::RoutingStrategy;
use imggen_orchestrator::service::ImageGenerationService;
use imggen_orchestrator::AppError;
use std::time::Duration;

fn config() -> GenerationConfig {
    GenerationConfig::new("a harbor at dawn")
}

fn service_with(
    engines: Vec<MockEngine>,
    preferences: Vec<imggen_orchestrator::orchestrator::EnginePreference>,
    concurrency_limit: usize,
    strategy: RoutingStrategy,
) -> ImageGenerationService {
    let (registry, orchestrator) = setup(
        engines,
        preferences,
        orchestrator_config(concurrency_limit, strategy, fast_retry(1)),
    );
    ImageGenerationService::new(registry, orchestrator)
}

#[tokio::test]
async fn test_empty_prompt_rejected_before_any_engine_runs() {
    let engine = MockEngine::new(EngineKind::Pollinations);
    let state = engine.handle();
    let service = service_with(
        vec![engine],
        vec![pref(EngineKind::Pollinations, 1)],
        5,
        RoutingStrategy::Priority,
    );

    let error = service
        .generate(GenerationConfig::new("   "), None, None)
        .await
        .unwrap_err();

    assert!(matches!(error, AppError::InvalidRequest(_)));
    assert_eq!(error.category(), "configuration");
    assert_eq!(state.calls(), 0);
}

#[tokio::test]
async fn test_scenario_back_to_back_calls_serialize_on_limit_one() {
    let engine = MockEngine::new(EngineKind::Pollinations).with_delay(Duration::from_millis(80));
    let state = engine.handle();
    let service = std::sync::Arc::new(service_with(
        vec![engine],
        vec![pref(EngineKind::Pollinations, 1)],
        1,
        RoutingStrategy::Priority,
    ));

    let first = {
        let service = service.clone();
        tokio::spawn(async move { service.generate(config(), None, None).await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = service.generate(config(), None, None).await.unwrap();
    assert!(second.is_queued());

    assert!(first.await.unwrap().success);

    tokio::time::timeout(Duration::from_secs(2), async {
        while state.calls() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queued request never executed");

    let spans = state.spans();
    assert!(spans[1].0 >= spans[0].1, "second call overlapped the first");
}

#[tokio::test]
async fn test_scenario_disabled_engine_invisible_to_all_strategies() {
    for strategy in [
        RoutingStrategy::Priority,
        RoutingStrategy::Fastest,
        RoutingStrategy::Cheapest,
        RoutingStrategy::LoadBalanced,
        RoutingStrategy::Random,
    ] {
        let enabled = MockEngine::new(EngineKind::Pollinations);
        let disabled = MockEngine::new(EngineKind::StabilityAi);
        let disabled_state = disabled.handle();

        let mut disabled_pref = pref(EngineKind::StabilityAi, 1);
        disabled_pref.enabled = false;

        let service = service_with(
            vec![enabled, disabled],
            vec![disabled_pref, pref(EngineKind::Pollinations, 9)],
            5,
            strategy,
        );

        for _ in 0..4 {
            let result = service.generate(config(), None, None).await.unwrap();
            assert_eq!(
                result.engine_kind,
                Some(EngineKind::Pollinations),
                "strategy {:?} selected a disabled engine",
                strategy
            );
        }
        assert_eq!(disabled_state.calls(), 0);
    }
}

#[tokio::test]
async fn test_scenario_cheapest_always_picks_free_candidate() {
    let free = MockEngine::new(EngineKind::CogviewFlash).with_cost(0.0);
    let paid = MockEngine::new(EngineKind::OpenaiDalle).with_cost(0.04);

    let service = service_with(
        vec![free, paid],
        vec![
            pref(EngineKind::OpenaiDalle, 1),
            pref(EngineKind::CogviewFlash, 9),
        ],
        5,
        RoutingStrategy::Cheapest,
    );

    for _ in 0..6 {
        let result = service.generate(config(), None, None).await.unwrap();
        assert_eq!(result.engine_kind, Some(EngineKind::CogviewFlash));
    }
}

#[tokio::test]
async fn test_set_policy_changes_routing_at_runtime() {
    let cheap = MockEngine::new(EngineKind::Pollinations).with_cost(0.0);
    let ranked = MockEngine::new(EngineKind::OpenaiDalle).with_cost(0.04);

    let service = service_with(
        vec![cheap, ranked],
        vec![
            pref(EngineKind::OpenaiDalle, 1),
            pref(EngineKind::Pollinations, 2),
        ],
        5,
        RoutingStrategy::Priority,
    );

    let by_rank = service.generate(config(), None, None).await.unwrap();
    assert_eq!(by_rank.engine_kind, Some(EngineKind::OpenaiDalle));

    service.set_policy(RoutingStrategy::Cheapest);
    assert_eq!(
        service.manager_status().routing_strategy,
        RoutingStrategy::Cheapest
    );

    let by_cost = service.generate(config(), None, None).await.unwrap();
    assert_eq!(by_cost.engine_kind, Some(EngineKind::Pollinations));
}

#[tokio::test]
async fn test_engine_hint_overrides_preference_order() {
    let service = service_with(
        vec![
            MockEngine::new(EngineKind::Pollinations),
            MockEngine::new(EngineKind::StabilityAi),
        ],
        vec![
            pref(EngineKind::Pollinations, 1),
            pref(EngineKind::StabilityAi, 2),
        ],
        5,
        RoutingStrategy::Priority,
    );

    let result = service
        .generate(config(), Some(vec![EngineKind::StabilityAi]), None)
        .await
        .unwrap();
    assert_eq!(result.engine_kind, Some(EngineKind::StabilityAi));
}

#[tokio::test]
async fn test_list_engines_and_models() {
    let service = service_with(
        vec![MockEngine::new(EngineKind::Pollinations).with_cost(0.0)],
        vec![pref(EngineKind::Pollinations, 1)],
        5,
        RoutingStrategy::Priority,
    );

    let engines = service.list_engines();
    assert_eq!(engines.len(), 1);
    assert!(engines[0].descriptor.is_free);

    let models = service.list_models(EngineKind::Pollinations).unwrap();
    assert_eq!(models, vec!["mock-model".to_string()]);

    let missing = service.list_models(EngineKind::OpenaiDalle).unwrap_err();
    assert!(matches!(missing, AppError::EngineNotFound(_)));
}

#[tokio::test]
async fn test_test_all_and_remove_engine() {
    let service = service_with(
        vec![
            MockEngine::new(EngineKind::Pollinations),
            MockEngine::new(EngineKind::StabilityAi).unreachable(),
        ],
        vec![
            pref(EngineKind::Pollinations, 1),
            pref(EngineKind::StabilityAi, 2),
        ],
        5,
        RoutingStrategy::Priority,
    );

    let results = service.test_all().await;
    assert_eq!(results[&EngineKind::Pollinations], true);
    assert_eq!(results[&EngineKind::StabilityAi], false);

    service.remove_engine(EngineKind::StabilityAi).await.unwrap();
    assert!(service
        .remove_engine(EngineKind::StabilityAi)
        .await
        .is_err());
    assert_eq!(service.list_engines().len(), 1);
}

#[tokio::test]
async fn test_manager_status_tracks_queue_and_stats() {
    let engine = MockEngine::new(EngineKind::Pollinations).with_delay(Duration::from_millis(100));
    let service = std::sync::Arc::new(service_with(
        vec![engine],
        vec![pref(EngineKind::Pollinations, 1)],
        1,
        RoutingStrategy::Priority,
    ));

    let first = {
        let service = service.clone();
        tokio::spawn(async move { service.generate(config(), None, None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let queued = service.generate(config(), None, None).await.unwrap();
    assert!(queued.is_queued());

    let status = service.manager_status();
    assert_eq!(status.concurrency_limit, 1);
    assert!(status.active_tasks >= 1);

    first.await.unwrap().unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let status = service.manager_status();
            if status.queue_size == 0 && status.active_tasks == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue never drained");

    let stats = &service.manager_status().performance_stats;
    let row = stats.get(&EngineKind::Pollinations).unwrap();
    assert!(row.total_requests >= 1);
}

#[tokio::test]
async fn test_shutdown_takes_every_engine_offline() {
    let service = service_with(
        vec![
            MockEngine::new(EngineKind::Pollinations),
            MockEngine::new(EngineKind::OpenaiDalle),
        ],
        vec![
            pref(EngineKind::Pollinations, 1),
            pref(EngineKind::OpenaiDalle, 2),
        ],
        5,
        RoutingStrategy::Priority,
    );

    service.shutdown().await;
    assert!(service.list_engines().is_empty());

    let result = service.generate(config(), None, None).await.unwrap();
    assert!(!result.success);
    assert!(result.error_message.contains("no engine available"));
}
