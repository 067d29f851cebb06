//! Unit tests for configuration loading and validation

use imggen_orchestrator::config::{EngineSettings, Settings};
use imggen_orchestrator::engine::contracts::EngineKind;
use imggen_orchestrator::orchestrator::RoutingStrategy;
use std::io::Write;

const SAMPLE_CONFIG: &str = r#"
server:
  host: 127.0.0.1
  port: 9090

storage:
  base_path: /var/lib/imggen
  url_prefix: http://localhost:9090/files

orchestrator:
  concurrency_limit: 2
  routing_strategy: cheapest
  retry:
    max_retries: 5
    retry_delay_secs: 0.5
    backoff_factor: 3.0

engines:
  - kind: pollinations
    priority: 1
  - kind: openai_dalle
    priority: 5
    max_cost_per_image: 0.5
    options:
      api_key_env: OPENAI_API_KEY
      model: dall-e-3
  - kind: comfyui_local
    enabled: false
    priority: 2
    options:
      base_url: http://127.0.0.1:8188
"#;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_sample_config() {
    let file = write_config(SAMPLE_CONFIG);
    let settings = Settings::load_from_path(file.path()).unwrap();

    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 9090);
    assert_eq!(settings.orchestrator.concurrency_limit, 2);
    assert_eq!(
        settings.orchestrator.routing_strategy,
        RoutingStrategy::Cheapest
    );
    assert_eq!(settings.orchestrator.retry.max_retries, 5);
    assert_eq!(settings.orchestrator.retry.backoff_factor, 3.0);
    assert_eq!(settings.engines.len(), 3);
    assert!(settings.validate().is_ok());
}

#[test]
fn test_enabled_engines_filters_disabled() {
    let file = write_config(SAMPLE_CONFIG);
    let settings = Settings::load_from_path(file.path()).unwrap();

    let enabled: Vec<EngineKind> = settings.enabled_engines().iter().map(|e| e.kind).collect();
    assert!(enabled.contains(&EngineKind::Pollinations));
    assert!(enabled.contains(&EngineKind::OpenaiDalle));
    assert!(!enabled.contains(&EngineKind::ComfyuiLocal));
}

#[test]
fn test_preferences_carry_ceilings() {
    let file = write_config(SAMPLE_CONFIG);
    let settings = Settings::load_from_path(file.path()).unwrap();

    let prefs = settings.preferences();
    let dalle = prefs
        .iter()
        .find(|p| p.kind == EngineKind::OpenaiDalle)
        .unwrap();
    assert_eq!(dalle.priority, 5);
    assert_eq!(dalle.max_cost_per_image, Some(0.5));

    let comfy = prefs
        .iter()
        .find(|p| p.kind == EngineKind::ComfyuiLocal)
        .unwrap();
    assert!(!comfy.enabled);
}

#[test]
fn test_missing_file_yields_defaults() {
    let settings = Settings::load_from_path("does/not/exist.yaml").unwrap();
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.orchestrator.concurrency_limit, 5);
    assert_eq!(
        settings.orchestrator.routing_strategy,
        RoutingStrategy::Priority
    );
    assert!(settings.engines.is_empty());
}

#[test]
fn test_unknown_option_keys_are_kept_but_harmless() {
    let file = write_config(
        r#"
engines:
  - kind: pollinations
    options:
      base_url: http://localhost:1234
      frobnicate: "yes"
"#,
    );
    let settings = Settings::load_from_path(file.path()).unwrap();
    let engine = settings.engine(EngineKind::Pollinations).unwrap();
    assert_eq!(engine.option("base_url"), Some("http://localhost:1234"));
    assert_eq!(engine.option("frobnicate"), Some("yes"));
    assert_eq!(engine.option("missing"), None);
}

#[test]
fn test_zero_concurrency_rejected() {
    let file = write_config("orchestrator:\n  concurrency_limit: 0\n");
    let settings = Settings::load_from_path(file.path()).unwrap();
    assert!(settings.validate().is_err());
}

#[test]
fn test_api_key_literal_wins_over_env() {
    let mut engine = EngineSettings::new(EngineKind::StabilityAi);
    engine
        .options
        .insert("api_key".to_string(), "literal-key".to_string());
    engine
        .options
        .insert("api_key_env".to_string(), "UNSET_TEST_VAR".to_string());
    assert_eq!(engine.api_key().as_deref(), Some("literal-key"));
}
