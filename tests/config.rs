//! Configuration Integration Tests
//!
//! A project config drives source construction and engine settings.

use std::io::Write;
use std::time::Duration;

use dealscout::adapters::SourceRegistry;
use dealscout::config::{self, AuditBackend, CONFIG_DIR, CONFIG_FILE};
use dealscout::domain::SignalType;
use tempfile::TempDir;

fn project(config: &str) -> (TempDir, std::path::PathBuf) {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join(CONFIG_DIR);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(CONFIG_FILE);
    std::fs::File::create(&path).unwrap().write_all(config.as_bytes()).unwrap();
    (temp, path)
}

#[tokio::test]
async fn test_configured_jsonl_source_collects_signals() {
    let (temp, path) = project(
        r#"
version: "1"
engine:
  concurrency_limit: 2
  audit_backend: sqlite
  retry:
    max_attempts: 1
sources:
  - kind: jsonl
    name: exports
    path: data/signals.jsonl
"#,
    );
    std::fs::create_dir_all(temp.path().join("data")).unwrap();
    std::fs::write(
        temp.path().join("data/signals.jsonl"),
        concat!(
            r#"{"candidate":"Acme","source":"news","text":"Acme raised $2M Seed"}"#,
            "\n",
            r#"{"candidate":"Acme","text":"Acme is hiring 3 engineers"}"#,
            "\n",
        ),
    )
    .unwrap();

    let cfg = config::resolve(Some(path), temp.path().join("home"), |_| None).unwrap();
    assert_eq!(cfg.engine.concurrency_limit, 2);
    assert_eq!(cfg.engine.audit_backend, AuditBackend::Sqlite);
    assert_eq!(cfg.sqlite_path(), temp.path().join("home").join("audit.db"));

    let registry = SourceRegistry::from_config(&cfg.sources, cfg.engine.retry.clone(), Duration::from_secs(1)).unwrap();
    assert_eq!(registry.names(), vec!["exports"]);

    let outcome = registry.collect("Acme").await;
    assert!(outcome.failed_sources.is_empty());
    assert_eq!(outcome.signals.len(), 2);
    assert_eq!(outcome.signals[0].source, "news");
    assert_eq!(outcome.signals[1].source, "exports");
}

#[test]
fn test_initial_weights_from_config() {
    let (_temp, path) = project(
        r#"
engine:
  signal_weights:
    batch_membership: 0.30
    funding_round: 0.20
    hiring_activity: 0.15
    product_announcement: 0.15
    code_activity: 0.12
    other: 0.08
"#,
    );

    let cfg = config::resolve(Some(path), "/unused".into(), |_| None).unwrap();
    let weights = cfg.engine.initial_weights().unwrap();
    assert_eq!(weights.version(), 0);
    assert_eq!(weights.weight(SignalType::BatchMembership), 0.30);
    assert_eq!(weights.weight(SignalType::FundingRound), 0.20);
}

#[test]
fn test_out_of_bounds_weight_rejected() {
    let (_temp, path) = project(
        r#"
engine:
  signal_weights:
    batch_membership: 0.96
    funding_round: 0.01
    hiring_activity: 0.01
    product_announcement: 0.01
    code_activity: 0.005
    other: 0.005
"#,
    );

    let err = config::resolve(Some(path), "/unused".into(), |_| None).unwrap_err();
    assert!(err.to_string().contains("invalid weights"), "{}", err);
}

#[test]
fn test_malformed_yaml_reported_with_path() {
    let (_temp, path) = project("engine: [unclosed");
    let err = config::resolve(Some(path.clone()), "/unused".into(), |_| None).unwrap_err();
    assert!(err.to_string().contains(&path.display().to_string()));
}
