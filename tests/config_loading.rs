// tests/config_loading.rs

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::NamedTempFile;

use chainbot::config::{load_and_validate, load_or_default};
use chainbot::errors::BotError;
use chainbot::nonce::NoncePolicy;
use chainbot::types::{BrokerKind, FailureWindow};

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn full_file_is_parsed_and_validated() {
    let file = config_file(
        r#"
[bot]
name = "liquidator"
max_exceptions = 3
failure_window = "consecutive"
drain_timeout = "500ms"
startup_timeout = "2m"

[broker]
kind = "distributed"
workers = 0
queue = "liq"

[nonce]
reconcile = "per_call"

[metrics]
history = 16

[state]
snapshot = "state/liquidator.json"
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.name, "liquidator");
    assert_eq!(cfg.max_exceptions, 3);
    assert_eq!(cfg.failure_window, FailureWindow::Consecutive);
    assert_eq!(cfg.drain_timeout, Duration::from_millis(500));
    assert_eq!(cfg.startup_timeout, Duration::from_secs(120));
    assert_eq!(cfg.broker.kind, BrokerKind::Distributed);
    assert_eq!(cfg.broker.workers, 0);
    assert_eq!(cfg.broker.queue, "liq");
    assert_eq!(cfg.nonce, NoncePolicy::PerCall);
    assert_eq!(cfg.metric_history, 16);
    assert_eq!(cfg.snapshot_path, Some(PathBuf::from("state/liquidator.json")));
}

#[test]
fn empty_file_uses_defaults() {
    let file = config_file("");
    let cfg = load_and_validate(file.path()).unwrap();

    assert_eq!(cfg.max_exceptions, 10);
    assert_eq!(cfg.failure_window, FailureWindow::Cumulative);
    assert_eq!(cfg.broker.kind, BrokerKind::Memory);
    assert_eq!(cfg.nonce, NoncePolicy::Periodic(Duration::from_secs(60)));
    assert!(cfg.snapshot_path.is_none());
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_or_default(dir.path().join("Bot.toml")).unwrap();
    assert_eq!(cfg.name, "bot");
}

#[test]
fn zero_ceiling_is_rejected() {
    let file = config_file("[bot]\nmax_exceptions = 0\n");
    match load_and_validate(file.path()) {
        Err(BotError::ConfigError(msg)) => assert!(msg.contains("max_exceptions")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn memory_broker_needs_a_worker() {
    let file = config_file("[broker]\nkind = \"memory\"\nworkers = 0\n");
    match load_and_validate(file.path()) {
        Err(BotError::ConfigError(msg)) => assert!(msg.contains("workers")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn malformed_duration_names_the_field() {
    let file = config_file("[bot]\ndrain_timeout = \"soon\"\n");
    match load_and_validate(file.path()) {
        Err(BotError::ConfigError(msg)) => assert!(msg.contains("bot.drain_timeout")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn zero_history_is_rejected() {
    let file = config_file("[metrics]\nhistory = 0\n");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(BotError::ConfigError(_))
    ));
}

#[test]
fn unknown_failure_window_is_a_toml_error() {
    let file = config_file("[bot]\nfailure_window = \"sometimes\"\n");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(BotError::TomlError(_))
    ));
}
