// tests/parameters.rs

mod common;
use crate::common::fixtures::{block, block_feed};
use crate::common::{init_tracing, with_timeout, BotConfigBuilder, TestResult};

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;

use chainbot::engine::Phase;
use chainbot::metrics::{Datapoint, MemoryRecorder};
use chainbot::state::{MemorySnapshotStore, StateSnapshot};
use chainbot::{Bot, Measurement, Runtime, TriggerSources};

fn threshold_bot() -> Bot {
    Bot::builder("tunable")
        .parameter("threshold", 5)
        .on_block("threshold_seen", |ctx, _| async move {
            let threshold: i64 = ctx.shared.get("threshold").unwrap_or(-1);
            Ok(Measurement::single(threshold))
        })
        .build()
        .expect("valid bot")
}

#[tokio::test]
async fn update_is_visible_to_handlers_and_persisted() -> TestResult {
    init_tracing();

    let store = Arc::new(MemorySnapshotStore::new());
    let recorder = Arc::new(MemoryRecorder::new());
    let (tx, rx) = mpsc::channel(4);

    let runtime = Runtime::builder(threshold_bot(), BotConfigBuilder::new().build())
        .sources(TriggerSources::new().with_blocks(rx))
        .recorder(recorder.clone())
        .snapshots(store.clone())
        .build();
    let params = runtime.parameters();
    let mut status = runtime.status();
    let run = tokio::spawn(runtime.run());

    with_timeout(status.wait_for(|s| s.phase == Phase::Running)).await?;
    assert_eq!(params.get("threshold"), Some(json!(5)));

    params.update("threshold", json!(9)).await?;
    let persisted = store.current().expect("update persists a snapshot");
    assert_eq!(persisted.parameters.get("threshold"), Some(&json!(9)));

    tx.send(block(1)).await?;
    drop(tx);
    with_timeout(run).await??;

    assert_eq!(recorder.values_of("threshold_seen"), vec![Datapoint::Int(9)]);
    let last = store.current().unwrap();
    assert_eq!(last.parameters.get("threshold"), Some(&json!(9)));
    assert_eq!(last.last_block_processed, Some(1));
    Ok(())
}

#[tokio::test]
async fn snapshot_values_override_declared_defaults() -> TestResult {
    init_tracing();

    let mut restored = StateSnapshot {
        last_block_seen: None,
        last_block_processed: None,
        parameters: Default::default(),
        last_updated: Utc::now(),
    };
    restored.parameters.insert("threshold".to_string(), json!(42));

    let recorder = Arc::new(MemoryRecorder::new());
    let runtime = Runtime::builder(threshold_bot(), BotConfigBuilder::new().build())
        .sources(TriggerSources::new().with_blocks(block_feed([1])))
        .recorder(recorder.clone())
        .snapshots(Arc::new(MemorySnapshotStore::with_snapshot(restored)))
        .build();
    let params = runtime.parameters();
    with_timeout(runtime.run()).await?;

    assert_eq!(recorder.values_of("threshold_seen"), vec![Datapoint::Int(42)]);
    assert_eq!(params.names(), vec!["threshold".to_string()]);
    Ok(())
}
