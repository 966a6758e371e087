// tests/worker_process.rs

mod common;
use crate::common::fixtures::block_feed;
use crate::common::{init_tracing, with_timeout, TestResult};

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::sync::oneshot;

use chainbot::broker::{LoopbackQueue, MessageQueue};
use chainbot::cli::{CliArgs, Command};
use chainbot::engine::HaltReason;
use chainbot::{run, run_worker_until, Bot, Measurement, TriggerSources};

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

fn args_for(file: &NamedTempFile) -> CliArgs {
    CliArgs::with_config(file.path().to_string_lossy().into_owned())
}

#[derive(Default)]
struct HookCounts {
    up: AtomicUsize,
    down: AtomicUsize,
}

fn squaring_bot(hooks: Arc<HookCounts>) -> Bot {
    let up = Arc::clone(&hooks);
    let down = hooks;
    Bot::builder("squarer")
        .on_worker_startup("up", move |_, _| {
            up.up.fetch_add(1, Ordering::SeqCst);
            async { Ok(Measurement::None) }
        })
        .on_block("square", |_, payload| async move {
            let n = payload.block_number().unwrap_or_default();
            Ok(Measurement::named([("squared", n * n)]))
        })
        .on_worker_shutdown("down", move |_, _| {
            down.down.fetch_add(1, Ordering::SeqCst);
            async { Ok(Measurement::None) }
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn distributed_without_queue_client_or_workers_is_rejected() -> TestResult {
    init_tracing();
    let file = config_file("[broker]\nkind = \"distributed\"\nworkers = 0\n");

    let bot = squaring_bot(Arc::default());
    let sources = TriggerSources::new().with_blocks(block_feed([1, 2]));
    let err = with_timeout(run(args_for(&file), bot, sources, None, None))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("message queue client"), "{err}");
    Ok(())
}

#[tokio::test]
async fn distributed_without_queue_client_uses_local_workers() -> TestResult {
    init_tracing();
    let file = config_file("[broker]\nkind = \"distributed\"\nworkers = 1\n");

    let bot = squaring_bot(Arc::default());
    let sources = TriggerSources::new().with_blocks(block_feed([1, 2]));
    let report = with_timeout(run(args_for(&file), bot, sources, None, None))
        .await?
        .expect("not a dry run");

    assert_eq!(report.reason, HaltReason::Completed);
    assert_eq!(report.metrics.series("squared").map(|s| s.len()), Some(2));
    Ok(())
}

#[tokio::test]
async fn worker_process_serves_a_runtime_without_local_workers() -> TestResult {
    init_tracing();
    let file = config_file("[broker]\nkind = \"distributed\"\nworkers = 0\nqueue = \"jobs\"\n");
    let queue: Arc<dyn MessageQueue> = Arc::new(LoopbackQueue::new());

    let hooks = Arc::new(HookCounts::default());
    let mut worker_args = args_for(&file);
    worker_args.command = Some(Command::Worker {
        workers: Some(2),
        shutdown_timeout: Some(Duration::from_secs(1)),
    });
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let worker = tokio::spawn(run_worker_until(
        worker_args,
        squaring_bot(Arc::clone(&hooks)),
        Arc::clone(&queue),
        None,
        async move {
            let _ = stop_rx.await;
        },
    ));

    let sources = TriggerSources::new().with_blocks(block_feed([3, 4, 5]));
    let report = with_timeout(run(
        args_for(&file),
        squaring_bot(Arc::default()),
        sources,
        None,
        Some(queue),
    ))
    .await?
    .expect("not a dry run");

    assert_eq!(report.reason, HaltReason::Completed);
    assert_eq!(report.failures, 0);
    let mut squared: Vec<f64> = report
        .metrics
        .series("squared")
        .map(|s| s.values().iter().map(|v| v.as_f64()).collect())
        .unwrap_or_default();
    squared.sort_by(f64::total_cmp);
    assert_eq!(squared, vec![9.0, 16.0, 25.0]);

    let _ = stop_tx.send(());
    with_timeout(worker).await??;
    assert_eq!(hooks.up.load(Ordering::SeqCst), 2);
    assert_eq!(hooks.down.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn worker_process_needs_at_least_one_worker() -> TestResult {
    init_tracing();
    let file = config_file("[broker]\nkind = \"distributed\"\nworkers = 0\n");
    let queue: Arc<dyn MessageQueue> = Arc::new(LoopbackQueue::new());

    let result = with_timeout(run_worker_until(
        args_for(&file),
        squaring_bot(Arc::default()),
        queue,
        None,
        async {},
    ))
    .await;

    assert!(result.is_err());
    Ok(())
}
