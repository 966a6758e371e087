// tests/distributed_runtime.rs

mod common;
use crate::common::fixtures::block_feed;
use crate::common::{init_tracing, run_bot, with_timeout, BotConfigBuilder, TestResult};

use std::sync::Arc;
use std::time::Duration;

use chainbot::broker::{Broker, DistributedBroker, LoopbackQueue, MessageQueue};
use chainbot::engine::HaltReason;
use chainbot::handler::Dependencies;
use chainbot::metrics::{Datapoint, MemoryRecorder};
use chainbot::state::SharedState;
use chainbot::worker::WorkerPool;
use chainbot::{Bot, HandlerError, Measurement, Runtime, TriggerSources};

fn doubling_bot() -> Bot {
    Bot::builder("doubler")
        .on_block("double", |_, payload| async move {
            let n = payload.block_number().unwrap_or_default() as i64;
            Ok(Measurement::named([("doubled", n * 2)]))
        })
        .build()
        .expect("valid bot")
}

#[tokio::test]
async fn local_workers_over_loopback_queue() -> TestResult {
    init_tracing();

    let queue: Arc<dyn MessageQueue> = Arc::new(LoopbackQueue::new());
    let broker: Arc<dyn Broker> = Arc::new(DistributedBroker::new(queue, "doubler"));
    let config = BotConfigBuilder::new().distributed("doubler").workers(2).build();
    let sources = TriggerSources::new().with_blocks(block_feed(1..=4));

    let finished = run_bot(doubling_bot(), config, sources, Some(broker)).await?;

    assert_eq!(finished.report.reason, HaltReason::Completed);
    let mut doubled: Vec<f64> = finished
        .recorder
        .values_of("doubled")
        .iter()
        .map(Datapoint::as_f64)
        .collect();
    doubled.sort_by(f64::total_cmp);
    assert_eq!(doubled, vec![2.0, 4.0, 6.0, 8.0]);
    Ok(())
}

#[tokio::test]
async fn remote_worker_pool_executes_serialized_work() -> TestResult {
    init_tracing();

    let queue: Arc<dyn MessageQueue> = Arc::new(LoopbackQueue::new());

    // Worker side: same bot definition, its own broker handle on the queue.
    let worker_bot = doubling_bot();
    let worker_broker: Arc<dyn Broker> = Arc::new(DistributedBroker::new(Arc::clone(&queue), "jobs"));
    let mut pool = WorkerPool::spawn(
        2,
        Arc::clone(worker_bot.registry()),
        worker_broker,
        Dependencies::new(SharedState::new()),
    );
    pool.wait_ready(Duration::from_secs(1)).await?;

    // Runtime side: no local workers.
    let recorder = Arc::new(MemoryRecorder::new());
    let runtime = Runtime::builder(doubling_bot(), BotConfigBuilder::new().distributed("jobs").build())
        .broker(Arc::new(DistributedBroker::new(queue, "jobs")))
        .local_workers(0)
        .recorder(recorder.clone())
        .sources(TriggerSources::new().with_blocks(block_feed([5, 6])))
        .build();
    let report = with_timeout(runtime.run()).await?;
    pool.shutdown(Duration::from_secs(1)).await;

    assert_eq!(report.reason, HaltReason::Completed);
    assert_eq!(report.failures, 0);
    assert_eq!(recorder.results().len(), 2);
    assert!(recorder.results().iter().all(|r| r.worker.is_some()));
    Ok(())
}

#[tokio::test]
async fn workers_built_from_another_bot_refuse_the_work() -> TestResult {
    init_tracing();

    let queue: Arc<dyn MessageQueue> = Arc::new(LoopbackQueue::new());

    let stale_bot = Bot::builder("doubler")
        .on_block("double", |_, _| async { Ok(Measurement::None) })
        .on_block("extra", |_, _| async { Ok(Measurement::None) })
        .build()?;
    let mut pool = WorkerPool::spawn(
        1,
        Arc::clone(stale_bot.registry()),
        Arc::new(DistributedBroker::new(Arc::clone(&queue), "jobs")),
        Dependencies::new(SharedState::new()),
    );
    pool.wait_ready(Duration::from_secs(1)).await?;

    let recorder = Arc::new(MemoryRecorder::new());
    let runtime = Runtime::builder(doubling_bot(), BotConfigBuilder::new().max_exceptions(1).build())
        .broker(Arc::new(DistributedBroker::new(queue, "jobs")))
        .local_workers(0)
        .recorder(recorder.clone())
        .sources(TriggerSources::new().with_blocks(block_feed([1])))
        .build();
    let report = with_timeout(runtime.run()).await?;
    pool.shutdown(Duration::from_secs(1)).await;

    assert_eq!(report.reason, HaltReason::TooManyFailures { count: 1, limit: 1 });
    let results = recorder.results();
    let err: &HandlerError = results[0].error().expect("refused item fails");
    assert!(err.message.contains("fingerprint"));
    Ok(())
}

#[tokio::test]
async fn unreachable_queue_counts_dispatch_failures() -> TestResult {
    init_tracing();

    let loopback = Arc::new(LoopbackQueue::new());
    loopback.disconnect();
    let broker: Arc<dyn Broker> = Arc::new(DistributedBroker::new(loopback, "down"));
    let config = BotConfigBuilder::new().max_exceptions(2).build();
    let sources = TriggerSources::new().with_blocks(block_feed(1..=5));

    let finished = run_bot(doubling_bot(), config, sources, Some(broker)).await?;

    assert_eq!(
        finished.report.reason,
        HaltReason::TooManyFailures { count: 2, limit: 2 }
    );
    let results = finished.recorder.results();
    assert!(results.len() >= 2);
    assert!(results
        .iter()
        .all(|r| r.error().is_some_and(|e| e.message.contains("dispatch failed"))));
    Ok(())
}
