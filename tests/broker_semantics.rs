// tests/broker_semantics.rs

mod common;
use crate::common::fixtures::block_feed;
use crate::common::{init_tracing, run_bot, BotConfigBuilder, TestResult};

use std::sync::Arc;

use chainbot::broker::Broker;
use chainbot::engine::HaltReason;
use chainbot::{Bot, HandlerError, Measurement, MetricFilter, TriggerSources};
use chainbot_test_utils::fake_broker::FakeBroker;

#[tokio::test]
async fn duplicated_results_are_processed_once() -> TestResult {
    init_tracing();

    let bot = Bot::builder("dupes")
        .on_block("flaky", |_, payload| async move {
            match payload.block_number() {
                Some(n) if n % 2 == 0 => Err(HandlerError::ordinary("even block")),
                _ => Ok(Measurement::named([("odd", 1)])),
            }
        })
        .build()?;

    let broker = Arc::new(FakeBroker::new().duplicate_results());
    let config = BotConfigBuilder::new().max_exceptions(10).build();
    let sources = TriggerSources::new().with_blocks(block_feed(1..=6));

    let finished = run_bot(bot, config, sources, Some(broker.clone() as Arc<dyn Broker>)).await?;

    assert_eq!(finished.report.reason, HaltReason::Completed);
    assert_eq!(finished.report.failures, 3);
    assert_eq!(finished.recorder.results().len(), 6);
    assert_eq!(finished.recorder.values_of("odd").len(), 3);
    assert_eq!(broker.enqueued_handlers().len(), 6);
    Ok(())
}

#[tokio::test]
async fn refused_callback_dispatch_is_counted_as_a_failure() -> TestResult {
    init_tracing();

    let bot = Bot::builder("refusals")
        .on_block("size", |_, _| async { Ok(Measurement::single(100)) })
        .on_metric("too_big", MetricFilter::new("size").gt(10.0), |_, _| async {
            Ok(Measurement::None)
        })
        .build()?;

    let broker = Arc::new(FakeBroker::new().refuse("too_big"));
    let config = BotConfigBuilder::new().max_exceptions(1).build();
    let sources = TriggerSources::new().with_blocks(block_feed([1]));

    let finished = run_bot(bot, config, sources, Some(broker.clone() as Arc<dyn Broker>)).await?;

    assert_eq!(
        finished.report.reason,
        HaltReason::TooManyFailures { count: 1, limit: 1 }
    );
    assert_eq!(broker.enqueued_handlers(), vec!["size".to_string()]);
    let refused = finished
        .recorder
        .results()
        .into_iter()
        .find(|r| r.handler == "too_big")
        .expect("refused dispatch is audited");
    assert!(refused.error().unwrap().message.contains("dispatch failed"));
    Ok(())
}
