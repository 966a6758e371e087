// tests/fault_ceiling.rs

mod common;
use crate::common::fixtures::{completed, dispatched, failure, noop, running_core, success};
use crate::common::BotConfigBuilder;

use chainbot::broker::TaskOutcome;
use chainbot::chain::BlockHeader;
use chainbot::engine::{CoreCommand, CoreRuntime, HaltReason, Phase, RuntimeEvent};
use chainbot::handler::{HandlerError, HandlerId, TriggerFilter};
use chainbot::metrics::Measurement;
use chainbot::trigger::{Trigger, TriggerPayload};
use chainbot::types::TaskType;
use chainbot_test_utils::fixtures::block;

fn block_trigger(header: BlockHeader) -> RuntimeEvent {
    RuntimeEvent::Triggered(Trigger {
        kind: TaskType::NewBlock,
        payload: TriggerPayload::Block(header),
        handlers: vec![HandlerId(0)],
    })
}

/// Dispatch one block and complete it with `outcome`. Returns the number of
/// `Halt` commands the completion produced.
fn run_block(core: &mut CoreRuntime, n: u64, outcome: TaskOutcome) -> usize {
    let items = dispatched(&core.step(block_trigger(block(n))));
    assert_eq!(items.len(), 1, "block {n} should be dispatched while running");
    let step = core.step(completed(&items[0], outcome));
    step.commands
        .iter()
        .filter(|c| matches!(c, CoreCommand::Halt(_)))
        .count()
}

fn core_with_limit(limit: u32, consecutive: bool) -> CoreRuntime {
    let mut builder = BotConfigBuilder::new().max_exceptions(limit);
    if consecutive {
        builder = builder.consecutive_failures();
    }
    running_core(vec![("on_block", TriggerFilter::NewBlock, noop())], &builder.build())
}

#[test]
fn failures_below_the_ceiling_keep_running() {
    let mut core = core_with_limit(3, false);
    assert_eq!(run_block(&mut core, 1, failure("rpc timeout")), 0);
    assert_eq!(run_block(&mut core, 2, failure("rpc timeout")), 0);

    assert_eq!(core.phase(), Phase::Running);
    assert_eq!(core.failures(), 2);
}

#[test]
fn reaching_the_ceiling_halts_exactly_once() {
    let mut core = core_with_limit(3, false);
    let mut halts = 0;
    halts += run_block(&mut core, 1, failure("a"));
    halts += run_block(&mut core, 2, failure("b"));
    halts += run_block(&mut core, 3, failure("c"));

    assert_eq!(halts, 1);
    assert_eq!(core.phase(), Phase::Halting);
    assert_eq!(
        core.halt_reason(),
        Some(&HaltReason::TooManyFailures { count: 3, limit: 3 })
    );

    // Late triggers are dropped once halting.
    let late = core.step(block_trigger(block(4)));
    assert!(dispatched(&late).is_empty());
    assert!(!late.keep_running);
}

#[test]
fn results_during_drain_count_without_a_second_halt() {
    let mut core = core_with_limit(1, false);
    let first = dispatched(&core.step(block_trigger(block(1))));
    let second = dispatched(&core.step(block_trigger(block(2))));

    core.step(completed(&first[0], failure("boom")));
    assert_eq!(core.phase(), Phase::Halting);

    let step = core.step(completed(&second[0], failure("boom again")));
    assert!(step
        .commands
        .iter()
        .any(|c| matches!(c, CoreCommand::Record(_))));
    assert!(!step
        .commands
        .iter()
        .any(|c| matches!(c, CoreCommand::Halt(_))));
    assert_eq!(core.failures(), 2);
    assert_eq!(
        core.halt_reason(),
        Some(&HaltReason::TooManyFailures { count: 1, limit: 1 })
    );
    assert_eq!(core.in_flight(), 0);
}

#[test]
fn exhausted_sources_wait_for_in_flight_work() {
    let mut core = core_with_limit(2, false);
    let first = dispatched(&core.step(block_trigger(block(1))));
    let second = dispatched(&core.step(block_trigger(block(2))));

    let step = core.step(RuntimeEvent::SourcesExhausted);
    assert!(step.keep_running);
    assert_eq!(core.phase(), Phase::Running);

    core.step(completed(&first[0], failure("late")));
    assert_eq!(core.phase(), Phase::Running);

    // The last result can still trip the ceiling.
    let step = core.step(completed(&second[0], failure("later")));
    assert!(!step.keep_running);
    assert_eq!(
        core.halt_reason(),
        Some(&HaltReason::TooManyFailures { count: 2, limit: 2 })
    );
}

#[test]
fn exhausted_sources_complete_once_idle() {
    let mut core = core_with_limit(5, false);
    let items = dispatched(&core.step(block_trigger(block(1))));
    core.step(RuntimeEvent::SourcesExhausted);

    let step = core.step(completed(&items[0], success(Measurement::None)));
    assert!(!step.keep_running);
    assert_eq!(core.halt_reason(), Some(&HaltReason::Completed));
}

#[test]
fn immediate_halt_ignores_the_count() {
    let mut core = core_with_limit(10, false);
    let halts = run_block(
        &mut core,
        1,
        TaskOutcome::Failure(HandlerError::halt("liquidity gone")),
    );

    assert_eq!(halts, 1);
    assert_eq!(core.failures(), 0);
    assert_eq!(
        core.halt_reason(),
        Some(&HaltReason::HaltRequested {
            handler: "on_block".to_string(),
            message: "liquidity gone".to_string(),
        })
    );
}

// Two failures, one success, three failures with a ceiling of 3.
fn mixed_sequence() -> Vec<TaskOutcome> {
    vec![
        failure("1"),
        failure("2"),
        success(Measurement::None),
        failure("3"),
        failure("4"),
        failure("5"),
    ]
}

/// Index (1-based) of the outcome whose completion halted the core.
fn halting_index(core: &mut CoreRuntime, outcomes: Vec<TaskOutcome>) -> Option<usize> {
    for (i, outcome) in outcomes.into_iter().enumerate() {
        if run_block(core, i as u64 + 1, outcome) > 0 {
            return Some(i + 1);
        }
    }
    None
}

#[test]
fn cumulative_window_does_not_reset_on_success() {
    let mut core = core_with_limit(3, false);
    // Third failure overall is the first one after the success.
    assert_eq!(halting_index(&mut core, mixed_sequence()), Some(4));
    assert_eq!(core.failures(), 3);
}

#[test]
fn consecutive_window_halts_after_five_total_failures() {
    let mut core = core_with_limit(3, true);
    assert_eq!(halting_index(&mut core, mixed_sequence()), Some(6));
    assert_eq!(
        core.halt_reason(),
        Some(&HaltReason::TooManyFailures { count: 3, limit: 3 })
    );
}

#[test]
fn failures_during_startup_do_not_count() {
    let config = BotConfigBuilder::new().max_exceptions(1).build();
    let registry = std::sync::Arc::new(
        chainbot::handler::HandlerRegistry::new(vec![(
            "on_block".to_string(),
            TriggerFilter::NewBlock,
            noop(),
        )])
        .unwrap(),
    );
    let mut core = CoreRuntime::new(registry, &config);
    let items = core.plan(Trigger {
        kind: TaskType::NewBlock,
        payload: TriggerPayload::Block(block(1)),
        handlers: vec![HandlerId(0)],
    });
    core.step(completed(&items[0], failure("during startup")));
    assert_eq!(core.phase(), Phase::Startup);

    assert!(core.enter_running());
    assert_eq!(core.failures(), 0);
}
