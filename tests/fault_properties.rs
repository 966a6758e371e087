// tests/fault_properties.rs

use proptest::prelude::*;

use chainbot::broker::{TaskId, TaskOutcome, TaskResult};
use chainbot::engine::{FaultMonitor, FaultVerdict, HaltReason};
use chainbot::handler::{HandlerError, HandlerId};
use chainbot::metrics::Measurement;
use chainbot::types::{FailureWindow, TaskType};
use chrono::Utc;
use std::time::Duration;

fn result(n: u64, ok: bool) -> TaskResult {
    TaskResult {
        task_id: TaskId(n),
        handler_id: HandlerId(0),
        handler: "h".to_string(),
        kind: TaskType::NewBlock,
        outcome: if ok {
            TaskOutcome::Success(Measurement::None)
        } else {
            TaskOutcome::Failure(HandlerError::ordinary("x"))
        },
        duration: Duration::ZERO,
        completed_at: Utc::now(),
        block_number: Some(n),
        log_index: None,
        worker: None,
    }
}

/// Index of the first outcome that should halt, computed independently.
fn expected_halt(outcomes: &[bool], limit: u32, window: FailureWindow) -> Option<usize> {
    let mut count = 0;
    for (i, ok) in outcomes.iter().enumerate() {
        if *ok {
            if window == FailureWindow::Consecutive {
                count = 0;
            }
        } else {
            count += 1;
            if count >= limit {
                return Some(i);
            }
        }
    }
    None
}

proptest! {
    #[test]
    fn halts_first_when_the_window_reaches_the_limit(
        outcomes in proptest::collection::vec(any::<bool>(), 0..40),
        limit in 1u32..6,
        consecutive in any::<bool>(),
    ) {
        let window = if consecutive { FailureWindow::Consecutive } else { FailureWindow::Cumulative };
        let mut monitor = FaultMonitor::new(limit, window);

        let mut first_halt = None;
        for (i, ok) in outcomes.iter().enumerate() {
            if let FaultVerdict::Halt(reason) = monitor.observe(&result(i as u64, *ok)) {
                prop_assert_eq!(reason, HaltReason::TooManyFailures { count: limit, limit });
                first_halt = Some(i);
                break;
            }
        }

        prop_assert_eq!(first_halt, expected_halt(&outcomes, limit, window));
    }
}
