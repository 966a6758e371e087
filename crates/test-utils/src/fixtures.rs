//! Chain data and core-runtime helpers shared by the integration tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chainbot::broker::{TaskOutcome, TaskResult, WorkItem};
use chainbot::chain::{BlockHeader, ContractLog};
use chainbot::engine::{CoreCommand, CoreRuntime, CoreStep, RuntimeEvent};
use chainbot::handler::{handler_fn, HandlerFn, HandlerRegistry, HandlerError, TriggerFilter};
use chainbot::metrics::Measurement;
use chainbot::config::BotConfig;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

pub const TRANSFER: &str = "Transfer(address,address,uint256)";

/// Header for block `n` with a deterministic timestamp.
pub fn block(n: u64) -> BlockHeader {
    BlockHeader {
        number: n,
        hash: format!("0x{n:064x}"),
        parent_hash: format!("0x{:064x}", n.saturating_sub(1)),
        timestamp: Utc
            .timestamp_opt(1_700_000_000 + n as i64 * 12, 0)
            .single()
            .unwrap_or_else(Utc::now),
    }
}

/// A decoded ERC-20 `Transfer` log.
pub fn transfer_log(contract: &str, from: &str, to: &str, block_number: u64, log_index: u64) -> ContractLog {
    let mut args = BTreeMap::new();
    args.insert("from".to_string(), Value::from(from));
    args.insert("to".to_string(), Value::from(to));
    args.insert("value".to_string(), Value::from(1_000u64));
    ContractLog {
        contract_address: contract.to_string(),
        event_signature: TRANSFER.to_string(),
        args,
        block_number,
        log_index,
        transaction_hash: format!("0x{block_number:x}{log_index:04x}"),
        removed: false,
    }
}

/// Block channel pre-loaded with `numbers`; the sender is dropped so the
/// source closes once they are consumed.
pub fn block_feed(numbers: impl IntoIterator<Item = u64>) -> mpsc::Receiver<BlockHeader> {
    let numbers: Vec<u64> = numbers.into_iter().collect();
    let (tx, rx) = mpsc::channel(numbers.len().max(1));
    for n in numbers {
        let _ = tx.try_send(block(n));
    }
    rx
}

/// Handler that returns `Measurement::None`.
pub fn noop() -> HandlerFn {
    handler_fn(|_, _| async { Ok(Measurement::None) })
}

/// Handler that always fails with an ordinary error.
pub fn failing(message: &'static str) -> HandlerFn {
    handler_fn(move |_, _| async move { Err(HandlerError::ordinary(message)) })
}

/// Handler that counts its invocations.
pub fn counting(calls: Arc<AtomicUsize>) -> HandlerFn {
    handler_fn(move |_, _| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Measurement::None)
        }
    })
}

/// A `CoreRuntime` already in the Running phase.
pub fn running_core(
    entries: Vec<(&str, TriggerFilter, HandlerFn)>,
    config: &BotConfig,
) -> CoreRuntime {
    let registry = HandlerRegistry::new(
        entries
            .into_iter()
            .map(|(name, filter, logic)| (name.to_string(), filter, logic))
            .collect(),
    )
    .expect("valid test registry");
    let mut core = CoreRuntime::new(Arc::new(registry), config);
    assert!(core.enter_running());
    core
}

/// Work items the step asked to dispatch.
pub fn dispatched(step: &CoreStep) -> Vec<WorkItem> {
    step.commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::Dispatch(items) => Some(items.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

/// Completion event for `item` as a worker would report it.
pub fn completed(item: &WorkItem, outcome: TaskOutcome) -> RuntimeEvent {
    RuntimeEvent::TaskCompleted(TaskResult {
        task_id: item.task_id,
        handler_id: item.handler_id,
        handler: item.handler.clone(),
        kind: item.kind,
        outcome,
        duration: Duration::from_millis(1),
        completed_at: Utc::now(),
        block_number: item.payload.block_number(),
        log_index: item.payload.log_index(),
        worker: Some(0),
    })
}

pub fn success(measurement: Measurement) -> TaskOutcome {
    TaskOutcome::Success(measurement)
}

pub fn failure(message: &str) -> TaskOutcome {
    TaskOutcome::Failure(HandlerError::ordinary(message))
}
