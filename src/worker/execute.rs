// src/worker/execute.rs

//! Running one handler invocation.

use std::any::Any;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::broker::{TaskOutcome, TaskResult, WorkItem};
use crate::handler::{
    Dependencies, HandlerContext, HandlerError, HandlerOutcome, HandlerRegistration,
    HandlerRegistry,
};
use crate::state::WorkerState;
use crate::trigger::TriggerPayload;

/// Call the handler on its own task so a panic becomes an ordinary failure.
pub async fn invoke(
    registration: &HandlerRegistration,
    ctx: HandlerContext,
    payload: TriggerPayload,
) -> HandlerOutcome {
    let fut = (registration.logic)(ctx, payload);
    match tokio::spawn(fut).await {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => Err(HandlerError::ordinary(format!(
            "handler panicked: {}",
            panic_message(err.into_panic())
        ))),
        Err(err) => Err(HandlerError::ordinary(format!("handler cancelled: {err}"))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Execute a work item and build its result.
///
/// Items planned against a different registry, or naming a handler this
/// registry does not have, fail without running anything.
pub async fn execute(
    registry: &HandlerRegistry,
    item: WorkItem,
    deps: &Dependencies,
    worker: &WorkerState,
) -> TaskResult {
    if item.fingerprint != registry.fingerprint() {
        warn!(
            task = %item.task_id,
            handler = %item.handler,
            "registry fingerprint mismatch; refusing work item"
        );
        let mut result = TaskResult::failed(
            &item,
            HandlerError::ordinary("registry fingerprint mismatch between runtime and worker"),
        );
        result.worker = Some(worker.worker_id());
        return result;
    }

    let registration = match registry.resolve(item.handler_id, &item.handler) {
        Ok(reg) => reg,
        Err(err) => {
            warn!(task = %item.task_id, error = %err, "cannot resolve handler");
            let mut result = TaskResult::failed(&item, HandlerError::ordinary(err.to_string()));
            result.worker = Some(worker.worker_id());
            return result;
        }
    };

    let label = item.payload.label();
    info!(
        task = %item.task_id,
        handler = %item.handler,
        kind = %item.kind,
        %label,
        worker = worker.worker_id(),
        "running handler"
    );

    let ctx = HandlerContext::new(&item.handler, Some(item.task_id), deps, worker.clone());
    let block_number = item.payload.block_number();
    let log_index = item.payload.log_index();

    let started = Instant::now();
    let outcome = invoke(registration, ctx, item.payload).await;
    let duration = started.elapsed();

    match &outcome {
        Ok(_) => info!(
            task = %item.task_id,
            handler = %item.handler,
            %label,
            elapsed_ms = duration.as_millis() as u64,
            "handler finished"
        ),
        Err(err) => warn!(
            task = %item.task_id,
            handler = %item.handler,
            %label,
            elapsed_ms = duration.as_millis() as u64,
            error = %err,
            "handler failed"
        ),
    }

    TaskResult {
        task_id: item.task_id,
        handler_id: item.handler_id,
        handler: item.handler,
        kind: item.kind,
        outcome: match outcome {
            Ok(measurement) => TaskOutcome::Success(measurement),
            Err(err) => TaskOutcome::Failure(err),
        },
        duration,
        completed_at: Utc::now(),
        block_number,
        log_index,
        worker: Some(worker.worker_id()),
    }
}
