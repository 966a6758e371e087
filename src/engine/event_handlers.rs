// src/engine/event_handlers.rs

//! Per-event transitions of [`CoreRuntime`].

use chrono::Utc;
use tracing::{debug, info};

use super::core::CoreRuntime;
use super::{FaultVerdict, HaltReason, Phase};
use crate::broker::{TaskResult, WorkItem};
use crate::handler::HandlerError;
use crate::metrics::MetricSample;
use crate::trigger::Trigger;
use crate::types::TaskType;

/// What the IO shell should do after a step.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Submit these items to the broker, in order.
    Dispatch(Vec<WorkItem>),
    /// Forward a task result to the recorder.
    Record(TaskResult),
    /// Forward new datapoints to the recorder.
    RecordMetrics(Vec<MetricSample>),
    /// The lifecycle just entered Halting.
    Halt(HaltReason),
}

#[derive(Debug, Clone)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// `false` once the core has left Running.
    pub keep_running: bool,
}

impl CoreRuntime {
    fn step_result(&self, commands: Vec<CoreCommand>) -> CoreStep {
        CoreStep {
            commands,
            keep_running: self.phase() == Phase::Running,
        }
    }

    pub(super) fn on_trigger(&mut self, trigger: Trigger) -> CoreStep {
        if self.phase() != Phase::Running {
            debug!(kind = %trigger.kind, phase = %self.phase(), "dropping trigger outside running phase");
            return self.step_result(Vec::new());
        }

        if trigger.kind == TaskType::NewBlock {
            if let Some(block) = trigger.payload.block_number() {
                self.checkpoints.saw(block);
                if trigger.handlers.is_empty() {
                    self.checkpoints.processed(block);
                }
            }
        }

        let items = self.plan(trigger);
        let commands = if items.is_empty() {
            Vec::new()
        } else {
            vec![CoreCommand::Dispatch(items)]
        };
        self.step_result(commands)
    }

    pub(super) fn on_completion(&mut self, result: TaskResult) -> CoreStep {
        let Some(flight) = self.in_flight.remove(&result.task_id) else {
            debug!(task = %result.task_id, handler = %result.handler, "ignoring duplicate task result");
            return self.step_result(Vec::new());
        };

        let mut commands = vec![CoreCommand::Record(result.clone())];

        if let Some(block) = result.block_number.or(flight.block_number) {
            self.checkpoints.processed(block);
        }

        // Stamped with the runtime's clock in processing order; the worker's
        // `completed_at` stays task metadata only.
        let recorded = result
            .measurement()
            .map(|m| self.metrics.record(&result.handler, m, Utc::now()))
            .unwrap_or_default();
        if !recorded.samples.is_empty() {
            commands.push(CoreCommand::RecordMetrics(recorded.samples));
        }

        // Startup and shutdown hooks never count; drain results count but
        // cannot change the halt reason.
        if self.phase() >= Phase::Running && result.kind.is_runtime() {
            if let FaultVerdict::Halt(reason) = self.fault.observe(&result) {
                if self.begin_halt(reason.clone()) {
                    commands.push(CoreCommand::Halt(reason));
                }
            }
        }

        // Metric callbacks only fire while still running.
        if self.phase() == Phase::Running {
            for trigger in recorded.triggers {
                let items = self.plan(trigger);
                if !items.is_empty() {
                    commands.push(CoreCommand::Dispatch(items));
                }
            }
        }

        if self.sources_done && self.phase() == Phase::Running && self.in_flight.is_empty() {
            info!("all sources closed and work settled");
            if self.begin_halt(HaltReason::Completed) {
                commands.push(CoreCommand::Halt(HaltReason::Completed));
            }
        }

        self.step_result(commands)
    }

    /// Halt with `Completed` now, or once the last in-flight task reports.
    pub(super) fn on_sources_exhausted(&mut self) -> CoreStep {
        self.sources_done = true;
        if self.in_flight.is_empty() || self.phase() != Phase::Running {
            return self.on_halt_request(HaltReason::Completed);
        }
        debug!(in_flight = self.in_flight.len(), "sources closed; waiting for in-flight tasks");
        self.step_result(Vec::new())
    }

    /// A refused enqueue counts as an ordinary failure of that task.
    pub(super) fn on_dispatch_failure(&mut self, item: WorkItem, error: String) -> CoreStep {
        let result = TaskResult::failed(
            &item,
            HandlerError::ordinary(format!("dispatch failed: {error}")),
        );
        self.on_completion(result)
    }

    pub(super) fn on_halt_request(&mut self, reason: HaltReason) -> CoreStep {
        let commands = if self.begin_halt(reason.clone()) {
            vec![CoreCommand::Halt(reason)]
        } else {
            info!(%reason, "halt already in progress");
            Vec::new()
        };
        self.step_result(commands)
    }
}
