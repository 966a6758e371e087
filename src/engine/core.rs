// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! The core consumes [`RuntimeEvent`]s and produces [`CoreStep`]s: an
//! updated state plus the commands the IO shell should carry out. It owns
//! the lifecycle, the fault monitor, the metric aggregator, task id
//! assignment and block checkpoints.
//!
//! It has no channels and performs no IO, so it is unit tested directly.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::event_handlers::CoreStep;
use super::{FaultMonitor, HaltReason, Lifecycle, Phase, RuntimeEvent, RuntimeStatus};
use crate::broker::{TaskId, WorkItem};
use crate::config::BotConfig;
use crate::handler::HandlerRegistry;
use crate::metrics::MetricAggregator;
use crate::state::StateSnapshot;
use crate::trigger::Trigger;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checkpoints {
    pub last_block_seen: Option<u64>,
    pub last_block_processed: Option<u64>,
}

impl Checkpoints {
    pub(super) fn saw(&mut self, block: u64) {
        self.last_block_seen = Some(self.last_block_seen.map_or(block, |b| b.max(block)));
    }

    pub(super) fn processed(&mut self, block: u64) {
        self.last_block_processed =
            Some(self.last_block_processed.map_or(block, |b| b.max(block)));
    }
}

#[derive(Debug, Clone)]
pub(super) struct InFlight {
    pub(super) handler: String,
    pub(super) block_number: Option<u64>,
}

#[derive(Debug)]
pub struct CoreRuntime {
    pub(super) registry: Arc<HandlerRegistry>,
    pub(super) lifecycle: Lifecycle,
    pub(super) fault: FaultMonitor,
    pub(super) metrics: MetricAggregator,
    pub(super) in_flight: HashMap<TaskId, InFlight>,
    pub(super) checkpoints: Checkpoints,
    /// Every source closed; halt once in-flight work settles.
    pub(super) sources_done: bool,
    next_task: u64,
}

impl CoreRuntime {
    pub fn new(registry: Arc<HandlerRegistry>, config: &BotConfig) -> Self {
        let metrics = MetricAggregator::new(&registry, config.metric_history);
        Self {
            registry,
            lifecycle: Lifecycle::default(),
            fault: FaultMonitor::new(config.max_exceptions, config.failure_window),
            metrics,
            in_flight: HashMap::new(),
            checkpoints: Checkpoints::default(),
            sources_done: false,
            next_task: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    pub fn halt_reason(&self) -> Option<&HaltReason> {
        self.lifecycle.halt_reason()
    }

    pub fn failures(&self) -> u32 {
        self.fault.failures()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, task: TaskId) -> bool {
        self.in_flight.contains_key(&task)
    }

    pub fn checkpoints(&self) -> Checkpoints {
        self.checkpoints
    }

    pub fn metrics(&self) -> &MetricAggregator {
        &self.metrics
    }

    pub fn into_metrics(self) -> MetricAggregator {
        self.metrics
    }

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            phase: self.phase(),
            failures: self.failures(),
            in_flight: self.in_flight(),
            last_block_seen: self.checkpoints.last_block_seen,
            last_block_processed: self.checkpoints.last_block_processed,
            halt_reason: self.halt_reason().cloned(),
        }
    }

    /// Resume checkpoints from a persisted snapshot.
    pub fn restore(&mut self, snapshot: &StateSnapshot) {
        self.checkpoints = Checkpoints {
            last_block_seen: snapshot.last_block_seen,
            last_block_processed: snapshot.last_block_processed,
        };
    }

    /// Turn a trigger into work items with fresh task ids.
    pub fn plan(&mut self, trigger: Trigger) -> Vec<WorkItem> {
        let block_number = trigger.payload.block_number();
        let mut items = Vec::with_capacity(trigger.handlers.len());

        for handler_id in trigger.handlers {
            let Some(reg) = self.registry.get(handler_id) else {
                warn!(handler = %handler_id, "trigger names an unknown handler; skipping");
                continue;
            };
            self.next_task += 1;
            let task_id = TaskId(self.next_task);
            self.in_flight.insert(
                task_id,
                InFlight {
                    handler: reg.name.clone(),
                    block_number,
                },
            );
            items.push(WorkItem {
                task_id,
                handler_id,
                handler: reg.name.clone(),
                fingerprint: self.registry.fingerprint().to_string(),
                kind: trigger.kind,
                payload: trigger.payload.clone(),
                enqueued_at: Utc::now(),
            });
        }
        items
    }

    /// Startup → Running. The failure count starts at zero.
    pub fn enter_running(&mut self) -> bool {
        if self.lifecycle.advance(Phase::Running) {
            self.fault.reset();
            info!("lifecycle: running");
            true
        } else {
            false
        }
    }

    /// Request Halting from outside the event loop (startup failure,
    /// transport loss).
    pub fn begin_halt(&mut self, reason: HaltReason) -> bool {
        let first = self.lifecycle.begin_halt(reason.clone());
        if first {
            info!(%reason, "lifecycle: halting");
        }
        first
    }

    /// Halting → Shutdown.
    pub fn finish(&mut self) -> bool {
        let done = self.lifecycle.advance(Phase::Shutdown);
        if done {
            info!("lifecycle: shutdown");
        }
        done
    }

    /// Give up on everything still in flight. Returns how many were dropped.
    pub fn discard_in_flight(&mut self) -> usize {
        let dropped = self.in_flight.len();
        for (task, flight) in self.in_flight.drain() {
            debug!(%task, handler = %flight.handler, "discarding in-flight task");
        }
        dropped
    }

    /// Handle a single runtime event.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::Triggered(trigger) => self.on_trigger(trigger),
            RuntimeEvent::TaskCompleted(result) => self.on_completion(result),
            RuntimeEvent::DispatchFailed { item, error } => self.on_dispatch_failure(item, error),
            RuntimeEvent::SourcesExhausted => self.on_sources_exhausted(),
            RuntimeEvent::TransportLost(msg) => self.on_halt_request(HaltReason::Transport(msg)),
            RuntimeEvent::ShutdownRequested => self.on_halt_request(HaltReason::Interrupted),
        }
    }
}
