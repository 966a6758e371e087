// src/engine/mod.rs

//! Orchestration engine.
//!
//! The pure core state machine lives in [`core`]; the async/IO shell that
//! talks to the broker, the recorder and the trigger sources is
//! [`runtime`]. Everything the core reacts to arrives as a
//! [`RuntimeEvent`].

use serde::Serialize;

use crate::broker::{TaskResult, WorkItem};
use crate::trigger::Trigger;

pub mod core;
pub mod event_handlers;
pub mod fault;
pub mod lifecycle;
pub mod runtime;
pub mod signals;

pub use core::{Checkpoints, CoreRuntime};
pub use event_handlers::{CoreCommand, CoreStep};
pub use fault::{FaultMonitor, FaultVerdict};
pub use lifecycle::{HaltReason, Lifecycle, Phase};
pub use runtime::{RunReport, Runtime, RuntimeBuilder};

/// Events flowing into the runtime from sources, the broker and operators.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Resolved trigger from a block, log or cron source.
    Triggered(Trigger),
    /// A worker finished a task. May be delivered more than once.
    TaskCompleted(TaskResult),
    /// The broker refused a work item the core planned.
    DispatchFailed { item: WorkItem, error: String },
    /// Every trigger source has closed.
    SourcesExhausted,
    /// The broker's result stream ended unexpectedly.
    TransportLost(String),
    /// Operator interrupt.
    ShutdownRequested,
}

/// Snapshot of core state published after every step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuntimeStatus {
    pub phase: Phase,
    pub failures: u32,
    pub in_flight: usize,
    pub last_block_seen: Option<u64>,
    pub last_block_processed: Option<u64>,
    #[serde(skip)]
    pub halt_reason: Option<HaltReason>,
}
