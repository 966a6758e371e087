// src/engine/fault.rs

//! Failure counting against the configured ceiling.

use tracing::{error, warn};

use super::HaltReason;
use crate::broker::TaskResult;
use crate::types::FailureWindow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultVerdict {
    Continue,
    Halt(HaltReason),
}

/// Pure counter. It only reports; it never retries.
#[derive(Debug, Clone)]
pub struct FaultMonitor {
    limit: u32,
    window: FailureWindow,
    failures: u32,
}

impl FaultMonitor {
    pub fn new(limit: u32, window: FailureWindow) -> Self {
        Self {
            limit,
            window,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn observe(&mut self, result: &TaskResult) -> FaultVerdict {
        let Some(err) = result.error() else {
            if self.window == FailureWindow::Consecutive {
                self.failures = 0;
            }
            return FaultVerdict::Continue;
        };

        if err.is_halt() {
            error!(handler = %result.handler, error = %err.message, "handler requested immediate halt");
            return FaultVerdict::Halt(HaltReason::HaltRequested {
                handler: result.handler.clone(),
                message: err.message.clone(),
            });
        }

        self.failures = self.failures.saturating_add(1);
        warn!(
            handler = %result.handler,
            failures = self.failures,
            limit = self.limit,
            "handler failure counted"
        );
        if self.failures >= self.limit {
            FaultVerdict::Halt(HaltReason::TooManyFailures {
                count: self.failures,
                limit: self.limit,
            })
        } else {
            FaultVerdict::Continue
        }
    }
}
