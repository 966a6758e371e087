// src/engine/lifecycle.rs

//! Forward-only lifecycle phases and the reason a run ended.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Startup,
    Running,
    Halting,
    Shutdown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Startup => "startup",
            Phase::Running => "running",
            Phase::Halting => "halting",
            Phase::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// Operator interrupt.
    Interrupted,
    /// Every trigger source closed.
    Completed,
    TooManyFailures { count: u32, limit: u32 },
    HaltRequested { handler: String, message: String },
    StartupFailed(String),
    /// The result stream went away underneath the runtime.
    Transport(String),
}

impl HaltReason {
    /// Process exit status for this reason.
    pub fn exit_code(&self) -> i32 {
        match self {
            HaltReason::Interrupted | HaltReason::Completed => 0,
            HaltReason::StartupFailed(_) => 2,
            HaltReason::TooManyFailures { .. }
            | HaltReason::HaltRequested { .. }
            | HaltReason::Transport(_) => 1,
        }
    }

    pub fn is_fault(&self) -> bool {
        self.exit_code() != 0
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::Interrupted => f.write_str("interrupted"),
            HaltReason::Completed => f.write_str("all trigger sources closed"),
            HaltReason::TooManyFailures { count, limit } => {
                write!(f, "{count} handler failures reached the limit of {limit}")
            }
            HaltReason::HaltRequested { handler, message } => {
                write!(f, "handler '{handler}' requested halt: {message}")
            }
            HaltReason::StartupFailed(msg) => write!(f, "startup failed: {msg}"),
            HaltReason::Transport(msg) => write!(f, "transport failure: {msg}"),
        }
    }
}

/// Current phase plus the first halt reason recorded.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    phase: Phase,
    halt_reason: Option<HaltReason>,
}

impl Lifecycle {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn halt_reason(&self) -> Option<&HaltReason> {
        self.halt_reason.as_ref()
    }

    /// Move strictly forward. Returns `false` (and changes nothing) otherwise.
    pub fn advance(&mut self, to: Phase) -> bool {
        if to <= self.phase {
            return false;
        }
        self.phase = to;
        true
    }

    /// Enter Halting with `reason`. Only the first call wins.
    pub fn begin_halt(&mut self, reason: HaltReason) -> bool {
        if self.phase >= Phase::Halting {
            return false;
        }
        self.phase = Phase::Halting;
        self.halt_reason = Some(reason);
        true
    }
}
