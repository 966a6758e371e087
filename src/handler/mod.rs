// src/handler/mod.rs

//! User handlers: registration, identity and invocation types.
//!
//! - [`registration`] describes what a handler is bound to.
//! - [`registry`] is the immutable, indexed set of registrations a bot owns.
//! - [`context`] is what a handler receives next to its trigger payload.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::BotError;
use crate::metrics::Measurement;
use crate::trigger::TriggerPayload;
use crate::types::{BoxFuture, FailureKind};

pub mod context;
pub mod registration;
pub mod registry;

pub use context::{Dependencies, HandlerContext};
pub use registration::{EventFilter, HandlerRegistration, MetricFilter, TriggerFilter};
pub use registry::HandlerRegistry;

/// Index of a registration inside its bot's [`HandlerRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerId(pub usize);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Failure raised by a handler.
///
/// Handlers signal an explicit shutdown request with [`HandlerError::halt`];
/// everything else is an ordinary failure that only counts towards the
/// failure ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerError {
    pub kind: FailureKind,
    pub message: String,
}

impl HandlerError {
    pub fn ordinary(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Ordinary,
            message: message.into(),
        }
    }

    pub fn halt(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::ImmediateHalt,
            message: message.into(),
        }
    }

    pub fn is_halt(&self) -> bool {
        self.kind == FailureKind::ImmediateHalt
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Ordinary => f.write_str(&self.message),
            FailureKind::ImmediateHalt => write!(f, "halt requested: {}", self.message),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        HandlerError::ordinary(format!("{err:#}"))
    }
}

impl From<BotError> for HandlerError {
    fn from(err: BotError) -> Self {
        HandlerError::ordinary(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::ordinary(err.to_string())
    }
}

pub type HandlerOutcome = Result<Measurement, HandlerError>;

/// Type-erased handler logic.
pub type HandlerFn =
    Arc<dyn Fn(HandlerContext, TriggerPayload) -> BoxFuture<'static, HandlerOutcome> + Send + Sync>;

/// Wrap an async closure as [`HandlerFn`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(HandlerContext, TriggerPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    Arc::new(move |ctx, payload| Box::pin(f(ctx, payload)))
}
