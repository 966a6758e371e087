// src/bot.rs

//! Bot definition: a name, declared parameters and an ordered set of
//! handler registrations.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::{BotError, Result};
use crate::handler::{
    handler_fn, EventFilter, HandlerContext, HandlerFn, HandlerOutcome, HandlerRegistry,
    MetricFilter, TriggerFilter,
};
use crate::trigger::cron::CronSchedule;
use crate::trigger::TriggerPayload;

#[derive(Debug, Clone)]
pub struct Bot {
    name: String,
    registry: Arc<HandlerRegistry>,
    parameters: BTreeMap<String, Value>,
}

impl Bot {
    pub fn builder(name: impl Into<String>) -> BotBuilder {
        BotBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Managed parameters and their defaults.
    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.parameters
    }
}

/// Collects registrations; validation happens in [`BotBuilder::build`].
pub struct BotBuilder {
    name: String,
    entries: Vec<(String, PendingFilter, HandlerFn)>,
    parameters: BTreeMap<String, Value>,
}

// Cron expressions are parsed at build time so that all registration
// errors surface together.
enum PendingFilter {
    Ready(TriggerFilter),
    Cron(String),
}

impl BotBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    /// Declare a managed parameter that survives restarts.
    pub fn parameter(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), default.into());
        self
    }

    pub fn on_block<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(HandlerContext, TriggerPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerOutcome> + Send + 'static,
    {
        self.register(name, TriggerFilter::NewBlock, handler_fn(f))
    }

    pub fn on_event<F, Fut>(self, name: &str, filter: EventFilter, f: F) -> Self
    where
        F: Fn(HandlerContext, TriggerPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerOutcome> + Send + 'static,
    {
        self.register(name, TriggerFilter::EventLog(filter), handler_fn(f))
    }

    pub fn cron<F, Fut>(mut self, name: &str, expression: &str, f: F) -> Self
    where
        F: Fn(HandlerContext, TriggerPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerOutcome> + Send + 'static,
    {
        self.entries.push((
            name.to_string(),
            PendingFilter::Cron(expression.to_string()),
            handler_fn(f),
        ));
        self
    }

    pub fn on_metric<F, Fut>(self, name: &str, filter: MetricFilter, f: F) -> Self
    where
        F: Fn(HandlerContext, TriggerPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerOutcome> + Send + 'static,
    {
        self.register(name, TriggerFilter::MetricCallback(filter), handler_fn(f))
    }

    pub fn on_startup<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(HandlerContext, TriggerPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerOutcome> + Send + 'static,
    {
        self.register(name, TriggerFilter::Startup, handler_fn(f))
    }

    pub fn on_shutdown<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(HandlerContext, TriggerPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerOutcome> + Send + 'static,
    {
        self.register(name, TriggerFilter::Shutdown, handler_fn(f))
    }

    pub fn on_worker_startup<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(HandlerContext, TriggerPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerOutcome> + Send + 'static,
    {
        self.register(name, TriggerFilter::WorkerStartup, handler_fn(f))
    }

    pub fn on_worker_shutdown<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(HandlerContext, TriggerPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerOutcome> + Send + 'static,
    {
        self.register(name, TriggerFilter::WorkerShutdown, handler_fn(f))
    }

    /// Register pre-built logic against any filter.
    pub fn register(mut self, name: &str, filter: TriggerFilter, logic: HandlerFn) -> Self {
        self.entries
            .push((name.to_string(), PendingFilter::Ready(filter), logic));
        self
    }

    pub fn build(self) -> Result<Bot> {
        if self.name.trim().is_empty() {
            return Err(BotError::Registration("bot name is empty".to_string()));
        }

        let mut entries = Vec::with_capacity(self.entries.len());
        for (name, pending, logic) in self.entries {
            let filter = match pending {
                PendingFilter::Ready(filter) => filter,
                PendingFilter::Cron(expr) => {
                    let schedule = CronSchedule::parse(&expr).map_err(|e| {
                        BotError::Registration(format!("handler '{name}': {e}"))
                    })?;
                    TriggerFilter::Cron(schedule)
                }
            };
            entries.push((name, filter, logic));
        }

        Ok(Bot {
            name: self.name,
            registry: Arc::new(HandlerRegistry::new(entries)?),
            parameters: self.parameters,
        })
    }
}
