// src/metrics/recorder.rs

//! Persistence sink for datapoints and task results.
//!
//! The runtime calls the recorder from its event loop; implementations
//! should return quickly. Recorder errors are logged, never fatal.

use std::sync::Mutex;

use tracing::{info, warn};

use super::MetricSample;
use crate::broker::{TaskOutcome, TaskResult};
use crate::errors::{BotError, Result};
use crate::types::BoxFuture;

pub trait Recorder: Send + Sync {
    fn append(&self, sample: MetricSample) -> BoxFuture<'_, Result<()>>;

    fn add_result(&self, result: TaskResult) -> BoxFuture<'_, Result<()>>;
}

/// Emits one `info` line per sample and per result.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecorder;

impl Recorder for LogRecorder {
    fn append(&self, sample: MetricSample) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(
                metric = %sample.metric,
                value = %sample.value,
                ts = %sample.timestamp,
                "datapoint"
            );
            Ok(())
        })
    }

    fn add_result(&self, result: TaskResult) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match &result.outcome {
                TaskOutcome::Success(_) => info!(
                    task = %result.task_id,
                    handler = %result.handler,
                    elapsed_ms = result.duration.as_millis() as u64,
                    "task succeeded"
                ),
                TaskOutcome::Failure(err) => warn!(
                    task = %result.task_id,
                    handler = %result.handler,
                    elapsed_ms = result.duration.as_millis() as u64,
                    error = %err,
                    "task failed"
                ),
            }
            Ok(())
        })
    }
}

/// Keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    samples: Mutex<Vec<MetricSample>>,
    results: Mutex<Vec<TaskResult>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn results(&self) -> Vec<TaskResult> {
        self.results.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Values recorded for one metric, in append order.
    pub fn values_of(&self, metric: &str) -> Vec<super::Datapoint> {
        self.samples()
            .into_iter()
            .filter(|s| s.metric == metric)
            .map(|s| s.value)
            .collect()
    }
}

fn poisoned() -> BotError {
    BotError::Other(anyhow::anyhow!("memory recorder lock poisoned"))
}

impl Recorder for MemoryRecorder {
    fn append(&self, sample: MetricSample) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.samples.lock().map_err(|_| poisoned())?.push(sample);
            Ok(())
        })
    }

    fn add_result(&self, result: TaskResult) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.results.lock().map_err(|_| poisoned())?.push(result);
            Ok(())
        })
    }
}
