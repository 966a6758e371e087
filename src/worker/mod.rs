// src/worker/mod.rs

//! Local workers: dequeue, execute, publish.
//!
//! Each worker runs the `WORKER_STARTUP` hooks once before taking work and
//! the `WORKER_SHUTDOWN` hooks once when stopped. A stopped worker finishes
//! the item it is executing before it exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::broker::{closed_signal, Broker};
use crate::errors::{BotError, Result};
use crate::handler::{Dependencies, HandlerContext, HandlerRegistry};
use crate::state::WorkerState;
use crate::trigger::TriggerPayload;
use crate::types::TaskType;

pub mod execute;

pub use execute::{execute, invoke};

type Ready = oneshot::Receiver<std::result::Result<(), String>>;

#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    ready: Vec<Ready>,
    stop: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawn `count` workers. Use [`WorkerPool::wait_ready`] to learn whether
    /// their startup hooks succeeded.
    pub fn spawn(
        count: usize,
        registry: Arc<HandlerRegistry>,
        broker: Arc<dyn Broker>,
        deps: Dependencies,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        let mut workers = Vec::with_capacity(count);
        let mut ready = Vec::with_capacity(count);

        for id in 0..count {
            let (ready_tx, ready_rx) = oneshot::channel();
            let worker = Worker {
                id,
                registry: Arc::clone(&registry),
                broker: Arc::clone(&broker),
                deps: deps.clone(),
                state: WorkerState::new(id),
            };
            workers.push(tokio::spawn(worker.run(ready_tx, stop.subscribe())));
            ready.push(ready_rx);
        }

        info!(workers = count, "worker pool spawned");
        Self {
            workers,
            ready,
            stop,
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Wait for every worker's startup hooks.
    pub async fn wait_ready(&mut self, timeout: Duration) -> Result<()> {
        let mut failures = Vec::new();
        for (id, rx) in self.ready.drain(..).enumerate() {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(msg))) => failures.push(msg),
                Ok(Err(_)) => failures.push(format!("worker {id} exited during startup")),
                Err(_) => failures.push(format!("worker {id} startup timed out")),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(BotError::StartupFailure(failures.join("; ")))
        }
    }

    /// Stop all workers, running their shutdown hooks. Workers that do not
    /// exit within `timeout` are aborted.
    pub async fn shutdown(self, timeout: Duration) {
        self.stop.send_replace(true);
        let deadline = tokio::time::Instant::now() + timeout;
        for (id, mut handle) in self.workers.into_iter().enumerate() {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(worker = id, error = %e, "worker task failed"),
                Err(_) => {
                    warn!(worker = id, "worker did not stop in time; aborting");
                    handle.abort();
                }
            }
        }
        info!("worker pool stopped");
    }
}

struct Worker {
    id: usize,
    registry: Arc<HandlerRegistry>,
    broker: Arc<dyn Broker>,
    deps: Dependencies,
    state: WorkerState,
}

impl Worker {
    async fn run(
        self,
        ready: oneshot::Sender<std::result::Result<(), String>>,
        stop: watch::Receiver<bool>,
    ) {
        let startup = self.startup_hooks().await;
        let started = startup.is_ok();
        let _ = ready.send(startup);

        if started {
            self.work(stop).await;
        } else {
            closed_signal(stop).await;
        }

        self.shutdown_hooks().await;
        info!(worker = self.id, "worker exited");
    }

    async fn work(&self, stop: watch::Receiver<bool>) {
        loop {
            let next = tokio::select! {
                next = self.broker.dequeue() => next,
                _ = closed_signal(stop.clone()) => return,
            };
            let item = match next {
                Ok(Some(item)) => item,
                Ok(None) => return,
                Err(e) => {
                    error!(worker = self.id, error = %e, "dequeue failed; worker stopping");
                    return;
                }
            };

            let result = execute(&self.registry, item, &self.deps, &self.state).await;
            if let Err(e) = self.broker.publish_result(result).await {
                error!(worker = self.id, error = %e, "failed to publish task result");
            }
        }
    }

    async fn startup_hooks(&self) -> std::result::Result<(), String> {
        for reg in self.registry.of_type(TaskType::WorkerStartup) {
            let ctx = HandlerContext::new(&reg.name, None, &self.deps, self.state.clone());
            if let Err(err) = invoke(reg, ctx, TriggerPayload::Lifecycle).await {
                error!(worker = self.id, handler = %reg.name, error = %err, "worker startup hook failed");
                return Err(format!("worker {} hook '{}': {err}", self.id, reg.name));
            }
        }
        Ok(())
    }

    async fn shutdown_hooks(&self) {
        for reg in self.registry.of_type(TaskType::WorkerShutdown) {
            let ctx = HandlerContext::new(&reg.name, None, &self.deps, self.state.clone());
            if let Err(err) = invoke(reg, ctx, TriggerPayload::Lifecycle).await {
                warn!(worker = self.id, handler = %reg.name, error = %err, "worker shutdown hook failed");
            }
        }
    }
}
