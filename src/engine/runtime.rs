// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::core::{Checkpoints, CoreRuntime};
use super::{CoreCommand, HaltReason, Phase, RuntimeEvent, RuntimeStatus};
use crate::bot::Bot;
use crate::broker::{Broker, InMemoryBroker, TaskDispatcher, TaskId, TaskResult, WorkItem};
use crate::chain::Signer;
use crate::config::BotConfig;
use crate::errors::{BotError, Result};
use crate::handler::{Dependencies, HandlerId};
use crate::metrics::{LogRecorder, MetricAggregator, Recorder};
use crate::nonce::NonceManager;
use crate::state::{
    FileSnapshotStore, MemorySnapshotStore, ParameterHandle, SharedState, SnapshotStore,
    WorkerState,
};
use crate::trigger::{SourceHandles, Trigger, TriggerAdapter, TriggerPayload, TriggerSources};
use crate::types::TaskType;
use crate::worker::{execute, WorkerPool};

const EVENT_CAPACITY: usize = 1024;

/// How a run ended.
#[derive(Debug)]
pub struct RunReport {
    pub reason: HaltReason,
    pub failures: u32,
    pub checkpoints: Checkpoints,
    pub metrics: MetricAggregator,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.reason.exit_code()
    }
}

pub struct RuntimeBuilder {
    bot: Bot,
    config: BotConfig,
    broker: Option<Arc<dyn Broker>>,
    sources: TriggerSources,
    recorder: Arc<dyn Recorder>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    signer: Option<(Arc<dyn Signer>, Arc<NonceManager>)>,
    local_workers: Option<usize>,
    handle_signals: bool,
    shared: SharedState,
}

impl RuntimeBuilder {
    pub fn new(bot: Bot, config: BotConfig) -> Self {
        Self {
            bot,
            config,
            broker: None,
            sources: TriggerSources::default(),
            recorder: Arc::new(LogRecorder),
            snapshots: None,
            signer: None,
            local_workers: None,
            handle_signals: false,
            shared: SharedState::new(),
        }
    }

    /// Defaults to an [`InMemoryBroker`].
    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn sources(mut self, sources: TriggerSources) -> Self {
        self.sources = sources;
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Defaults to a file store at `[state].snapshot`, or memory.
    pub fn snapshots(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    pub fn signer(mut self, signer: Arc<dyn Signer>, nonce: Arc<NonceManager>) -> Self {
        self.signer = Some((signer, nonce));
        self
    }

    /// Workers run inside this process. Defaults to `[broker].workers`;
    /// zero means all work is executed elsewhere.
    pub fn local_workers(mut self, count: usize) -> Self {
        self.local_workers = Some(count);
        self
    }

    /// Turn OS termination signals into a graceful halt.
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    pub fn shared_state(mut self, shared: SharedState) -> Self {
        self.shared = shared;
        self
    }

    pub fn build(self) -> Runtime {
        let broker: Arc<dyn Broker> = match self.broker {
            Some(broker) => broker,
            None => Arc::new(InMemoryBroker::new()),
        };
        let snapshots: Arc<dyn SnapshotStore> = match (self.snapshots, &self.config.snapshot_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileSnapshotStore::new(path.clone())),
            (None, None) => Arc::new(MemorySnapshotStore::new()),
        };

        let mut deps = Dependencies::new(self.shared.clone());
        if let Some((signer, nonce)) = self.signer {
            deps = deps.with_signer(signer, nonce);
        }

        let core = CoreRuntime::new(Arc::clone(self.bot.registry()), &self.config);
        let (status_tx, status_rx) = watch::channel(core.status());
        let parameters = ParameterHandle::new(self.shared, Arc::clone(&snapshots), status_rx);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let local_workers = self.local_workers.unwrap_or(self.config.broker.workers);

        Runtime {
            core,
            dispatcher: TaskDispatcher::new(Arc::clone(&broker)),
            broker,
            event_tx,
            event_rx,
            sources: Some(self.sources),
            recorder: self.recorder,
            snapshots,
            deps,
            parameters,
            status_tx,
            local_workers,
            workers_serving: false,
            handle_signals: self.handle_signals,
            bot: self.bot,
            config: self.config,
        }
    }
}

/// Async IO shell around [`CoreRuntime`].
///
/// Reads events, executes the core's commands against the broker and the
/// recorder, and walks the lifecycle: startup, running, halting (drain and
/// shutdown hooks), shutdown.
pub struct Runtime {
    bot: Bot,
    config: BotConfig,
    core: CoreRuntime,
    dispatcher: TaskDispatcher,
    broker: Arc<dyn Broker>,
    event_tx: mpsc::Sender<RuntimeEvent>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    sources: Option<TriggerSources>,
    recorder: Arc<dyn Recorder>,
    snapshots: Arc<dyn SnapshotStore>,
    deps: Dependencies,
    parameters: ParameterHandle,
    status_tx: watch::Sender<RuntimeStatus>,
    local_workers: usize,
    workers_serving: bool,
    handle_signals: bool,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("bot", &self.bot.name())
            .field("core", &self.core)
            .field("local_workers", &self.local_workers)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn builder(bot: Bot, config: BotConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(bot, config)
    }

    /// Inject events (e.g. `ShutdownRequested`) from outside.
    pub fn events(&self) -> mpsc::Sender<RuntimeEvent> {
        self.event_tx.clone()
    }

    pub fn status(&self) -> watch::Receiver<RuntimeStatus> {
        self.status_tx.subscribe()
    }

    pub fn parameters(&self) -> ParameterHandle {
        self.parameters.clone()
    }

    pub fn shared_state(&self) -> SharedState {
        self.deps.shared.clone()
    }

    pub async fn run(mut self) -> Result<RunReport> {
        let registry = Arc::clone(self.bot.registry());
        info!(
            bot = %self.bot.name(),
            handlers = registry.len(),
            fingerprint = %registry.fingerprint(),
            workers = self.local_workers,
            "runtime starting"
        );

        let mut pool = None;
        let mut sources = None;
        let mut signals = None;

        match self.startup(&mut pool).await {
            Ok(()) => {
                self.core.enter_running();
                self.publish_status();
                sources = self.spawn_sources();
                signals = self.spawn_signal_listener();
                self.run_loop().await;
            }
            Err(err) => {
                error!(error = %err, "startup failed; shutting down");
                self.core.begin_halt(HaltReason::StartupFailed(err.to_string()));
                self.publish_status();
            }
        }

        if let Some(handle) = signals {
            handle.abort();
        }
        if let Some(sources) = sources {
            sources.stop().await;
        }

        self.drain().await;
        self.run_shutdown_handlers().await;
        if let Some(pool) = pool {
            pool.shutdown(self.config.drain_timeout).await;
        }

        self.publish_status();
        if let Err(e) = self.parameters.persist().await {
            warn!(error = %e, "failed to save state snapshot");
        }

        self.broker.close();
        self.core.finish();
        self.publish_status();

        let reason = self
            .core
            .halt_reason()
            .cloned()
            .unwrap_or(HaltReason::Completed);
        info!(%reason, failures = self.core.failures(), "runtime stopped");

        Ok(RunReport {
            failures: self.core.failures(),
            checkpoints: self.core.checkpoints(),
            reason,
            metrics: self.core.into_metrics(),
        })
    }

    async fn startup(&mut self, pool: &mut Option<WorkerPool>) -> Result<()> {
        let snapshot = self
            .snapshots
            .load()
            .await
            .map_err(|e| BotError::StartupFailure(format!("loading state snapshot: {e}")))?
            .unwrap_or_default();
        self.core.restore(&snapshot);
        self.parameters.restore(self.bot.parameters(), &snapshot);
        self.publish_status();

        let results = self
            .broker
            .subscribe_results()
            .map_err(|e| BotError::StartupFailure(format!("subscribing to results: {e}")))?;
        spawn_result_forwarder(results, self.event_tx.clone());

        if self.local_workers > 0 {
            let mut workers = WorkerPool::spawn(
                self.local_workers,
                Arc::clone(self.bot.registry()),
                Arc::clone(&self.broker),
                self.deps.clone(),
            );
            let ready = workers.wait_ready(self.config.startup_timeout).await;
            *pool = Some(workers);
            ready?;
        }
        self.workers_serving = true;

        let startup: Vec<HandlerId> = self
            .bot
            .registry()
            .of_type(TaskType::Startup)
            .map(|reg| reg.id)
            .collect();

        for id in startup {
            let trigger = Trigger {
                kind: TaskType::Startup,
                payload: TriggerPayload::Startup(snapshot.clone()),
                handlers: vec![id],
            };
            for item in self.core.plan(trigger) {
                let name = item.handler.clone();
                let result = self
                    .run_hook(item, self.config.startup_timeout)
                    .await
                    .map_err(|e| BotError::StartupFailure(format!("startup handler '{name}': {e}")))?;
                if let Some(err) = result.error() {
                    return Err(BotError::StartupFailure(format!(
                        "startup handler '{name}' failed: {err}"
                    )));
                }
                info!(handler = %name, "startup handler finished");
            }
        }
        Ok(())
    }

    fn spawn_sources(&mut self) -> Option<SourceHandles> {
        let sources = self.sources.take()?;
        let adapter = Arc::new(TriggerAdapter::new(self.bot.registry()));
        if sources.blocks.is_none() && adapter.wants_blocks() {
            warn!("block handlers registered but no block source configured");
        }
        if sources.logs.is_empty() && adapter.wants_logs() {
            warn!("event handlers registered but no log source configured");
        }
        Some(sources.spawn(adapter, self.event_tx.clone()))
    }

    fn spawn_signal_listener(&self) -> Option<JoinHandle<()>> {
        if !self.handle_signals {
            return None;
        }
        let tx = self.event_tx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = super::signals::wait_for_shutdown_signal().await {
                error!(error = %e, "failed to listen for shutdown signals");
                return;
            }
            info!("shutdown signal received");
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        }))
    }

    /// Main event loop while Running.
    async fn run_loop(&mut self) {
        info!("runtime running");
        while self.core.phase() == Phase::Running {
            let Some(event) = self.event_rx.recv().await else {
                info!("runtime event channel closed; exiting");
                break;
            };
            trace!(?event, "runtime received event");

            let step = self.core.step(event);
            self.apply(step.commands).await;
            self.publish_status();

            if !step.keep_running {
                info!("core left running phase");
                break;
            }
        }
    }

    /// Wait for in-flight tasks until the drain timeout, then discard.
    async fn drain(&mut self) {
        if self.core.in_flight() == 0 {
            return;
        }
        info!(
            in_flight = self.core.in_flight(),
            timeout_ms = self.config.drain_timeout.as_millis() as u64,
            "draining in-flight tasks"
        );

        let deadline = Instant::now() + self.config.drain_timeout;
        while self.core.in_flight() > 0 {
            match tokio::time::timeout_at(deadline, self.event_rx.recv()).await {
                Ok(Some(
                    event @ (RuntimeEvent::TaskCompleted(_) | RuntimeEvent::DispatchFailed { .. }),
                )) => {
                    let step = self.core.step(event);
                    self.apply(step.commands).await;
                    self.publish_status();
                }
                Ok(Some(_)) => trace!("ignoring non-result event while draining"),
                Ok(None) => break,
                Err(_) => {
                    let dropped = self.core.discard_in_flight();
                    warn!(dropped, "drain timed out; discarding remaining results");
                    break;
                }
            }
        }
        self.publish_status();
    }

    /// Each shutdown handler runs independently; failures are only logged.
    async fn run_shutdown_handlers(&mut self) {
        let shutdown: Vec<HandlerId> = self
            .bot
            .registry()
            .of_type(TaskType::Shutdown)
            .map(|reg| reg.id)
            .collect();

        for id in shutdown {
            let trigger = Trigger {
                kind: TaskType::Shutdown,
                payload: TriggerPayload::Lifecycle,
                handlers: vec![id],
            };
            for item in self.core.plan(trigger) {
                let name = item.handler.clone();
                match self.run_hook(item, self.config.startup_timeout).await {
                    Ok(result) => match result.error() {
                        Some(err) => warn!(handler = %name, error = %err, "shutdown handler failed"),
                        None => info!(handler = %name, "shutdown handler finished"),
                    },
                    Err(e) => warn!(handler = %name, error = %e, "shutdown handler did not finish"),
                }
            }
        }
    }

    /// Run a STARTUP or SHUTDOWN item through the broker and wait for it.
    /// When no worker is serving (a worker startup hook failed) the item is
    /// executed in-process instead.
    async fn run_hook(&mut self, item: WorkItem, timeout: Duration) -> Result<TaskResult> {
        if !self.workers_serving {
            debug!(task = %item.task_id, handler = %item.handler, "no worker serving; running hook in-process");
            let result = execute(self.bot.registry(), item, &self.deps, &WorkerState::new(0)).await;
            let step = self.core.step(RuntimeEvent::TaskCompleted(result.clone()));
            self.apply(step.commands).await;
            return Ok(result);
        }
        let task_id = item.task_id;
        self.submit(item).await?;
        self.await_task(task_id, timeout).await
    }

    /// Submit one item; a refused enqueue is fed back to the core as a
    /// failed task.
    async fn submit(&mut self, item: WorkItem) -> Result<()> {
        match self.dispatcher.submit(item.clone()).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(task = %item.task_id, handler = %item.handler, error = %e, "dispatch failed");
                let step = self.core.step(RuntimeEvent::DispatchFailed {
                    item,
                    error: e.to_string(),
                });
                self.apply(step.commands).await;
                Err(e)
            }
        }
    }

    /// Wait for one task's result, processing other results meanwhile.
    async fn await_task(&mut self, task: TaskId, timeout: Duration) -> Result<TaskResult> {
        let deadline = Instant::now() + timeout;
        loop {
            let event = match tokio::time::timeout_at(deadline, self.event_rx.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(BotError::transport("runtime event channel closed")),
                Err(_) => {
                    return Err(BotError::Other(anyhow::anyhow!(
                        "timed out after {}ms waiting for {task}",
                        timeout.as_millis()
                    )));
                }
            };

            match event {
                RuntimeEvent::TaskCompleted(result) => {
                    let ours = result.task_id == task && self.core.is_in_flight(task);
                    let step = self.core.step(RuntimeEvent::TaskCompleted(result.clone()));
                    self.apply(step.commands).await;
                    self.publish_status();
                    if ours {
                        return Ok(result);
                    }
                }
                RuntimeEvent::ShutdownRequested => {
                    self.core.begin_halt(HaltReason::Interrupted);
                    return Err(BotError::Other(anyhow::anyhow!("interrupted")));
                }
                RuntimeEvent::TransportLost(msg) => {
                    self.core.begin_halt(HaltReason::Transport(msg.clone()));
                    return Err(BotError::Transport(msg));
                }
                other => {
                    let step = self.core.step(other);
                    self.apply(step.commands).await;
                }
            }
        }
    }

    async fn apply(&mut self, commands: Vec<CoreCommand>) {
        let mut queue: VecDeque<CoreCommand> = commands.into();
        while let Some(command) = queue.pop_front() {
            match command {
                CoreCommand::Dispatch(items) => {
                    for item in items {
                        if let Err(e) = self.dispatcher.submit(item.clone()).await {
                            warn!(task = %item.task_id, handler = %item.handler, error = %e, "dispatch failed");
                            let step = self.core.step(RuntimeEvent::DispatchFailed {
                                item,
                                error: e.to_string(),
                            });
                            queue.extend(step.commands);
                        }
                    }
                }
                CoreCommand::Record(result) => {
                    if let Err(e) = self.recorder.add_result(result).await {
                        warn!(error = %e, "recorder rejected task result");
                    }
                }
                CoreCommand::RecordMetrics(samples) => {
                    for sample in samples {
                        if let Err(e) = self.recorder.append(sample).await {
                            warn!(error = %e, "recorder rejected datapoint");
                        }
                    }
                }
                CoreCommand::Halt(reason) => {
                    info!(%reason, "halt requested");
                }
            }
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.core.status());
    }
}

fn spawn_result_forwarder(
    mut results: mpsc::UnboundedReceiver<TaskResult>,
    tx: mpsc::Sender<RuntimeEvent>,
) {
    tokio::spawn(async move {
        while let Some(result) = results.recv().await {
            if tx.send(RuntimeEvent::TaskCompleted(result)).await.is_err() {
                debug!("runtime gone; result forwarder exiting");
                return;
            }
        }
        let _ = tx
            .send(RuntimeEvent::TransportLost("result stream closed".to_string()))
            .await;
    });
}
