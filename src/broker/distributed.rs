// src/broker/distributed.rs

//! Broker over an external message queue.
//!
//! Work items and results cross process boundaries as JSON. Workers are
//! expected to build the same bot (same registry fingerprint) as the runtime
//! that planned the work.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use super::{closed_signal, Broker, TaskResult, WorkItem};
use crate::errors::{BotError, Result};
use crate::types::BoxFuture;

/// Minimal named-queue transport.
pub trait MessageQueue: Send + Sync {
    fn push<'a>(&'a self, queue: &'a str, payload: Vec<u8>) -> BoxFuture<'a, Result<()>>;

    /// Wait for the next message; `None` when the queue is shut down.
    fn pop<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>>;
}

struct Lane {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

/// In-process [`MessageQueue`]: every byte still goes through the codec,
/// so it behaves like a remote queue minus the network.
#[derive(Default)]
pub struct LoopbackQueue {
    lanes: Mutex<HashMap<String, Arc<Lane>>>,
    disconnected: AtomicBool,
}

impl LoopbackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the connection: every later push fails.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    fn lane(&self, queue: &str) -> Arc<Lane> {
        let mut lanes = self.lanes.lock().unwrap_or_else(|p| p.into_inner());
        lanes
            .entry(queue.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                Arc::new(Lane {
                    tx,
                    rx: tokio::sync::Mutex::new(rx),
                })
            })
            .clone()
    }
}

impl MessageQueue for LoopbackQueue {
    fn push<'a>(&'a self, queue: &'a str, payload: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.disconnected.load(Ordering::SeqCst) {
                return Err(BotError::transport(format!("queue '{queue}' unreachable")));
            }
            self.lane(queue).tx.send(payload)?;
            Ok(())
        })
    }

    fn pop<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move {
            let lane = self.lane(queue);
            let mut rx = lane.rx.lock().await;
            Ok(rx.recv().await)
        })
    }
}

pub struct DistributedBroker {
    queue: Arc<dyn MessageQueue>,
    work_queue: String,
    result_queue: String,
    closed: watch::Sender<bool>,
    subscribed: AtomicBool,
}

impl DistributedBroker {
    /// Work goes to `name`, results to `name.results`.
    pub fn new(queue: Arc<dyn MessageQueue>, name: &str) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            queue,
            work_queue: name.to_string(),
            result_queue: format!("{name}.results"),
            closed,
            subscribed: AtomicBool::new(false),
        }
    }
}

impl std::fmt::Debug for DistributedBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedBroker")
            .field("work_queue", &self.work_queue)
            .field("result_queue", &self.result_queue)
            .finish_non_exhaustive()
    }
}

impl Broker for DistributedBroker {
    fn enqueue(&self, item: WorkItem) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if *self.closed.borrow() {
                return Err(BotError::transport("broker closed"));
            }
            let bytes = serde_json::to_vec(&item)?;
            self.queue.push(&self.work_queue, bytes).await?;
            debug!(task = %item.task_id, queue = %self.work_queue, "published work item");
            Ok(())
        })
    }

    fn dequeue(&self) -> BoxFuture<'_, Result<Option<WorkItem>>> {
        Box::pin(async move {
            loop {
                let closed = self.closed.subscribe();
                let popped = tokio::select! {
                    popped = self.queue.pop(&self.work_queue) => popped?,
                    _ = closed_signal(closed) => return Ok(None),
                };
                let Some(bytes) = popped else {
                    return Ok(None);
                };
                match serde_json::from_slice::<WorkItem>(&bytes) {
                    Ok(item) => return Ok(Some(item)),
                    Err(e) => error!(error = %e, "dropping undecodable work item"),
                }
            }
        })
    }

    fn publish_result(&self, result: TaskResult) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let bytes = serde_json::to_vec(&result)?;
            self.queue.push(&self.result_queue, bytes).await
        })
    }

    fn subscribe_results(&self) -> Result<mpsc::UnboundedReceiver<TaskResult>> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(BotError::transport("result stream already subscribed"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::clone(&self.queue);
        let name = self.result_queue.clone();
        let closed = self.closed.subscribe();

        tokio::spawn(async move {
            loop {
                let popped = tokio::select! {
                    popped = queue.pop(&name) => popped,
                    _ = closed_signal(closed.clone()) => return,
                };
                let bytes = match popped {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => return,
                    Err(e) => {
                        warn!(error = %e, queue = %name, "result queue read failed");
                        return;
                    }
                };
                match serde_json::from_slice::<TaskResult>(&bytes) {
                    Ok(result) => {
                        if tx.send(result).is_err() {
                            return;
                        }
                    }
                    Err(e) => error!(error = %e, "dropping undecodable task result"),
                }
            }
        });

        Ok(rx)
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}
