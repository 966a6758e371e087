// src/trigger/sources.rs

//! Forwarder tasks feeding inbound events into the runtime.
//!
//! Block and log receivers each get a forwarder; cron schedules each get a
//! ticker. All of them push into one router, which resolves handlers via
//! the [`TriggerAdapter`] and forwards triggers to the runtime. When every
//! input has closed, the router reports exhaustion once.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{InboundEvent, TriggerAdapter};
use crate::chain::{BlockHeader, ContractLog};
use crate::engine::RuntimeEvent;

const INBOUND_CAPACITY: usize = 256;

/// Channels the chain provider writes into.
#[derive(Debug, Default)]
pub struct TriggerSources {
    pub blocks: Option<mpsc::Receiver<BlockHeader>>,
    pub logs: Vec<mpsc::Receiver<ContractLog>>,
}

impl TriggerSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(mut self, rx: mpsc::Receiver<BlockHeader>) -> Self {
        self.blocks = Some(rx);
        self
    }

    pub fn with_logs(mut self, rx: mpsc::Receiver<ContractLog>) -> Self {
        self.logs.push(rx);
        self
    }

    /// Spawn forwarders, tickers and the router.
    pub fn spawn(self, adapter: Arc<TriggerAdapter>, out: mpsc::Sender<RuntimeEvent>) -> SourceHandles {
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundEvent>(INBOUND_CAPACITY);
        let mut handles = Vec::new();

        if let Some(mut blocks) = self.blocks {
            let tx = inbound_tx.clone();
            handles.push(tokio::spawn(async move {
                while let Some(header) = blocks.recv().await {
                    if tx.send(InboundEvent::NewBlock(header)).await.is_err() {
                        break;
                    }
                }
                debug!("block source closed");
            }));
        }

        for mut logs in self.logs {
            let tx = inbound_tx.clone();
            handles.push(tokio::spawn(async move {
                while let Some(log) = logs.recv().await {
                    if tx.send(InboundEvent::NewLog(log)).await.is_err() {
                        break;
                    }
                }
                debug!("log source closed");
            }));
        }

        for schedule in adapter.schedules() {
            info!(cron = %schedule.expression(), "starting cron ticker");
            handles.push(schedule.clone().spawn_ticker(inbound_tx.clone()));
        }

        // Only forwarders and tickers hold senders from here on.
        drop(inbound_tx);

        let router = tokio::spawn(async move {
            while let Some(event) = inbound_rx.recv().await {
                let Some(trigger) = adapter.trigger_for(event) else {
                    continue;
                };
                if out.send(RuntimeEvent::Triggered(trigger)).await.is_err() {
                    return;
                }
            }
            info!("all trigger sources closed");
            let _ = out.send(RuntimeEvent::SourcesExhausted).await;
        });
        handles.push(router);

        SourceHandles { handles }
    }
}

/// Running source tasks. Dropping this does not stop them.
#[derive(Debug)]
pub struct SourceHandles {
    handles: Vec<JoinHandle<()>>,
}

impl SourceHandles {
    /// Stop accepting new triggers.
    pub async fn stop(self) {
        for handle in &self.handles {
            handle.abort();
        }
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
