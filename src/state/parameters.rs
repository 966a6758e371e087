// src/state/parameters.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tracing::info;

use super::{SharedState, SnapshotStore, StateSnapshot};
use crate::engine::RuntimeStatus;
use crate::errors::Result;

/// Operator-facing handle for managed parameters.
///
/// Parameters live in [`SharedState`] under their own names, so handlers
/// read them like any other key. Updating through this handle also
/// persists a snapshot.
#[derive(Clone)]
pub struct ParameterHandle {
    shared: SharedState,
    names: Arc<Mutex<BTreeSet<String>>>,
    store: Arc<dyn SnapshotStore>,
    status: watch::Receiver<RuntimeStatus>,
}

impl ParameterHandle {
    pub fn new(
        shared: SharedState,
        store: Arc<dyn SnapshotStore>,
        status: watch::Receiver<RuntimeStatus>,
    ) -> Self {
        Self {
            shared,
            names: Arc::default(),
            store,
            status,
        }
    }

    /// Seed shared state from declared defaults, overridden by anything the
    /// snapshot carries.
    pub fn restore(&self, defaults: &BTreeMap<String, Value>, snapshot: &StateSnapshot) {
        let mut names = self.names.lock().unwrap_or_else(|p| p.into_inner());
        for (name, default) in defaults {
            let value = snapshot
                .parameters
                .get(name)
                .cloned()
                .unwrap_or_else(|| default.clone());
            self.shared.set_value(name.clone(), value);
            names.insert(name.clone());
        }
        for (name, value) in &snapshot.parameters {
            if names.insert(name.clone()) {
                self.shared.set_value(name.clone(), value.clone());
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.shared.get_value(name)
    }

    pub fn names(&self) -> Vec<String> {
        let names = self.names.lock().unwrap_or_else(|p| p.into_inner());
        names.iter().cloned().collect()
    }

    /// Change a parameter and persist the result.
    pub async fn update(&self, name: &str, value: Value) -> Result<()> {
        info!(parameter = name, %value, "updating managed parameter");
        self.shared.set_value(name, value);
        {
            let mut names = self.names.lock().unwrap_or_else(|p| p.into_inner());
            names.insert(name.to_string());
        }
        self.persist().await
    }

    /// Current parameters plus the runtime's checkpoints.
    pub fn snapshot(&self) -> StateSnapshot {
        let status = self.status.borrow().clone();
        let parameters = self
            .names()
            .into_iter()
            .filter_map(|name| self.shared.get_value(&name).map(|v| (name, v)))
            .collect();
        StateSnapshot {
            last_block_seen: status.last_block_seen,
            last_block_processed: status.last_block_processed,
            parameters,
            last_updated: Utc::now(),
        }
    }

    pub async fn persist(&self) -> Result<()> {
        self.store.save(self.snapshot()).await
    }
}

impl std::fmt::Debug for ParameterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterHandle")
            .field("names", &self.names())
            .finish_non_exhaustive()
    }
}
