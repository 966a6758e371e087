// src/state/snapshot.rs

//! Persisted restart state: block checkpoints and managed parameters.
//!
//! Stores never move a checkpoint backwards. Saving a snapshot whose
//! `last_block_processed` is lower than the stored one keeps the stored
//! value.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::{BotError, Result};
use crate::types::BoxFuture;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub last_block_seen: Option<u64>,
    pub last_block_processed: Option<u64>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    pub last_updated: DateTime<Utc>,
}

impl StateSnapshot {
    /// Fold `newer` into `self`: checkpoints take the max, parameters and
    /// timestamp take the newer value.
    pub fn merge(&mut self, newer: StateSnapshot) {
        self.last_block_seen = max_opt(self.last_block_seen, newer.last_block_seen);
        self.last_block_processed = max_opt(self.last_block_processed, newer.last_block_processed);
        self.parameters.extend(newer.parameters);
        self.last_updated = newer.last_updated;
    }
}

fn max_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

pub trait SnapshotStore: Send + Sync {
    fn load(&self) -> BoxFuture<'_, Result<Option<StateSnapshot>>>;

    fn save(&self, snapshot: StateSnapshot) -> BoxFuture<'_, Result<()>>;
}

/// JSON file, replaced atomically on each save.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Option<StateSnapshot>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BotError::IoError(e)),
        }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> BoxFuture<'_, Result<Option<StateSnapshot>>> {
        Box::pin(async move {
            let snapshot = self.read().await?;
            match &snapshot {
                Some(s) => info!(
                    path = %self.path.display(),
                    last_block_processed = ?s.last_block_processed,
                    parameters = s.parameters.len(),
                    "loaded state snapshot"
                ),
                None => debug!(path = %self.path.display(), "no state snapshot yet"),
            }
            Ok(snapshot)
        })
    }

    fn save(&self, snapshot: StateSnapshot) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let merged = match self.read().await? {
                Some(mut stored) => {
                    stored.merge(snapshot);
                    stored
                }
                None => snapshot,
            };

            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let tmp = self.path.with_extension("json.tmp");
            tokio::fs::write(&tmp, serde_json::to_vec_pretty(&merged)?).await?;
            tokio::fs::rename(&tmp, &self.path).await?;
            debug!(path = %self.path.display(), "saved state snapshot");
            Ok(())
        })
    }
}

/// In-process store for tests and for runs without a snapshot path.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    stored: Mutex<Option<StateSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            stored: Mutex::new(Some(snapshot)),
        }
    }

    pub fn current(&self) -> Option<StateSnapshot> {
        self.stored
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> BoxFuture<'_, Result<Option<StateSnapshot>>> {
        Box::pin(async move { Ok(self.current()) })
    }

    fn save(&self, snapshot: StateSnapshot) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut stored = self.stored.lock().unwrap_or_else(|p| p.into_inner());
            match stored.as_mut() {
                Some(existing) => existing.merge(snapshot),
                None => *stored = Some(snapshot),
            }
            Ok(())
        })
    }
}
