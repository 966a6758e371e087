// src/state/worker.rs

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Per-worker typed slots, usually filled by `WORKER_STARTUP` handlers
/// (connections, clients, caches) and read by later tasks on that worker.
#[derive(Clone, Default)]
pub struct WorkerState {
    worker: usize,
    slots: Arc<RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>>,
}

impl WorkerState {
    pub fn new(worker: usize) -> Self {
        Self {
            worker,
            slots: Arc::default(),
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker
    }

    pub fn insert<T: Any + Send + Sync>(&self, value: T) {
        let mut slots = self.slots.write().unwrap_or_else(|p| p.into_inner());
        slots.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let slots = self.slots.read().unwrap_or_else(|p| p.into_inner());
        slots
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }

    pub fn remove<T: Any + Send + Sync>(&self) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(|p| p.into_inner());
        slots.remove(&TypeId::of::<T>()).is_some()
    }
}

impl std::fmt::Debug for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.slots.read().map(|s| s.len()).unwrap_or_default();
        f.debug_struct("WorkerState")
            .field("worker", &self.worker)
            .field("slots", &len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Client(&'static str);

    #[test]
    fn slots_are_keyed_by_type() {
        let state = WorkerState::new(3);
        state.insert(Client("rpc"));
        state.insert(7u32);

        assert_eq!(state.get::<Client>().map(|c| c.0), Some("rpc"));
        assert_eq!(state.get::<u32>().as_deref(), Some(&7));
        assert!(state.get::<u64>().is_none());
        assert!(state.remove::<u32>());
        assert!(state.get::<u32>().is_none());
    }
}
