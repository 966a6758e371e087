// src/state/mod.rs

//! State visible to handlers, and what survives a restart.

pub mod parameters;
pub mod shared;
pub mod snapshot;
pub mod worker;

pub use parameters::ParameterHandle;
pub use shared::SharedState;
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore, StateSnapshot};
pub use worker::WorkerState;
