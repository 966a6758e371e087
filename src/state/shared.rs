// src/state/shared.rs

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::{BotError, Result};

/// Key/value store shared by every handler in the process.
///
/// Each `get`/`set` is atomic for its key. There is no read-modify-write
/// primitive: handlers that need one must coordinate themselves.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        let map = self.inner.read().unwrap_or_else(|p| p.into_inner());
        map.get(key).cloned()
    }

    /// Typed read. A value that does not deserialize as `T` reads as `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_value(key)
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(BotError::from)?;
        self.set_value(key, value);
        Ok(())
    }

    pub fn set_value(&self, key: impl Into<String>, value: Value) {
        let mut map = self.inner.write().unwrap_or_else(|p| p.into_inner());
        map.insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut map = self.inner.write().unwrap_or_else(|p| p.into_inner());
        map.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        let map = self.inner.read().unwrap_or_else(|p| p.into_inner());
        map.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let map = self.inner.read().unwrap_or_else(|p| p.into_inner());
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_round_trip_and_mismatch() {
        let state = SharedState::new();
        state.set("threshold", 42u64).unwrap();
        assert_eq!(state.get::<u64>("threshold"), Some(42));
        assert_eq!(state.get::<String>("threshold"), None);
        assert_eq!(state.get::<u64>("missing"), None);

        let clone = state.clone();
        clone.remove("threshold");
        assert!(!state.contains("threshold"));
    }
}
