//! Process-wide keyed state, reified as a value owned by the runtime.
//!
//! Adaptors use this to discover each other across threads: a push queue is
//! registered under a well-known key at node start and looked up by the
//! adaptor that feeds it. Values are type-erased; lookups downcast.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A thread-safe keyed map of shared values.
///
/// Cloning shares the underlying map. Created with the configuration, torn
/// down explicitly or when the engine stops.
#[derive(Clone, Default)]
pub struct GlobalState {
    inner: Arc<Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>>,
}

impl GlobalState {
    pub fn new() -> Self {
        GlobalState::default()
    }

    pub fn set(&self, key: &str, value: Arc<dyn Any + Send + Sync>) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
    }

    /// Looks up and downcasts a value; `None` if absent or of another type.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).contains_key(key)
    }

    /// Drops every entry; used at engine teardown.
    pub fn clear(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let state = GlobalState::new();
        state.set("answer", Arc::new(42u32));
        assert_eq!(state.get::<u32>("answer").as_deref(), Some(&42));
        assert!(state.get::<String>("answer").is_none());
        assert!(state.remove("answer"));
        assert!(!state.contains("answer"));
    }

    #[test]
    fn shared_across_clones_and_threads() {
        let state = GlobalState::new();
        let remote = state.clone();
        std::thread::spawn(move || remote.set("from-thread", Arc::new(1i64)))
            .join()
            .unwrap();
        assert_eq!(state.get::<i64>("from-thread").as_deref(), Some(&1));
    }
}
