//! Synchronized user-data storage for instrumented objects
//!
//! Connections, statements, and transactions all expose a string-keyed map that
//! listener and customizer code can attach values to. The map is internally
//! synchronized: the instrumentation layer cannot prevent a connection from
//! being touched from an unexpected thread, so the storage must tolerate it.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// String-keyed storage of arbitrary values
///
/// Values are stored as `Arc<dyn Any + Send + Sync>` and retrieved by downcast.
/// Data attached to a connection is cleared when its lease is released.
#[derive(Default)]
pub struct UserData {
    map: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl UserData {
    /// Create empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under the given key, replacing any previous value
    pub fn set(&self, key: impl Into<String>, value: impl Any + Send + Sync) {
        self.map.lock().insert(key.into(), Arc::new(value));
    }

    /// Retrieve the value stored under the key, if present and of type `T`
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let guard = self.map.lock();
        guard.get(key).cloned()?.downcast::<T>().ok()
    }

    /// Remove the value stored under the key
    pub fn remove(&self, key: &str) {
        self.map.lock().remove(key);
    }

    /// Remove all stored values
    pub fn clear(&self) {
        self.map.lock().clear();
    }

    /// Whether any value is stored under the key
    pub fn contains(&self, key: &str) -> bool {
        self.map.lock().contains_key(key)
    }
}

impl std::fmt::Debug for UserData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.map.lock();
        f.debug_struct("UserData").field("len", &guard.len()).finish()
    }
}
