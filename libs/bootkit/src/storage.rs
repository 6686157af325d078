//! Runtime-wide scratch storage.
//!
//! Advisory shared state for modules of one runtime: no schema, no invariants. Values are
//! stored as `Arc<T>` and read back by type; a read with the wrong type yields `None`.

use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;

type Value = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct Storage {
    map: DashMap<String, Value>,
}

impl Storage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `key`, returning whether a previous value was replaced.
    pub fn insert<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) -> bool {
        self.map.insert(key.into(), Arc::new(value)).is_some()
    }

    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.map.get(key)?.value().clone();
        value.downcast::<T>().ok()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.map.remove(key).is_some()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
