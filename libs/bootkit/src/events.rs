//! Observer lists for lifecycle notifications.
//!
//! Listeners are plain callbacks, invoked synchronously in subscription order. Emission
//! works on a snapshot, so a listener may subscribe further listeners without deadlocking;
//! those only see later events.

use parking_lot::RwLock;
use std::sync::Arc;

pub struct Listeners<F: ?Sized> {
    list: RwLock<Vec<Arc<F>>>,
}

impl<F: ?Sized> Listeners<F> {
    pub fn new() -> Self {
        Self {
            list: RwLock::new(Vec::new()),
        }
    }

    pub fn push(&self, listener: Arc<F>) {
        self.list.write().push(listener);
    }

    pub fn snapshot(&self) -> Vec<Arc<F>> {
        self.list.read().clone()
    }
}
