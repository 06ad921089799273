//! Keyed Debounce Timers
//!
//! Debounce timers are the only cancelable work in the system. A newer
//! schedule for the same key aborts the pending one, so only the last
//! action inside a quiet window runs.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Set of pending delayed actions, at most one per key
#[derive(Debug)]
pub struct Debouncer<K> {
    pending: HashMap<K, JoinHandle<()>>,
}

impl<K> Default for Debouncer<K> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> Debouncer<K> {
    /// Create an empty debouncer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay`, replacing any pending action for `key`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule<F>(&mut self, key: K, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pending.retain(|_, handle| !handle.is_finished());
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });
        if let Some(previous) = self.pending.insert(key, handle) {
            previous.abort();
        }
    }

    /// Cancel the pending action for `key`
    ///
    /// Returns true if an unfinished action was cancelled.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.pending.remove(key) {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Cancel every pending action
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }

    /// Whether an unfinished action is pending for `key`
    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.get(key).is_some_and(|h| !h.is_finished())
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        for handle in self.pending.values() {
            handle.abort();
        }
    }
}
