//! In-process remote store.
//!
//! [`MemoryStore`] keeps the whole document tree in memory and notifies
//! subscribers when the value at their path changes, including changes made
//! by writes above or below it. It backs offline runs of the reporter and is
//! the store used in tests, where its write log and failure injection make
//! the write path observable.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use fotohora_types::StorePath;

use crate::error::{StoreError, StoreResult};
use crate::traits::{RemoteStore, SubscriptionId, ValueSubscription, ValueUpdate};
use crate::tree;

struct Subscriber {
    path: StorePath,
    tx: mpsc::UnboundedSender<ValueUpdate>,
}

#[derive(Default)]
struct Inner {
    root: Value,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    failing: Vec<StorePath>,
    writes: Vec<(StorePath, Value)>,
    attempts: usize,
}

/// An in-memory [`RemoteStore`].
///
/// # Example
///
/// ```
/// use fotohora_core::{MemoryStore, RemoteStore};
/// use fotohora_types::StorePath;
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() {
///     let store = MemoryStore::new();
///     store.write(&StorePath::config_interval(), json!(5000)).await.unwrap();
///     assert_eq!(store.get(&StorePath::config_interval()), Some(json!(5000)));
/// }
/// ```
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryStore")
            .field("subscribers", &inner.subscribers.len())
            .field("writes", &inner.writes.len())
            .finish()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `root` as its whole tree.
    pub fn with_root(root: Value) -> Self {
        let store = Self::default();
        store.lock().root = root;
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current value at `path`.
    pub fn get(&self, path: &StorePath) -> Option<Value> {
        tree::get(&self.lock().root, path.segments()).cloned()
    }

    /// The whole tree.
    pub fn snapshot(&self) -> Value {
        self.lock().root.clone()
    }

    /// Reject every write to `path` or below it.
    pub fn fail_writes_under(&self, path: StorePath) {
        self.lock().failing.push(path);
    }

    /// Stop rejecting writes.
    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Successful writes, in order.
    pub fn writes(&self) -> Vec<(StorePath, Value)> {
        self.lock().writes.clone()
    }

    /// Number of write attempts, successful or not.
    pub fn write_attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|_, s| !s.tx.is_closed());
        inner.subscribers.len()
    }

    /// Fail every live subscription with `reason` and drop it.
    pub fn cancel_subscriptions(&self, reason: &str) {
        let mut inner = self.lock();
        for (_, subscriber) in inner.subscribers.drain() {
            let _ = subscriber.tx.send(Err(StoreError::Cancelled {
                path: subscriber.path.to_string(),
                reason: reason.to_string(),
            }));
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn subscribe(&self, path: &StorePath) -> StoreResult<ValueSubscription> {
        let mut inner = self.lock();
        let (tx, subscription) = ValueSubscription::channel(path.clone());
        let current = tree::get(&inner.root, path.segments()).cloned();
        // The receiver is still held by `subscription`
        let _ = tx.send(Ok(current));
        inner.subscribers.insert(
            subscription.id(),
            Subscriber {
                path: path.clone(),
                tx,
            },
        );
        debug!("Subscribed {} to {}", subscription.id(), path);
        Ok(subscription)
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        if self.lock().subscribers.remove(&id).is_some() {
            debug!("Unsubscribed {}", id);
        }
    }

    async fn write(&self, path: &StorePath, value: Value) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.attempts += 1;

        if inner.failing.iter().any(|prefix| path.starts_with(prefix)) {
            return Err(StoreError::rejected(path.as_str(), None, "write rejected"));
        }

        let Inner {
            root,
            subscribers,
            writes,
            ..
        } = &mut *inner;

        let affected: Vec<(SubscriptionId, Option<Value>)> = subscribers
            .iter()
            .filter(|(_, s)| s.path.starts_with(path) || path.starts_with(&s.path))
            .map(|(id, s)| (*id, tree::get(root, s.path.segments()).cloned()))
            .collect();

        let segments: Vec<&str> = path.segments().collect();
        tree::set(root, &segments, value.clone());
        writes.push((path.clone(), value));

        for (id, before) in affected {
            let Some(subscriber) = subscribers.get(&id) else {
                continue;
            };
            let after = tree::get(root, subscriber.path.segments()).cloned();
            if after != before && subscriber.tx.send(Ok(after)).is_err() {
                subscribers.remove(&id);
            }
        }
        Ok(())
    }

    async fn read(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        Ok(self.get(path))
    }
}
