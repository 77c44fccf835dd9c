//! Mock collaborators for testing.
//!
//! This module provides stand-ins for the platform side of the reporter so it
//! can be driven deterministically:
//!
//! - [`MockLocationProvider`]: manual fix injection, subscription accounting
//!   and failure injection
//! - [`RecordingHost`]: records stop requests
//! - [`ManualClock`]: a clock that only moves when told to

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use fotohora_types::PositionFix;

use crate::error::{Error, Result};
use crate::traits::{Clock, FixSubscription, HostControl, LocationProvider, StopReason, SubscriptionId};

/// A failure the mock provider should produce on its next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// Fail with [`Error::PermissionDenied`].
    PermissionDenied,
    /// Fail with [`Error::SubscriptionFailed`] carrying this reason.
    Rejected(String),
}

#[derive(Debug, Default)]
struct ProviderState {
    active: HashMap<SubscriptionId, mpsc::Sender<PositionFix>>,
    requested: Vec<Duration>,
    removed: usize,
    peak_active: usize,
    fail_next: Option<MockFailure>,
    fail_removals: bool,
}

/// A mock location provider.
///
/// Fixes are injected with [`push_fix`](Self::push_fix) and delivered to every
/// live subscription. The provider counts how many subscriptions were
/// requested, removed and live at once.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use fotohora_core::{LocationProvider, MockLocationProvider};
/// use fotohora_types::PositionFix;
///
/// #[tokio::main]
/// async fn main() {
///     let provider = MockLocationProvider::new();
///     let mut sub = provider.request_updates(Duration::from_secs(5)).await.unwrap();
///     provider.push_fix(PositionFix::new(4.0, -74.0, 0));
///     assert_eq!(sub.next_fix().await.unwrap().latitude, 4.0);
/// }
/// ```
#[derive(Debug)]
pub struct MockLocationProvider {
    state: Mutex<ProviderState>,
    buffer: usize,
}

impl Default for MockLocationProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLocationProvider {
    /// Create a provider with a 16-fix buffer per subscription.
    pub fn new() -> Self {
        Self::with_buffer(16)
    }

    /// Create a provider with a custom per-subscription buffer.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            state: Mutex::new(ProviderState::default()),
            buffer,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `request_updates` call fail.
    pub fn fail_next_request(&self, failure: MockFailure) {
        self.lock().fail_next = Some(failure);
    }

    /// Make every `remove_updates` call fail (the subscription stays live).
    pub fn fail_removals(&self, fail: bool) {
        self.lock().fail_removals = fail;
    }

    /// Deliver a fix to every live subscription.
    ///
    /// Returns `true` if at least one subscription accepted it.
    pub fn push_fix(&self, fix: PositionFix) -> bool {
        let state = self.lock();
        let mut delivered = false;
        for tx in state.active.values() {
            delivered |= tx.try_send(fix).is_ok();
        }
        delivered
    }

    /// Abandon every live subscription, as a platform would on revocation.
    pub fn close_active(&self) {
        self.lock().active.clear();
    }

    /// Intervals of every subscription requested so far, in order.
    pub fn requested_intervals(&self) -> Vec<Duration> {
        self.lock().requested.clone()
    }

    /// Number of successful removals.
    pub fn removed_count(&self) -> usize {
        self.lock().removed
    }

    /// Number of live subscriptions.
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    /// Largest number of subscriptions ever live at once.
    pub fn peak_active(&self) -> usize {
        self.lock().peak_active
    }
}

#[async_trait]
impl LocationProvider for MockLocationProvider {
    async fn request_updates(&self, interval: Duration) -> Result<FixSubscription> {
        let mut state = self.lock();
        match state.fail_next.take() {
            Some(MockFailure::PermissionDenied) => return Err(Error::PermissionDenied),
            Some(MockFailure::Rejected(reason)) => {
                return Err(Error::subscription_failed(interval, reason));
            }
            None => {}
        }

        let (tx, subscription) = FixSubscription::channel(interval, self.buffer);
        state.requested.push(interval);
        state.active.insert(subscription.id(), tx);
        state.peak_active = state.peak_active.max(state.active.len());
        Ok(subscription)
    }

    async fn remove_updates(&self, subscription: FixSubscription) -> Result<()> {
        let mut state = self.lock();
        if state.fail_removals {
            return Err(Error::RemovalFailed(format!(
                "mock refused to remove {}",
                subscription.id()
            )));
        }
        if state.active.remove(&subscription.id()).is_some() {
            state.removed += 1;
        }
        Ok(())
    }
}

/// A host that records stop requests.
#[derive(Debug, Default)]
pub struct RecordingHost {
    requests: Mutex<Vec<StopReason>>,
}

impl RecordingHost {
    /// Create a host with no recorded requests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stop request received, in order.
    pub fn stop_requests(&self) -> Vec<StopReason> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl HostControl for RecordingHost {
    fn request_stop(&self, reason: StopReason) {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(reason);
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Create a clock reading `millis`.
    pub fn new(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    /// Set the current time.
    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}
