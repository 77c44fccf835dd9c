//! Capability traits the reporter is built on.
//!
//! The reporter never talks to a vendor SDK directly. It is handed:
//!
//! - a [`RemoteStore`] to subscribe to configuration and write positions,
//! - a [`LocationProvider`] that delivers fixes at a requested interval,
//! - a [`PermissionGate`] consulted once at start,
//! - a [`HostControl`] it asks to stop when it cannot continue,
//! - a [`Clock`] used to timestamp reports.
//!
//! Real and mock implementations of each live in this crate so the reporter
//! can be exercised without network access or location hardware.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use fotohora_types::{PositionFix, StorePath};

use crate::error::{Result, StoreError, StoreResult};

/// Identifier of a live subscription, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Allocate a fresh identifier.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw identifier.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One notification from a value subscription.
///
/// `Ok(None)` means the path currently holds no value.
pub type ValueUpdate = std::result::Result<Option<Value>, StoreError>;

/// A live subscription to the value at a store path.
///
/// The first item is the current value; later items arrive whenever the value
/// changes. The stream ends when the store drops the subscription.
#[derive(Debug)]
pub struct ValueSubscription {
    id: SubscriptionId,
    path: StorePath,
    receiver: mpsc::UnboundedReceiver<ValueUpdate>,
}

impl ValueSubscription {
    /// Create a subscription and the sender a store uses to feed it.
    pub fn channel(path: StorePath) -> (mpsc::UnboundedSender<ValueUpdate>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = Self {
            id: SubscriptionId::next(),
            path,
            receiver: rx,
        };
        (tx, subscription)
    }

    /// The subscription identifier, used to unsubscribe.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The subscribed path.
    pub fn path(&self) -> &StorePath {
        &self.path
    }
}

impl Stream for ValueSubscription {
    type Item = ValueUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// A live location-acquisition subscription.
///
/// Fixes are delivered in order. The stream ends if the location source
/// abandons the subscription.
#[derive(Debug)]
pub struct FixSubscription {
    id: SubscriptionId,
    interval: Duration,
    receiver: mpsc::Receiver<PositionFix>,
}

impl FixSubscription {
    /// Create a subscription and the sender a provider uses to feed it.
    pub fn channel(interval: Duration, buffer: usize) -> (mpsc::Sender<PositionFix>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let subscription = Self {
            id: SubscriptionId::next(),
            interval,
            receiver: rx,
        };
        (tx, subscription)
    }

    /// The subscription identifier.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The interval the subscription was created with.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next fix, or `None` if the source abandoned the subscription.
    pub async fn next_fix(&mut self) -> Option<PositionFix> {
        self.receiver.recv().await
    }
}

impl Stream for FixSubscription {
    type Item = PositionFix;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// A key-path addressable, subscribable document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Subscribe to the value at `path`.
    async fn subscribe(&self, path: &StorePath) -> StoreResult<ValueSubscription>;

    /// Drop a subscription. Unknown identifiers are ignored.
    async fn unsubscribe(&self, id: SubscriptionId);

    /// Overwrite the value at `path`. Writing `null` removes it.
    async fn write(&self, path: &StorePath, value: Value) -> StoreResult<()>;

    /// Read the value at `path` once.
    async fn read(&self, path: &StorePath) -> StoreResult<Option<Value>>;
}

/// A source of position fixes.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Start delivering fixes roughly once per `interval`.
    ///
    /// Delivery is best-effort: the source may skip fixes.
    async fn request_updates(&self, interval: Duration) -> Result<FixSubscription>;

    /// Stop delivering fixes for `subscription`.
    async fn remove_updates(&self, subscription: FixSubscription) -> Result<()>;
}

/// Answers whether location access is currently granted.
pub trait PermissionGate: Send + Sync {
    /// Whether fine-location permission is granted.
    fn location_granted(&self) -> bool;
}

/// A permission gate with a fixed answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticPermission(pub bool);

impl StaticPermission {
    /// Permission granted.
    pub const GRANTED: Self = Self(true);
    /// Permission denied.
    pub const DENIED: Self = Self(false);
}

impl PermissionGate for StaticPermission {
    fn location_granted(&self) -> bool {
        self.0
    }
}

/// Why the reporter asked its host to stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    /// Location permission was not granted.
    PermissionDenied,
    /// The location subscription could not be (re)created or torn down.
    SubscriptionFailed(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "location permission denied"),
            Self::SubscriptionFailed(msg) => write!(f, "location subscription failed: {}", msg),
        }
    }
}

/// The process hosting the reporter.
pub trait HostControl: Send + Sync {
    /// Ask the host to stop the reporter's service.
    fn request_stop(&self, reason: StopReason);
}

/// Wall-clock time source.
pub trait Clock: Send + Sync {
    /// Current time in Unix epoch milliseconds.
    fn now_millis(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
        (nanos / 1_000_000) as i64
    }
}
