//! Reporter event system.
//!
//! The reporter publishes what it does on a broadcast channel so hosts can
//! surface status (a foreground notification, a status line, a test probe)
//! without reaching into the reporter task.

use serde::Serialize;
use tokio::sync::broadcast;

use fotohora_types::{Coordinates, DeviceIdentity};

use crate::controller::ReporterState;
use crate::traits::StopReason;

/// Which of the two per-fix records a write targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    /// The append-only history entry.
    History,
    /// The overwritten last known position.
    LastKnown,
}

impl std::fmt::Display for WriteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::History => write!(f, "history"),
            Self::LastKnown => write!(f, "last known position"),
        }
    }
}

/// Events emitted by the reporter.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ReporterEvent {
    /// The controller moved between states.
    StateChanged {
        from: ReporterState,
        to: ReporterState,
    },
    /// A config notification was dropped.
    ConfigIgnored { reason: String },
    /// A fix was handed to the write path.
    FixReported {
        device: DeviceIdentity,
        timestamp_millis: i64,
        position: Coordinates,
    },
    /// A write completed.
    WriteSucceeded { kind: WriteKind, path: String },
    /// A write failed. It will not be retried.
    WriteFailed {
        kind: WriteKind,
        path: String,
        error: String,
    },
    /// The reporter asked its host to stop.
    StopRequested { reason: StopReason },
}

/// Sender for reporter events.
pub type EventSender = broadcast::Sender<ReporterEvent>;

/// Receiver for reporter events.
pub type EventReceiver = broadcast::Receiver<ReporterEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: ReporterEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
