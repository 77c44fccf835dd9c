//! The position write path.
//!
//! Every fix becomes two independent writes:
//!
//! - a history entry at `ubicaciones/{device}/{timestamp}` = `{lat, lng}`
//! - the last known position at `dispositivos/{device}/ultima_ubicacion` =
//!   `{lat, lng, timestamp}`
//!
//! Both are spawned and left to finish on their own. Their outcome is logged
//! and published as an event; nothing waits on them, nothing retries them,
//! and one failing has no effect on the other.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use fotohora_types::{DeviceIdentity, PositionFix, StorePath};

use crate::events::{EventDispatcher, ReporterEvent, WriteKind};
use crate::traits::{Clock, RemoteStore};

/// Which timestamp a report is keyed by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    /// Wall-clock time when the fix is written.
    #[default]
    Write,
    /// The capture time reported by the location source.
    Fix,
}

/// Handles to the two writes spawned for one fix.
#[derive(Debug)]
pub struct WriteTasks {
    /// Timestamp the fix was reported under.
    pub timestamp_millis: i64,
    history: JoinHandle<bool>,
    last_known: JoinHandle<bool>,
}

/// Outcome of the two writes for one fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Whether the history entry was stored.
    pub history: bool,
    /// Whether the last known position was stored.
    pub last_known: bool,
}

impl WriteTasks {
    /// Wait for both writes to finish.
    ///
    /// The reporter never calls this; it exists for callers that need to
    /// observe completion, such as tests and orderly shutdown.
    pub async fn join(self) -> WriteOutcome {
        let history = self.history.await.unwrap_or(false);
        let last_known = self.last_known.await.unwrap_or(false);
        WriteOutcome {
            history,
            last_known,
        }
    }
}

/// Composes and issues the per-fix writes for one device.
#[derive(Clone)]
pub struct PositionWriter {
    store: Arc<dyn RemoteStore>,
    device: DeviceIdentity,
    clock: Arc<dyn Clock>,
    timestamp_source: TimestampSource,
    events: EventDispatcher,
}

impl std::fmt::Debug for PositionWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionWriter")
            .field("device", &self.device)
            .field("timestamp_source", &self.timestamp_source)
            .finish()
    }
}

impl PositionWriter {
    /// Create a writer for `device`.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        device: DeviceIdentity,
        clock: Arc<dyn Clock>,
        timestamp_source: TimestampSource,
        events: EventDispatcher,
    ) -> Self {
        Self {
            store,
            device,
            clock,
            timestamp_source,
            events,
        }
    }

    /// The device this writer reports for.
    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    /// Report a fix. Must be called from within a Tokio runtime.
    ///
    /// Returns immediately; both writes run in the background.
    pub fn report(&self, fix: PositionFix) -> WriteTasks {
        let timestamp = match self.timestamp_source {
            TimestampSource::Write => self.clock.now_millis(),
            TimestampSource::Fix => fix.captured_at_millis,
        };
        let position = fix.coordinates();

        debug!(
            "Sending location: device={}, lat={}, lng={}",
            self.device, position.lat, position.lng
        );
        self.events.send(ReporterEvent::FixReported {
            device: self.device.clone(),
            timestamp_millis: timestamp,
            position,
        });

        let history = self.spawn_write(
            WriteKind::History,
            StorePath::history_entry(&self.device, timestamp),
            json!({ "lat": position.lat, "lng": position.lng }),
        );
        let last_known = self.spawn_write(
            WriteKind::LastKnown,
            StorePath::last_known(&self.device),
            json!({ "lat": position.lat, "lng": position.lng, "timestamp": timestamp }),
        );

        WriteTasks {
            timestamp_millis: timestamp,
            history,
            last_known,
        }
    }

    fn spawn_write(&self, kind: WriteKind, path: StorePath, value: Value) -> JoinHandle<bool> {
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        tokio::spawn(async move {
            match store.write(&path, value).await {
                Ok(()) => {
                    debug!("Saved {} at {}", kind, path);
                    events.send(ReporterEvent::WriteSucceeded {
                        kind,
                        path: path.to_string(),
                    });
                    true
                }
                Err(e) => {
                    error!("Error saving {} at {}: {}", kind, path, e);
                    events.send(ReporterEvent::WriteFailed {
                        kind,
                        path: path.to_string(),
                        error: e.to_string(),
                    });
                    false
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::mock::ManualClock;

    fn writer(store: &Arc<MemoryStore>, source: TimestampSource) -> PositionWriter {
        PositionWriter::new(
            store.clone(),
            DeviceIdentity::new("dev1").unwrap(),
            Arc::new(ManualClock::new(1_700_000_000_000)),
            source,
            EventDispatcher::default(),
        )
    }

    #[tokio::test]
    async fn test_report_writes_both_records() {
        let store = Arc::new(MemoryStore::new());
        let outcome = writer(&store, TimestampSource::Write)
            .report(PositionFix::new(4.0, -74.0, 5))
            .join()
            .await;

        assert!(outcome.history && outcome.last_known);
        assert_eq!(
            store.get(&StorePath::parse("ubicaciones/dev1/1700000000000").unwrap()),
            Some(json!({"lat": 4.0, "lng": -74.0}))
        );
        assert_eq!(
            store.get(&StorePath::parse("dispositivos/dev1/ultima_ubicacion").unwrap()),
            Some(json!({"lat": 4.0, "lng": -74.0, "timestamp": 1_700_000_000_000i64}))
        );
    }

    #[tokio::test]
    async fn test_fix_timestamp_source() {
        let store = Arc::new(MemoryStore::new());
        let tasks = writer(&store, TimestampSource::Fix).report(PositionFix::new(1.0, 2.0, 42));
        assert_eq!(tasks.timestamp_millis, 42);
        tasks.join().await;

        assert!(
            store
                .get(&StorePath::parse("ubicaciones/dev1/42").unwrap())
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_last_known_failure_does_not_block_history() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes_under(StorePath::parse("dispositivos").unwrap());

        let outcome = writer(&store, TimestampSource::Write)
            .report(PositionFix::new(4.0, -74.0, 0))
            .join()
            .await;

        assert!(outcome.history);
        assert!(!outcome.last_known);
        assert_eq!(store.write_attempts(), 2);
    }

    #[tokio::test]
    async fn test_history_failure_does_not_block_last_known() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes_under(StorePath::parse("ubicaciones").unwrap());

        let outcome = writer(&store, TimestampSource::Write)
            .report(PositionFix::new(4.0, -74.0, 0))
            .join()
            .await;

        assert!(!outcome.history);
        assert!(outcome.last_known);
        assert_eq!(store.write_attempts(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_emits_event() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes_under(StorePath::parse("ubicaciones").unwrap());
        let w = writer(&store, TimestampSource::Write);
        let mut events = w.events.subscribe();

        w.report(PositionFix::new(4.0, -74.0, 0)).join().await;

        let mut failed = 0;
        while let Ok(event) = events.try_recv() {
            if let ReporterEvent::WriteFailed { kind, .. } = event {
                assert_eq!(kind, WriteKind::History);
                failed += 1;
            }
        }
        assert_eq!(failed, 1);
    }
}
