//! Cadence-controlled location reporter.
//!
//! This crate runs the reporting side of a live-location system: it acquires
//! position fixes at an interval that is tuned remotely, and writes each fix
//! to a realtime document store as both a history entry and the device's
//! last known position.
//!
//! # Features
//!
//! - **Remote cadence**: the interval at `config/intervalo_envio` is watched
//!   and the location subscription is replaced whenever it changes
//! - **Single subscription**: at most one location subscription is live, even
//!   across restarts
//! - **Latest wins**: bursts of interval changes collapse to the last value
//! - **Fire-and-forget writes**: failed writes are logged and never retried
//! - **Pluggable backends**: [`RemoteStore`] and [`LocationProvider`] are
//!   traits; an in-memory store, a simulated location source and mocks ship
//!   with the crate
//! - **Firebase**: the `firebase` feature adds a Realtime Database REST client
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use fotohora_core::{MemoryStore, Reporter, SimulatedLocationProvider};
//! use fotohora_types::{Coordinates, DeviceIdentity};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryStore::new());
//!     let provider = Arc::new(SimulatedLocationProvider::new(
//!         Coordinates { lat: 4.7110, lng: -74.0721 },
//!         25.0,
//!     ));
//!
//!     let handle = Reporter::builder(store, provider)
//!         .device(DeviceIdentity::resolve([None, Some("my-host".to_string())]))
//!         .build()
//!         .spawn();
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     println!("reporter exited: {}", handle.stop().await);
//! }
//! ```

pub mod controller;
pub mod error;
pub mod events;
#[cfg(feature = "firebase")]
pub mod firebase;
pub mod memory;
pub mod mock;
pub mod reporter;
pub mod simulated;
pub mod sse;
pub mod traits;
pub mod viewer;
pub mod writer;

mod tree;

// Re-export types from fotohora-types
pub use fotohora_types::types;

// Core exports
pub use controller::{CadenceController, ConfigOutcome, ReporterState};
pub use error::{Error, Result, StoreError, StoreResult};
pub use events::{EventDispatcher, EventReceiver, EventSender, ReporterEvent, WriteKind};
pub use reporter::{Reporter, ReporterBuilder, ReporterExit, ReporterHandle, ReporterOptions};
pub use traits::{
    Clock, FixSubscription, HostControl, LocationProvider, PermissionGate, RemoteStore,
    StaticPermission, StopReason, SubscriptionId, SystemClock, ValueSubscription, ValueUpdate,
};
pub use viewer::DeviceWatch;
pub use writer::{PositionWriter, TimestampSource, WriteOutcome, WriteTasks};

// Backends
#[cfg(feature = "firebase")]
pub use firebase::FirebaseStore;
pub use memory::MemoryStore;
pub use mock::{ManualClock, MockFailure, MockLocationProvider, RecordingHost};
pub use simulated::SimulatedLocationProvider;

// Re-export from fotohora-types
pub use fotohora_types::{
    Coordinates, DeviceIdentity, DeviceRecord, HexColor, HistoryEntry, LastKnownPosition,
    PositionFix, ReportingConfig, StorePath,
};
