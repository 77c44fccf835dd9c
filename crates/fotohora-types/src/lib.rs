//! Platform-agnostic data model for the Fotohora location reporter.
//!
//! This crate holds the values that travel between a reporting device and
//! the remote realtime store, independent of any runtime or transport:
//!
//! - [`PositionFix`] and [`Coordinates`] produced by a location source
//! - [`DeviceIdentity`], the partition key for every remote write
//! - [`ReportingConfig`], the live-tunable reporting cadence
//! - [`HistoryEntry`], [`LastKnownPosition`] and [`DeviceRecord`] as stored
//! - [`StorePath`], the key-path addressing used by the store
//!
//! # Example
//!
//! ```
//! use fotohora_types::{DeviceIdentity, StorePath};
//!
//! let device = DeviceIdentity::resolve([Some("a1b2c3d4".to_string())]);
//! let path = StorePath::history_entry(&device, 1_700_000_000_000);
//! assert_eq!(path.as_str(), "ubicaciones/a1b2c3d4/1700000000000");
//! ```

pub mod error;
pub mod paths;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use paths::StorePath;
pub use types::{
    Coordinates, DEFAULT_INTERVAL_MILLIS, DeviceIdentity, DeviceRecord, HexColor, HistoryEntry,
    LastKnownPosition, PositionFix, ReportingConfig, UNKNOWN_DEVICE,
};
