//! Location reporter service and viewer CLI for Fotohora.
//!
//! This crate hosts the reporter as a long-running process:
//! - Resolves the device identity (configured id, then host name)
//! - Opens the configured store (Firebase Realtime Database or in-memory)
//! - Runs the reporter against a simulated location source
//! - Restarts the reporter after subscription failures
//!
//! It also exposes the viewer operations as subcommands: setting the
//! reporting interval, listing devices, printing history, naming and
//! coloring devices, and probing the store connection.
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/fotohora/reporter.toml`:
//!
//! ```toml
//! [device]
//! id = "truck-7"
//!
//! [reporter]
//! default_interval_ms = 30000
//! timestamp_source = "write"
//! restart_on_failure = true
//! restart_delay_secs = 5
//!
//! [store]
//! backend = "firebase"
//! url = "https://demo-default-rtdb.firebaseio.com"
//! timeout_secs = 10
//!
//! [simulation]
//! origin_lat = 4.7110
//! origin_lng = -74.0721
//! step_meters = 25.0
//! ```

pub mod config;
pub mod display;
pub mod identity;
pub mod supervisor;

pub use config::{
    Config, ConfigError, DeviceConfig, ReporterConfig, SimulationConfig, StoreBackend,
    StoreConfig, ValidationError, default_config_path,
};
pub use supervisor::{ServiceHost, Supervisor};
