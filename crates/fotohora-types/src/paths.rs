//! Key-path addressing for the remote store.
//!
//! The store is a tree of JSON values addressed by `/`-separated paths. The
//! reporter and viewers agree on this layout:
//!
//! | Path | Content |
//! |------|---------|
//! | `config/intervalo_envio` | reporting interval in milliseconds |
//! | `ubicaciones/{device}/{timestamp}` | `{lat, lng}` history entry |
//! | `dispositivos/{device}/ultima_ubicacion` | `{lat, lng, timestamp}` |
//! | `dispositivos/{device}/nombre` | display name |
//! | `dispositivos/{device}/color` | display color |
//! | `test` | connectivity probe |

use core::fmt;

use crate::error::{ParseError, ParseResult};
use crate::types::{DeviceIdentity, is_forbidden_key_char};

/// Path of the reporting interval value.
pub const CONFIG_INTERVAL: &str = "config/intervalo_envio";
/// Root of per-device history.
pub const HISTORY_ROOT: &str = "ubicaciones";
/// Root of per-device records.
pub const DEVICES_ROOT: &str = "dispositivos";
/// Key of the last known position under a device record.
pub const LAST_KNOWN_KEY: &str = "ultima_ubicacion";
/// Key of the display name under a device record.
pub const NAME_KEY: &str = "nombre";
/// Key of the display color under a device record.
pub const COLOR_KEY: &str = "color";
/// Path written by the connectivity probe.
pub const CONNECTION_PROBE: &str = "test";

/// A validated, normalized store path (no leading or trailing `/`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorePath(String);

impl StorePath {
    /// Parse and validate a path.
    ///
    /// Leading and trailing slashes are stripped. Every segment must be
    /// non-empty and free of characters the store forbids in keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use fotohora_types::StorePath;
    ///
    /// let path = StorePath::parse("/config/intervalo_envio/").unwrap();
    /// assert_eq!(path.as_str(), "config/intervalo_envio");
    /// assert!(StorePath::parse("a//b").is_err());
    /// assert!(StorePath::parse("a/b.c").is_err());
    /// ```
    pub fn parse(path: &str) -> ParseResult<Self> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(ParseError::invalid_path(path, "path is empty"));
        }
        for segment in trimmed.split('/') {
            validate_segment(path, segment)?;
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Append a single key segment.
    pub fn child(&self, segment: &str) -> ParseResult<Self> {
        validate_segment(segment, segment)?;
        Ok(Self(format!("{}/{}", self.0, segment)))
    }

    /// The path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Whether `self` equals `other` or lies underneath it.
    #[must_use]
    pub fn starts_with(&self, other: &StorePath) -> bool {
        self.0 == other.0
            || (self.0.starts_with(&other.0) && self.0.as_bytes().get(other.0.len()) == Some(&b'/'))
    }

    /// `config/intervalo_envio`.
    #[must_use]
    pub fn config_interval() -> Self {
        Self(CONFIG_INTERVAL.to_string())
    }

    /// `ubicaciones/{device}`.
    #[must_use]
    pub fn history(device: &DeviceIdentity) -> Self {
        Self(format!("{HISTORY_ROOT}/{device}"))
    }

    /// `ubicaciones/{device}/{timestamp}`.
    #[must_use]
    pub fn history_entry(device: &DeviceIdentity, timestamp_millis: i64) -> Self {
        Self(format!("{HISTORY_ROOT}/{device}/{timestamp_millis}"))
    }

    /// `dispositivos`.
    #[must_use]
    pub fn devices() -> Self {
        Self(DEVICES_ROOT.to_string())
    }

    /// `dispositivos/{device}`.
    #[must_use]
    pub fn device(device: &DeviceIdentity) -> Self {
        Self(format!("{DEVICES_ROOT}/{device}"))
    }

    /// `dispositivos/{device}/ultima_ubicacion`.
    #[must_use]
    pub fn last_known(device: &DeviceIdentity) -> Self {
        Self(format!("{DEVICES_ROOT}/{device}/{LAST_KNOWN_KEY}"))
    }

    /// `dispositivos/{device}/nombre`.
    #[must_use]
    pub fn device_name(device: &DeviceIdentity) -> Self {
        Self(format!("{DEVICES_ROOT}/{device}/{NAME_KEY}"))
    }

    /// `dispositivos/{device}/color`.
    #[must_use]
    pub fn device_color(device: &DeviceIdentity) -> Self {
        Self(format!("{DEVICES_ROOT}/{device}/{COLOR_KEY}"))
    }

    /// `test`.
    #[must_use]
    pub fn connection_probe() -> Self {
        Self(CONNECTION_PROBE.to_string())
    }
}

fn validate_segment(path: &str, segment: &str) -> ParseResult<()> {
    if segment.is_empty() {
        return Err(ParseError::invalid_path(path, "empty segment"));
    }
    if let Some(c) = segment.chars().find(|&c| is_forbidden_key_char(c)) {
        return Err(ParseError::invalid_path(
            path,
            format!("segment '{segment}' contains forbidden character {c:?}"),
        ));
    }
    Ok(())
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
