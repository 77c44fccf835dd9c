//! Core types for reported positions and device records.

use core::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Identity used when no platform identifier can be resolved.
pub const UNKNOWN_DEVICE: &str = "unknown_device";

/// Reporting interval used until the remote configuration says otherwise.
pub const DEFAULT_INTERVAL_MILLIS: u64 = 30_000;

/// Stable identifier of a reporting device.
///
/// The identity is the partition key for every remote write, so it is always
/// a valid single store-key segment: characters the store forbids in keys
/// (`.`, `$`, `#`, `[`, `]`, `/`) and control characters are replaced by `_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Build an identity from a raw platform identifier.
    ///
    /// Returns `None` when the identifier is empty after trimming.
    ///
    /// # Examples
    ///
    /// ```
    /// use fotohora_types::DeviceIdentity;
    ///
    /// let id = DeviceIdentity::new("  laptop.local ").unwrap();
    /// assert_eq!(id.as_str(), "laptop_local");
    /// assert!(DeviceIdentity::new("   ").is_none());
    /// ```
    #[must_use]
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let sanitized: String = trimmed
            .chars()
            .map(|c| if is_forbidden_key_char(c) { '_' } else { c })
            .collect();
        Some(Self(sanitized))
    }

    /// Resolve an identity from candidate sources in priority order.
    ///
    /// The first candidate that yields a non-empty identity wins; if none does,
    /// the identity is [`UNKNOWN_DEVICE`].
    ///
    /// # Examples
    ///
    /// ```
    /// use fotohora_types::{DeviceIdentity, UNKNOWN_DEVICE};
    ///
    /// let id = DeviceIdentity::resolve([None, Some("".to_string()), Some("abc".to_string())]);
    /// assert_eq!(id.as_str(), "abc");
    ///
    /// let id = DeviceIdentity::resolve([None::<String>]);
    /// assert_eq!(id.as_str(), UNKNOWN_DEVICE);
    /// ```
    pub fn resolve<I>(candidates: I) -> Self
    where
        I: IntoIterator<Item = Option<String>>,
    {
        candidates
            .into_iter()
            .flatten()
            .find_map(|raw| Self::new(&raw))
            .unwrap_or_else(Self::unknown)
    }

    /// The fallback identity.
    #[must_use]
    pub fn unknown() -> Self {
        Self(UNKNOWN_DEVICE.to_string())
    }

    /// Whether this is the fallback identity.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_DEVICE
    }

    /// The identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub(crate) fn is_forbidden_key_char(c: char) -> bool {
    matches!(c, '.' | '$' | '#' | '[' | ']' | '/') || c.is_control()
}

/// A latitude/longitude pair as stored remotely.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Coordinates {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

impl Coordinates {
    /// Create a coordinate pair, rejecting out-of-range or non-finite values.
    pub fn new(lat: f64, lng: f64) -> ParseResult<Self> {
        let coords = Self { lat, lng };
        if coords.is_valid() {
            Ok(coords)
        } else {
            Err(ParseError::InvalidValue(format!(
                "coordinates out of range: lat={lat}, lng={lng}"
            )))
        }
    }

    /// Whether latitude is in [-90, 90] and longitude in [-180, 180].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// One location reading delivered by the platform location source.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PositionFix {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// When the source captured the fix (Unix epoch milliseconds).
    pub captured_at_millis: i64,
}

impl PositionFix {
    /// Create a new fix.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, captured_at_millis: i64) -> Self {
        Self {
            latitude,
            longitude,
            captured_at_millis,
        }
    }

    /// The fix position as stored coordinates.
    #[must_use]
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            lat: self.latitude,
            lng: self.longitude,
        }
    }
}

/// The live-tunable reporting cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReportingConfig {
    interval_millis: u64,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            interval_millis: DEFAULT_INTERVAL_MILLIS,
        }
    }
}

impl ReportingConfig {
    /// Build a config from a millisecond value; non-positive values are rejected.
    ///
    /// # Examples
    ///
    /// ```
    /// use fotohora_types::ReportingConfig;
    ///
    /// assert_eq!(ReportingConfig::from_millis(5000).unwrap().interval_millis(), 5000);
    /// assert!(ReportingConfig::from_millis(0).is_none());
    /// assert!(ReportingConfig::from_millis(-1).is_none());
    /// ```
    #[must_use]
    pub fn from_millis(millis: i64) -> Option<Self> {
        u64::try_from(millis)
            .ok()
            .filter(|&m| m > 0)
            .map(|interval_millis| Self { interval_millis })
    }

    /// Build a config from a duration; zero and sub-millisecond durations are rejected.
    #[must_use]
    pub fn from_duration(interval: Duration) -> Option<Self> {
        u64::try_from(interval.as_millis())
            .ok()
            .filter(|&m| m > 0)
            .map(|interval_millis| Self { interval_millis })
    }

    /// The interval in milliseconds.
    #[must_use]
    pub fn interval_millis(&self) -> u64 {
        self.interval_millis
    }

    /// The interval as a duration.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_millis)
    }
}

/// An append-only history record, stored at `ubicaciones/{device}/{timestamp}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry {
    /// Record key (Unix epoch milliseconds).
    pub timestamp_millis: i64,
    /// Recorded position; this is the stored value.
    pub position: Coordinates,
}

/// The overwritten per-device latest position, stored at
/// `dispositivos/{device}/ultima_ubicacion`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LastKnownPosition {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// When the position was reported (Unix epoch milliseconds).
    pub timestamp: i64,
}

impl LastKnownPosition {
    /// Build the record for a position reported at `timestamp`.
    #[must_use]
    pub fn new(position: Coordinates, timestamp: i64) -> Self {
        Self {
            lat: position.lat,
            lng: position.lng,
            timestamp,
        }
    }

    /// The position part of the record.
    #[must_use]
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

/// Viewer-side view of `dispositivos/{device}`.
///
/// Only the last known position is written by the reporter; the display name
/// and color are set by viewers.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceRecord {
    /// Latest reported position.
    #[cfg_attr(
        feature = "serde",
        serde(rename = "ultima_ubicacion", default, skip_serializing_if = "Option::is_none")
    )]
    pub last_known: Option<LastKnownPosition>,
    /// Display name chosen by a viewer.
    #[cfg_attr(
        feature = "serde",
        serde(rename = "nombre", default, skip_serializing_if = "Option::is_none")
    )]
    pub name: Option<String>,
    /// Display color chosen by a viewer.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub color: Option<String>,
}

impl DeviceRecord {
    /// Name to show for the device, falling back to its identity.
    #[must_use]
    pub fn display_name<'a>(&'a self, id: &'a DeviceIdentity) -> &'a str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(id.as_str())
    }
}

/// A `#rrggbb` display color, normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HexColor(String);

impl HexColor {
    /// Parse a `#rrggbb` color.
    ///
    /// # Examples
    ///
    /// ```
    /// use fotohora_types::HexColor;
    ///
    /// assert_eq!(HexColor::parse("#FF8800").unwrap().as_str(), "#ff8800");
    /// assert!(HexColor::parse("red").is_err());
    /// ```
    pub fn parse(raw: &str) -> ParseResult<Self> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix('#')
            .ok_or_else(|| ParseError::InvalidColor(raw.to_string()))?;
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseError::InvalidColor(raw.to_string()));
        }
        Ok(Self(format!("#{}", digits.to_ascii_lowercase())))
    }

    /// The color as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_sanitizes_forbidden_chars() {
        let id = DeviceIdentity::new("a.b$c#d[e]f/g").unwrap();
        assert_eq!(id.as_str(), "a_b_c_d_e_f_g");
    }

    #[test]
    fn test_identity_control_chars() {
        let id = DeviceIdentity::new("dev\u{7}ice").unwrap();
        assert_eq!(id.as_str(), "dev_ice");
    }

    #[test]
    fn test_identity_resolve_priority() {
        let id = DeviceIdentity::resolve([
            Some("configured".to_string()),
            Some("platform".to_string()),
        ]);
        assert_eq!(id.as_str(), "configured");
    }

    #[test]
    fn test_identity_resolve_falls_back_to_unknown() {
        let id = DeviceIdentity::resolve([None, Some("  ".to_string())]);
        assert!(id.is_unknown());
        assert_eq!(id.to_string(), UNKNOWN_DEVICE);
    }

    #[test]
    fn test_reporting_config_default() {
        let config = ReportingConfig::default();
        assert_eq!(config.interval_millis(), 30_000);
        assert_eq!(config.interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_reporting_config_from_duration() {
        assert_eq!(
            ReportingConfig::from_duration(Duration::from_secs(5)),
            ReportingConfig::from_millis(5000)
        );
        assert!(ReportingConfig::from_duration(Duration::from_micros(10)).is_none());
        assert!(ReportingConfig::from_duration(Duration::ZERO).is_none());
    }

    #[test]
    fn test_coordinates_validation() {
        assert!(Coordinates::new(4.0, -74.0).is_ok());
        assert!(Coordinates::new(91.0, 0.0).is_err());
        assert!(Coordinates::new(0.0, -180.5).is_err());
        assert!(Coordinates::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_last_known_serialization() {
        let record = LastKnownPosition::new(Coordinates { lat: 4.0, lng: -74.0 }, 1234);
        let json = serde_json::to_value(record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"lat": 4.0, "lng": -74.0, "timestamp": 1234})
        );
    }

    #[test]
    fn test_device_record_uses_store_field_names() {
        let json = serde_json::json!({
            "ultima_ubicacion": {"lat": 1.5, "lng": 2.5, "timestamp": 99},
            "nombre": "Moto",
            "color": "#00ff00"
        });
        let record: DeviceRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.last_known.unwrap().timestamp, 99);
        assert_eq!(record.name.as_deref(), Some("Moto"));
        assert_eq!(record.color.as_deref(), Some("#00ff00"));
    }

    #[test]
    fn test_device_record_display_name() {
        let id = DeviceIdentity::new("abc").unwrap();
        let mut record = DeviceRecord::default();
        assert_eq!(record.display_name(&id), "abc");
        record.name = Some("Truck 4".to_string());
        assert_eq!(record.display_name(&id), "Truck 4");
    }

    #[test]
    fn test_hex_color_rejects_short() {
        assert!(HexColor::parse("#fff").is_err());
        assert!(HexColor::parse("#ggghhh").is_err());
    }
}
