//! Plain-text rendering for the viewer subcommands.

use std::collections::BTreeMap;
use std::fmt::Write;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use fotohora_types::{DeviceIdentity, DeviceRecord, HistoryEntry};

/// Format Unix epoch milliseconds as RFC 3339, or the raw number if out of range.
pub fn format_timestamp(millis: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| millis.to_string())
}

/// One line per device: id, display name, color and last known position.
pub fn format_devices(devices: &BTreeMap<String, DeviceRecord>) -> String {
    if devices.is_empty() {
        return "No devices have reported yet\n".to_string();
    }

    let mut out = String::new();
    for (id, record) in devices {
        let name = DeviceIdentity::new(id)
            .map(|device| record.display_name(&device).to_string())
            .unwrap_or_else(|| id.clone());
        let color = record.color.as_deref().unwrap_or("-");
        let position = match &record.last_known {
            Some(last) => format!(
                "{:.6}, {:.6} at {}",
                last.lat,
                last.lng,
                format_timestamp(last.timestamp)
            ),
            None => "no position".to_string(),
        };
        let _ = writeln!(out, "{:<24} {:<20} {:<8} {}", id, name, color, position);
    }
    out
}

/// One line per history entry, oldest first.
pub fn format_history(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "No history\n".to_string();
    }

    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(
            out,
            "{}  {:.6}, {:.6}",
            format_timestamp(entry.timestamp_millis),
            entry.position.lat,
            entry.position.lng
        );
    }
    out
}
