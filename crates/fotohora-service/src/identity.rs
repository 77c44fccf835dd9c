//! Device identity resolution.

use fotohora_types::DeviceIdentity;
use tracing::{info, warn};

/// The platform identifier for this machine: its host name.
pub fn platform_id() -> Option<String> {
    match hostname::get() {
        Ok(name) => Some(name.to_string_lossy().into_owned()),
        Err(e) => {
            warn!("Failed to read host name: {}", e);
            None
        }
    }
}

/// Resolve the identity this process reports under.
///
/// The configured id wins; otherwise the host name is used; otherwise the
/// device reports as `unknown_device`.
pub fn resolve(configured: Option<&str>) -> DeviceIdentity {
    resolve_from(configured, platform_id())
}

fn resolve_from(configured: Option<&str>, platform: Option<String>) -> DeviceIdentity {
    let device = DeviceIdentity::resolve([configured.map(str::to_string), platform]);
    if device.is_unknown() {
        warn!("No usable device identifier, reporting as {}", device);
    } else {
        info!("Device identity: {}", device);
    }
    device
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_id_wins() {
        let device = resolve_from(Some("truck-7"), Some("laptop".to_string()));
        assert_eq!(device.as_str(), "truck-7");
    }

    #[test]
    fn test_falls_back_to_platform_id() {
        let device = resolve_from(None, Some("laptop.local".to_string()));
        assert_eq!(device.as_str(), "laptop_local");

        let device = resolve_from(Some("   "), Some("laptop".to_string()));
        assert_eq!(device.as_str(), "laptop");
    }

    #[test]
    fn test_unknown_when_nothing_usable() {
        assert!(resolve_from(None, None).is_unknown());
        assert!(resolve_from(Some(""), Some(String::new())).is_unknown());
    }
}
