//! Viewer-side data operations.
//!
//! Viewers read what reporters write and tune the reporting cadence. These
//! functions cover the data side of that: every one of them goes through a
//! [`RemoteStore`], so they work against the in-memory store as well as a
//! real backend.
//!
//! [`watch_devices`] is the live counterpart of [`list_devices`]: it yields a
//! fresh device map every time a reporter or viewer writes under
//! `dispositivos`.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use fotohora_types::{
    Coordinates, DeviceIdentity, DeviceRecord, HexColor, HistoryEntry, ReportingConfig, StorePath,
};

use crate::error::{Error, Result};
use crate::traits::{RemoteStore, SubscriptionId, ValueSubscription};

/// Value written by [`check_connection`].
pub const CONNECTION_PROBE_VALUE: &str = "Hello";

/// Set the reporting interval every reporter follows.
pub async fn set_reporting_interval(
    store: &dyn RemoteStore,
    interval: Duration,
) -> Result<ReportingConfig> {
    let config = ReportingConfig::from_duration(interval)
        .ok_or_else(|| Error::invalid_config("interval must be at least 1 ms"))?;
    store
        .write(
            &StorePath::config_interval(),
            json!(config.interval_millis()),
        )
        .await?;
    info!("Reporting interval set to {} ms", config.interval_millis());
    Ok(config)
}

/// Every known device and its record, keyed by device identity.
///
/// Entries that cannot be decoded are skipped.
pub async fn list_devices(store: &dyn RemoteStore) -> Result<BTreeMap<String, DeviceRecord>> {
    let devices = store.read(&StorePath::devices()).await?;
    Ok(decode_devices(devices))
}

fn decode_devices(devices: Option<Value>) -> BTreeMap<String, DeviceRecord> {
    let Some(Value::Object(devices)) = devices else {
        return BTreeMap::new();
    };

    let mut records = BTreeMap::new();
    for (id, value) in devices {
        match serde_json::from_value::<DeviceRecord>(value) {
            Ok(record) => {
                records.insert(id, record);
            }
            Err(e) => warn!("Skipping device {}: {}", id, e),
        }
    }
    records
}

/// Follow every device and its record as they change.
///
/// The first item is the current device map. Dropping the watch ends the
/// store subscription; [`DeviceWatch::id`] can also be passed to
/// [`RemoteStore::unsubscribe`].
pub async fn watch_devices(store: &dyn RemoteStore) -> Result<DeviceWatch> {
    let subscription = store.subscribe(&StorePath::devices()).await?;
    debug!("Watching devices as {}", subscription.id());
    Ok(DeviceWatch { subscription })
}

/// Live device map returned by [`watch_devices`].
///
/// Store errors are yielded as items and do not end the stream.
#[derive(Debug)]
pub struct DeviceWatch {
    subscription: ValueSubscription,
}

impl DeviceWatch {
    /// The underlying store subscription.
    pub fn id(&self) -> SubscriptionId {
        self.subscription.id()
    }
}

impl Stream for DeviceWatch {
    type Item = Result<BTreeMap<String, DeviceRecord>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.subscription.poll_next_unpin(cx).map(|update| {
            update.map(|update| update.map(decode_devices).map_err(Error::from))
        })
    }
}

/// The recorded history of `device`, oldest first.
///
/// Keys that are not integer timestamps and values without `lat`/`lng` are
/// skipped.
pub async fn device_history(
    store: &dyn RemoteStore,
    device: &DeviceIdentity,
) -> Result<Vec<HistoryEntry>> {
    let Some(Value::Object(entries)) = store.read(&StorePath::history(device)).await? else {
        return Ok(Vec::new());
    };

    let mut history: Vec<HistoryEntry> = entries
        .into_iter()
        .filter_map(|(key, value)| {
            let entry = parse_history_entry(&key, &value);
            if entry.is_none() {
                debug!("Skipping history entry {}/{}", device, key);
            }
            entry
        })
        .collect();
    history.sort_by_key(|entry| entry.timestamp_millis);
    Ok(history)
}

fn parse_history_entry(key: &str, value: &Value) -> Option<HistoryEntry> {
    let timestamp_millis = key.parse::<i64>().ok()?;
    let lat = value.get("lat")?.as_f64()?;
    let lng = value.get("lng")?.as_f64()?;
    Some(HistoryEntry {
        timestamp_millis,
        position: Coordinates { lat, lng },
    })
}

/// Set the display color of `device`.
pub async fn set_device_color(
    store: &dyn RemoteStore,
    device: &DeviceIdentity,
    color: &str,
) -> Result<HexColor> {
    let color = HexColor::parse(color)?;
    store
        .write(&StorePath::device_color(device), json!(color.as_str()))
        .await?;
    info!("Color of {} set to {}", device, color);
    Ok(color)
}

/// Set the display name of `device`.
pub async fn set_device_name(
    store: &dyn RemoteStore,
    device: &DeviceIdentity,
    name: &str,
) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::invalid_config("device name must not be empty"));
    }
    store
        .write(&StorePath::device_name(device), json!(name))
        .await?;
    info!("Name of {} set to {}", device, name);
    Ok(())
}

/// Write a probe value to check the store accepts writes.
pub async fn check_connection(store: &dyn RemoteStore) -> Result<()> {
    store
        .write(&StorePath::connection_probe(), json!(CONNECTION_PROBE_VALUE))
        .await?;
    info!("Store connection OK");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory::MemoryStore;

    fn dev(id: &str) -> DeviceIdentity {
        DeviceIdentity::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_set_reporting_interval() {
        let store = MemoryStore::new();
        let config = set_reporting_interval(&store, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(config.interval_millis(), 10_000);
        assert_eq!(store.get(&StorePath::config_interval()), Some(json!(10_000)));
    }

    #[tokio::test]
    async fn test_set_reporting_interval_rejects_zero() {
        let store = MemoryStore::new();
        let err = set_reporting_interval(&store, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(store.write_attempts(), 0);
    }

    #[tokio::test]
    async fn test_list_devices() {
        let store = MemoryStore::with_root(json!({
            "dispositivos": {
                "a": {
                    "ultima_ubicacion": {"lat": 1.0, "lng": 2.0, "timestamp": 5},
                    "nombre": "Camión 1",
                    "color": "#ff0000"
                },
                "b": {"nombre": "Solo nombre"},
                "c": "garbage"
            }
        }));

        let devices = list_devices(&store).await.unwrap();
        assert_eq!(devices.len(), 2);
        let a = &devices["a"];
        assert_eq!(a.name.as_deref(), Some("Camión 1"));
        assert_eq!(a.last_known.unwrap().timestamp, 5);
        assert!(devices["b"].last_known.is_none());
    }

    #[tokio::test]
    async fn test_list_devices_empty() {
        let store = MemoryStore::new();
        assert!(list_devices(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_devices_follows_writes() {
        let store = MemoryStore::new();
        let mut watch = watch_devices(&store).await.unwrap();
        assert!(watch.next().await.unwrap().unwrap().is_empty());

        set_device_name(&store, &dev("a"), "Moto").await.unwrap();
        let devices = watch.next().await.unwrap().unwrap();
        assert_eq!(devices["a"].name.as_deref(), Some("Moto"));

        // History lives outside `dispositivos` and does not wake the watch.
        store
            .write(
                &StorePath::history_entry(&dev("a"), 1),
                json!({"lat": 1.0, "lng": 2.0}),
            )
            .await
            .unwrap();
        set_device_color(&store, &dev("b"), "#0000ff").await.unwrap();
        let devices = watch.next().await.unwrap().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices["b"].color.as_deref(), Some("#0000ff"));
    }

    #[tokio::test]
    async fn test_watch_devices_yields_store_errors() {
        let store = MemoryStore::new();
        let mut watch = watch_devices(&store).await.unwrap();
        watch.next().await.unwrap().unwrap();

        store.cancel_subscriptions("permission revoked");
        let err = watch.next().await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Cancelled { .. })));
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_watch_releases_subscription() {
        let store = MemoryStore::new();
        let watch = watch_devices(&store).await.unwrap();
        assert_eq!(store.subscriber_count(), 1);

        drop(watch);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_device_history_sorted_numerically() {
        let store = MemoryStore::with_root(json!({
            "ubicaciones": {
                "dev": {
                    "900": {"lat": 3.0, "lng": 3.0},
                    "10000": {"lat": 4.0, "lng": 4.0},
                    "100": {"lat": 1.0, "lng": 1.0},
                    "abc": {"lat": 9.0, "lng": 9.0},
                    "200": {"lat": 2.0}
                }
            }
        }));

        let history = device_history(&store, &dev("dev")).await.unwrap();
        let keys: Vec<i64> = history.iter().map(|e| e.timestamp_millis).collect();
        assert_eq!(keys, vec![100, 900, 10_000]);
        assert_eq!(history[0].position, Coordinates { lat: 1.0, lng: 1.0 });
    }

    #[tokio::test]
    async fn test_device_history_unknown_device() {
        let store = MemoryStore::new();
        assert!(device_history(&store, &dev("nobody")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_device_color() {
        let store = MemoryStore::new();
        set_device_color(&store, &dev("a"), "#00FF88").await.unwrap();
        assert_eq!(
            store.get(&StorePath::parse("dispositivos/a/color").unwrap()),
            Some(json!("#00ff88"))
        );

        let err = set_device_color(&store, &dev("a"), "green").await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn test_set_device_name() {
        let store = MemoryStore::new();
        set_device_name(&store, &dev("a"), "  Moto  ").await.unwrap();
        assert_eq!(
            store.get(&StorePath::parse("dispositivos/a/nombre").unwrap()),
            Some(json!("Moto"))
        );
        assert!(set_device_name(&store, &dev("a"), "   ").await.is_err());
    }

    #[tokio::test]
    async fn test_name_does_not_clobber_position() {
        let store = MemoryStore::new();
        store
            .write(
                &StorePath::last_known(&dev("a")),
                json!({"lat": 1.0, "lng": 2.0, "timestamp": 3}),
            )
            .await
            .unwrap();
        set_device_name(&store, &dev("a"), "Moto").await.unwrap();

        let devices = list_devices(&store).await.unwrap();
        assert!(devices["a"].last_known.is_some());
    }

    #[tokio::test]
    async fn test_check_connection() {
        let store = MemoryStore::new();
        check_connection(&store).await.unwrap();
        assert_eq!(store.get(&StorePath::connection_probe()), Some(json!("Hello")));

        store.fail_writes_under(StorePath::connection_probe());
        let err = check_connection(&store).await.unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Rejected { .. })));
    }
}
