//! The cadence controller.
//!
//! [`CadenceController`] owns the single location-acquisition subscription and
//! keeps its interval in step with the latest [`ReportingConfig`]:
//!
//! ```text
//!  Stopped ──start──▶ Starting ──created──▶ Active(i) ──stop──▶ Stopped
//!                        │                   │    ▲
//!                        │ denied/failed     │    │ created
//!                        ▼           new j≠i ▼    │
//!                     Stopped            Restarting(i→j) ──failed──▶ Stopped
//! ```
//!
//! A restart removes the old subscription before requesting the new one, so
//! two subscriptions are never live at once. The controller takes `&mut self`
//! for every transition; a single owner drives it and no transition can
//! interleave with another.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fotohora_types::{PositionFix, ReportingConfig};

use crate::error::{Error, Result};
use crate::events::{EventDispatcher, ReporterEvent};
use crate::traits::{FixSubscription, LocationProvider, PermissionGate};

/// Lifecycle state of the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReporterState {
    /// No acquisition subscription.
    Stopped,
    /// Permission check and first subscription in progress.
    Starting,
    /// One subscription is live at `interval`.
    Active { interval: Duration },
    /// Replacing the subscription at `from` with one at `to`.
    Restarting { from: Duration, to: Duration },
}

impl ReporterState {
    /// Whether a subscription is live.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// The live interval, if any.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Active { interval } => Some(*interval),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReporterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Active { interval } => write!(f, "active ({} ms)", interval.as_millis()),
            Self::Restarting { from, to } => {
                write!(f, "restarting ({} ms -> {} ms)", from.as_millis(), to.as_millis())
            }
        }
    }
}

/// What a config notification did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOutcome {
    /// The value was missing or not a positive integer.
    Ignored,
    /// The value equals the current interval.
    Unchanged,
    /// No subscription is live; the value was cached for the next start.
    Cached { interval: Duration },
    /// The subscription was replaced.
    Restarted { from: Duration, to: Duration },
}

/// Extract a reporting interval from a raw store value.
///
/// Accepts positive integers, including integral floats such as `5000.0`.
/// Anything else (strings, booleans, objects, fractions, non-positive
/// numbers) yields `None`.
///
/// # Examples
///
/// ```
/// use fotohora_core::controller::interval_from_value;
/// use serde_json::json;
///
/// assert_eq!(interval_from_value(&json!(5000)).unwrap().interval_millis(), 5000);
/// assert!(interval_from_value(&json!(-1)).is_none());
/// assert!(interval_from_value(&json!("5000")).is_none());
/// ```
pub fn interval_from_value(value: &Value) -> Option<ReportingConfig> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(millis) = number.as_i64() {
        return ReportingConfig::from_millis(millis);
    }
    if let Some(millis) = number.as_u64() {
        return ReportingConfig::from_millis(i64::try_from(millis).ok()?);
    }
    let float = number.as_f64()?;
    if float.is_finite() && float.fract() == 0.0 && float > 0.0 && float <= i64::MAX as f64 {
        ReportingConfig::from_millis(float as i64)
    } else {
        None
    }
}

/// Owner of the location-acquisition subscription.
pub struct CadenceController {
    provider: Arc<dyn LocationProvider>,
    config: ReportingConfig,
    state: ReporterState,
    subscription: Option<FixSubscription>,
    state_tx: watch::Sender<ReporterState>,
    events: EventDispatcher,
}

impl std::fmt::Debug for CadenceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CadenceController")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("subscription", &self.subscription.as_ref().map(|s| s.id()))
            .finish()
    }
}

impl CadenceController {
    /// Create a stopped controller seeded with `config`.
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        config: ReportingConfig,
        events: EventDispatcher,
    ) -> Self {
        let (state_tx, _) = watch::channel(ReporterState::Stopped);
        Self::with_state_sender(provider, config, events, state_tx)
    }

    /// Create a stopped controller that publishes its state on `state_tx`.
    pub fn with_state_sender(
        provider: Arc<dyn LocationProvider>,
        config: ReportingConfig,
        events: EventDispatcher,
        state_tx: watch::Sender<ReporterState>,
    ) -> Self {
        state_tx.send_replace(ReporterState::Stopped);
        Self {
            provider,
            config,
            state: ReporterState::Stopped,
            subscription: None,
            state_tx,
            events,
        }
    }

    /// Current state.
    pub fn state(&self) -> ReporterState {
        self.state
    }

    /// Cached reporting config (the live interval while active).
    pub fn config(&self) -> ReportingConfig {
        self.config
    }

    /// Whether an acquisition subscription is held.
    pub fn has_subscription(&self) -> bool {
        self.subscription.is_some()
    }

    /// Watch state changes.
    pub fn watch(&self) -> watch::Receiver<ReporterState> {
        self.state_tx.subscribe()
    }

    fn set_state(&mut self, to: ReporterState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!("Reporter state: {} -> {}", from, to);
        self.state_tx.send_replace(to);
        self.events.send(ReporterEvent::StateChanged { from, to });
    }

    /// Start acquiring fixes at the cached interval.
    ///
    /// Starting an already running controller is a no-op. If permission is
    /// missing no subscription is requested and the controller stays stopped.
    pub async fn start(&mut self, permission: &dyn PermissionGate) -> Result<Duration> {
        if let ReporterState::Active { interval } = self.state {
            return Ok(interval);
        }

        self.set_state(ReporterState::Starting);

        if !permission.location_granted() {
            error!("Location permission not granted, not starting");
            self.set_state(ReporterState::Stopped);
            return Err(Error::PermissionDenied);
        }

        let interval = self.config.interval();
        match self.provider.request_updates(interval).await {
            Ok(subscription) => {
                info!(
                    "Location updates started with interval: {} ms",
                    interval.as_millis()
                );
                self.subscription = Some(subscription);
                self.set_state(ReporterState::Active { interval });
                Ok(interval)
            }
            Err(e) => {
                error!("Failed to start location updates: {}", e);
                self.set_state(ReporterState::Stopped);
                Err(e)
            }
        }
    }

    /// Handle a raw config notification.
    ///
    /// Missing values and values that are not positive integers are ignored
    /// and the current interval is kept.
    pub async fn handle_config_update(&mut self, value: Option<&Value>) -> Result<ConfigOutcome> {
        match accept_config_update(value, &self.events) {
            Some(config) => self.apply_config(config).await,
            None => Ok(ConfigOutcome::Ignored),
        }
    }

    /// Converge on `config`, restarting the subscription if the interval changed.
    ///
    /// On failure the controller is left stopped with no subscription.
    pub async fn apply_config(&mut self, config: ReportingConfig) -> Result<ConfigOutcome> {
        if config == self.config {
            return Ok(ConfigOutcome::Unchanged);
        }

        let ReporterState::Active { interval: from } = self.state else {
            self.config = config;
            debug!(
                "Cached interval {} ms while {}",
                config.interval_millis(),
                self.state
            );
            return Ok(ConfigOutcome::Cached {
                interval: config.interval(),
            });
        };

        let to = config.interval();
        self.set_state(ReporterState::Restarting { from, to });
        self.config = config;

        if let Some(old) = self.subscription.take()
            && let Err(e) = self.provider.remove_updates(old).await
        {
            error!("Failed to remove location updates during restart: {}", e);
            self.set_state(ReporterState::Stopped);
            return Err(e);
        }

        match self.provider.request_updates(to).await {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                self.set_state(ReporterState::Active { interval: to });
                info!("Interval updated: {} ms", to.as_millis());
                Ok(ConfigOutcome::Restarted { from, to })
            }
            Err(e) => {
                error!("Failed to restart location updates: {}", e);
                self.set_state(ReporterState::Stopped);
                Err(e)
            }
        }
    }

    /// Wait for the next fix from the live subscription.
    ///
    /// Pends forever while no subscription is live. Returns `None` if the
    /// location source abandoned the subscription.
    pub async fn next_fix(&mut self) -> Option<PositionFix> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.next_fix().await,
            None => std::future::pending().await,
        }
    }

    /// Tear down the subscription and stop.
    ///
    /// The controller ends up stopped even if the teardown fails.
    pub async fn stop(&mut self) -> Result<()> {
        let result = match self.subscription.take() {
            Some(subscription) => self.provider.remove_updates(subscription).await,
            None => Ok(()),
        };
        match &result {
            Ok(()) => {
                if self.state != ReporterState::Stopped {
                    info!("Location updates stopped");
                }
            }
            Err(e) => warn!("Error stopping location updates: {}", e),
        }
        self.set_state(ReporterState::Stopped);
        result
    }
}

/// Decode a raw config notification.
///
/// Unusable notifications are logged and announced as
/// [`ReporterEvent::ConfigIgnored`]; the caller keeps its interval.
pub(crate) fn accept_config_update(
    value: Option<&Value>,
    events: &EventDispatcher,
) -> Option<ReportingConfig> {
    let config = value.and_then(interval_from_value);
    if config.is_none() {
        debug!("Ignoring interval notification: {:?}", value);
        events.send(ReporterEvent::ConfigIgnored {
            reason: describe_invalid(value),
        });
    }
    config
}

fn describe_invalid(value: Option<&Value>) -> String {
    match value {
        None => "no value".to_string(),
        Some(Value::Number(n)) => format!("{} is not a positive integer", n),
        Some(other) => format!("expected an integer, got {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockFailure, MockLocationProvider};
    use crate::traits::StaticPermission;
    use serde_json::json;

    fn controller(provider: &Arc<MockLocationProvider>) -> CadenceController {
        CadenceController::new(
            provider.clone(),
            ReportingConfig::default(),
            EventDispatcher::default(),
        )
    }

    #[test]
    fn test_interval_from_value() {
        assert_eq!(
            interval_from_value(&json!(30000)),
            ReportingConfig::from_millis(30000)
        );
        assert_eq!(
            interval_from_value(&json!(5000.0)),
            ReportingConfig::from_millis(5000)
        );
        assert!(interval_from_value(&json!(0)).is_none());
        assert!(interval_from_value(&json!(-1)).is_none());
        assert!(interval_from_value(&json!(2.5)).is_none());
        assert!(interval_from_value(&json!(true)).is_none());
        assert!(interval_from_value(&json!({"ms": 5})).is_none());
        assert!(interval_from_value(&json!(u64::MAX)).is_none());
    }

    #[tokio::test]
    async fn test_start_creates_one_subscription() {
        let provider = Arc::new(MockLocationProvider::new());
        let mut ctl = controller(&provider);

        let interval = ctl.start(&StaticPermission::GRANTED).await.unwrap();

        assert_eq!(interval, Duration::from_millis(30_000));
        assert_eq!(ctl.state(), ReporterState::Active { interval });
        assert_eq!(provider.active_count(), 1);
        assert_eq!(provider.requested_intervals(), vec![interval]);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let provider = Arc::new(MockLocationProvider::new());
        let mut ctl = controller(&provider);

        ctl.start(&StaticPermission::GRANTED).await.unwrap();
        ctl.start(&StaticPermission::GRANTED).await.unwrap();

        assert_eq!(provider.requested_intervals().len(), 1);
        assert_eq!(provider.active_count(), 1);
    }

    #[tokio::test]
    async fn test_permission_denied_creates_nothing() {
        let provider = Arc::new(MockLocationProvider::new());
        let mut ctl = controller(&provider);

        let err = ctl.start(&StaticPermission::DENIED).await.unwrap_err();

        assert!(matches!(err, Error::PermissionDenied));
        assert_eq!(ctl.state(), ReporterState::Stopped);
        assert!(provider.requested_intervals().is_empty());
    }

    #[tokio::test]
    async fn test_restart_on_new_interval() {
        let provider = Arc::new(MockLocationProvider::new());
        let mut ctl = controller(&provider);
        ctl.start(&StaticPermission::GRANTED).await.unwrap();

        let outcome = ctl.handle_config_update(Some(&json!(5000))).await.unwrap();

        assert_eq!(
            outcome,
            ConfigOutcome::Restarted {
                from: Duration::from_millis(30_000),
                to: Duration::from_millis(5000),
            }
        );
        assert_eq!(provider.removed_count(), 1);
        assert_eq!(
            provider.requested_intervals(),
            vec![Duration::from_millis(30_000), Duration::from_millis(5000)]
        );
        assert_eq!(provider.active_count(), 1);
        assert_eq!(provider.peak_active(), 1);
    }

    #[tokio::test]
    async fn test_same_interval_is_noop() {
        let provider = Arc::new(MockLocationProvider::new());
        let mut ctl = controller(&provider);
        ctl.start(&StaticPermission::GRANTED).await.unwrap();

        assert_eq!(
            ctl.handle_config_update(Some(&json!(30000))).await.unwrap(),
            ConfigOutcome::Unchanged
        );
        ctl.handle_config_update(Some(&json!(8000))).await.unwrap();
        assert_eq!(
            ctl.handle_config_update(Some(&json!(8000))).await.unwrap(),
            ConfigOutcome::Unchanged
        );

        assert_eq!(provider.requested_intervals().len(), 2);
        assert_eq!(provider.removed_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_value_keeps_interval() {
        let provider = Arc::new(MockLocationProvider::new());
        let mut ctl = controller(&provider);
        ctl.start(&StaticPermission::GRANTED).await.unwrap();

        for value in [Some(json!(-1)), Some(json!(0)), Some(json!("fast")), None] {
            let outcome = ctl.handle_config_update(value.as_ref()).await.unwrap();
            assert_eq!(outcome, ConfigOutcome::Ignored);
        }

        assert_eq!(ctl.config().interval_millis(), 30_000);
        assert_eq!(provider.requested_intervals().len(), 1);
        assert_eq!(provider.removed_count(), 0);
    }

    #[test]
    fn test_accept_config_update_announces_ignored_values() {
        let events = EventDispatcher::default();
        let mut rx = events.subscribe();

        assert_eq!(
            accept_config_update(Some(&json!(5000)), &events),
            ReportingConfig::from_millis(5000)
        );
        assert!(rx.try_recv().is_err());

        assert!(accept_config_update(None, &events).is_none());
        assert!(accept_config_update(Some(&json!(-5)), &events).is_none());
        let reasons: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                ReporterEvent::ConfigIgnored { reason } => Some(reason),
                _ => None,
            })
            .collect();
        assert_eq!(reasons, vec!["no value", "-5 is not a positive integer"]);
    }

    #[tokio::test]
    async fn test_burst_restarts_only_on_change() {
        let provider = Arc::new(MockLocationProvider::new());
        let mut ctl = controller(&provider);
        ctl.start(&StaticPermission::GRANTED).await.unwrap();

        let burst = [5000, 5000, -3, 10000, 10000, 0, 5000, 7000];
        let mut restarts = 0;
        for v in burst {
            if let ConfigOutcome::Restarted { .. } =
                ctl.handle_config_update(Some(&json!(v))).await.unwrap()
            {
                restarts += 1;
            }
            assert!(provider.active_count() <= 1);
        }

        assert_eq!(restarts, 4);
        assert_eq!(ctl.config().interval_millis(), 7000);
        assert_eq!(ctl.state().interval(), Some(Duration::from_millis(7000)));
        assert_eq!(provider.active_count(), 1);
        assert_eq!(provider.peak_active(), 1);
    }

    #[tokio::test]
    async fn test_config_cached_while_stopped() {
        let provider = Arc::new(MockLocationProvider::new());
        let mut ctl = controller(&provider);

        let outcome = ctl.handle_config_update(Some(&json!(1000))).await.unwrap();
        assert_eq!(
            outcome,
            ConfigOutcome::Cached {
                interval: Duration::from_millis(1000)
            }
        );
        assert!(provider.requested_intervals().is_empty());

        ctl.start(&StaticPermission::GRANTED).await.unwrap();
        assert_eq!(provider.requested_intervals(), vec![Duration::from_millis(1000)]);
    }

    #[tokio::test]
    async fn test_restart_failure_stops() {
        let provider = Arc::new(MockLocationProvider::new());
        let mut ctl = controller(&provider);
        ctl.start(&StaticPermission::GRANTED).await.unwrap();

        provider.fail_next_request(MockFailure::Rejected("provider offline".into()));
        let err = ctl.handle_config_update(Some(&json!(5000))).await.unwrap_err();

        assert!(matches!(err, Error::SubscriptionFailed { .. }));
        assert_eq!(ctl.state(), ReporterState::Stopped);
        assert!(!ctl.has_subscription());
        assert_eq!(provider.active_count(), 0);
    }

    #[tokio::test]
    async fn test_restart_permission_revoked() {
        let provider = Arc::new(MockLocationProvider::new());
        let mut ctl = controller(&provider);
        ctl.start(&StaticPermission::GRANTED).await.unwrap();

        provider.fail_next_request(MockFailure::PermissionDenied);
        let err = ctl.handle_config_update(Some(&json!(5000))).await.unwrap_err();

        assert!(matches!(err, Error::PermissionDenied));
        assert_eq!(ctl.state(), ReporterState::Stopped);
    }

    #[tokio::test]
    async fn test_removal_failure_never_creates_second_subscription() {
        let provider = Arc::new(MockLocationProvider::new());
        let mut ctl = controller(&provider);
        ctl.start(&StaticPermission::GRANTED).await.unwrap();

        provider.fail_removals(true);
        let err = ctl.handle_config_update(Some(&json!(5000))).await.unwrap_err();

        assert!(matches!(err, Error::RemovalFailed(_)));
        assert_eq!(provider.requested_intervals().len(), 1);
        assert_eq!(provider.peak_active(), 1);
        assert_eq!(ctl.state(), ReporterState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_tears_down() {
        let provider = Arc::new(MockLocationProvider::new());
        let mut ctl = controller(&provider);
        ctl.start(&StaticPermission::GRANTED).await.unwrap();

        ctl.stop().await.unwrap();

        assert_eq!(ctl.state(), ReporterState::Stopped);
        assert_eq!(provider.active_count(), 0);
        assert_eq!(provider.removed_count(), 1);
    }

    #[tokio::test]
    async fn test_next_fix_forwards_fixes() {
        let provider = Arc::new(MockLocationProvider::new());
        let mut ctl = controller(&provider);
        ctl.start(&StaticPermission::GRANTED).await.unwrap();

        assert!(provider.push_fix(PositionFix::new(4.0, -74.0, 10)));
        assert_eq!(ctl.next_fix().await, Some(PositionFix::new(4.0, -74.0, 10)));
    }

    #[tokio::test]
    async fn test_state_watch_follows_transitions() {
        let provider = Arc::new(MockLocationProvider::new());
        let mut ctl = controller(&provider);
        let watch = ctl.watch();

        ctl.start(&StaticPermission::GRANTED).await.unwrap();
        assert!(watch.borrow().is_active());

        ctl.stop().await.unwrap();
        assert_eq!(*watch.borrow(), ReporterState::Stopped);
    }
}
