//! The location reporter.
//!
//! A [`Reporter`] runs as a single task that owns the [`CadenceController`]
//! and multiplexes its two event sources: configuration notifications from
//! the remote store and fixes from the location source. Because only this
//! task touches the controller, a restart can never interleave with a fix or
//! another configuration change.
//!
//! Configuration notifications are coalesced: when several are already
//! queued, only the last valid one is applied.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fotohora_core::{MemoryStore, Reporter, SimulatedLocationProvider};
//! use fotohora_types::{Coordinates, DeviceIdentity};
//!
//! # async fn example() {
//! let store = Arc::new(MemoryStore::new());
//! let provider = Arc::new(SimulatedLocationProvider::new(
//!     Coordinates { lat: 4.7110, lng: -74.0721 },
//!     25.0,
//! ));
//! let handle = Reporter::builder(store, provider)
//!     .device(DeviceIdentity::resolve([Some("demo".to_string())]))
//!     .build()
//!     .spawn();
//!
//! // ... later
//! let exit = handle.stop().await;
//! # }
//! ```

use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fotohora_types::{DeviceIdentity, ReportingConfig, StorePath};

use crate::controller::{CadenceController, ConfigOutcome, ReporterState, accept_config_update};
use crate::error::Error;
use crate::events::{EventDispatcher, EventReceiver, ReporterEvent};
use crate::traits::{
    Clock, HostControl, LocationProvider, PermissionGate, RemoteStore, StaticPermission,
    StopReason, SystemClock, ValueSubscription, ValueUpdate,
};
use crate::writer::{PositionWriter, TimestampSource};

/// How a reporter run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReporterExit {
    /// Stopped on request.
    Stopped,
    /// Location permission was missing.
    PermissionDenied,
    /// The acquisition subscription could not be kept alive.
    SubscriptionFailed(String),
}

impl ReporterExit {
    /// The stop request this exit sends to the host, if any.
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            Self::Stopped => None,
            Self::PermissionDenied => Some(StopReason::PermissionDenied),
            Self::SubscriptionFailed(msg) => Some(StopReason::SubscriptionFailed(msg.clone())),
        }
    }

    fn from_error(err: Error) -> Self {
        match err {
            Error::PermissionDenied => Self::PermissionDenied,
            other => Self::SubscriptionFailed(other.to_string()),
        }
    }
}

impl std::fmt::Display for ReporterExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::PermissionDenied => write!(f, "location permission denied"),
            Self::SubscriptionFailed(msg) => write!(f, "subscription failed: {}", msg),
        }
    }
}

/// Tunables for a reporter.
#[derive(Debug, Clone)]
pub struct ReporterOptions {
    /// Interval used until the store delivers one.
    pub initial_config: ReportingConfig,
    /// Which timestamp reports are keyed by.
    pub timestamp_source: TimestampSource,
    /// Path of the interval value.
    pub config_path: StorePath,
}

impl Default for ReporterOptions {
    fn default() -> Self {
        Self {
            initial_config: ReportingConfig::default(),
            timestamp_source: TimestampSource::default(),
            config_path: StorePath::config_interval(),
        }
    }
}

/// Host that only logs stop requests.
#[derive(Debug, Default)]
struct LoggingHost;

impl HostControl for LoggingHost {
    fn request_stop(&self, reason: StopReason) {
        warn!("Reporter requested stop: {}", reason);
    }
}

/// Builder for [`Reporter`].
pub struct ReporterBuilder {
    store: Arc<dyn RemoteStore>,
    provider: Arc<dyn LocationProvider>,
    device: DeviceIdentity,
    permission: Arc<dyn PermissionGate>,
    host: Arc<dyn HostControl>,
    clock: Arc<dyn Clock>,
    options: ReporterOptions,
    events: EventDispatcher,
}

impl ReporterBuilder {
    /// Start a builder with granted permission, the system clock and a
    /// host that only logs.
    pub fn new(store: Arc<dyn RemoteStore>, provider: Arc<dyn LocationProvider>) -> Self {
        Self {
            store,
            provider,
            device: DeviceIdentity::unknown(),
            permission: Arc::new(StaticPermission::GRANTED),
            host: Arc::new(LoggingHost),
            clock: Arc::new(SystemClock),
            options: ReporterOptions::default(),
            events: EventDispatcher::default(),
        }
    }

    /// Set the device identity.
    #[must_use]
    pub fn device(mut self, device: DeviceIdentity) -> Self {
        self.device = device;
        self
    }

    /// Set the permission gate.
    #[must_use]
    pub fn permission(mut self, permission: Arc<dyn PermissionGate>) -> Self {
        self.permission = permission;
        self
    }

    /// Set the host receiving stop requests.
    #[must_use]
    pub fn host(mut self, host: Arc<dyn HostControl>) -> Self {
        self.host = host;
        self
    }

    /// Set the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set every tunable at once.
    #[must_use]
    pub fn options(mut self, options: ReporterOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the interval used until the store delivers one.
    #[must_use]
    pub fn initial_config(mut self, config: ReportingConfig) -> Self {
        self.options.initial_config = config;
        self
    }

    /// Set which timestamp reports are keyed by.
    #[must_use]
    pub fn timestamp_source(mut self, source: TimestampSource) -> Self {
        self.options.timestamp_source = source;
        self
    }

    /// Use an existing event dispatcher.
    #[must_use]
    pub fn events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    /// Build the reporter.
    #[must_use]
    pub fn build(self) -> Reporter {
        let (state_tx, _) = watch::channel(ReporterState::Stopped);
        Reporter {
            store: self.store,
            provider: self.provider,
            device: self.device,
            permission: self.permission,
            host: self.host,
            clock: self.clock,
            options: self.options,
            events: self.events,
            state_tx,
        }
    }
}

/// The periodic location reporter.
pub struct Reporter {
    store: Arc<dyn RemoteStore>,
    provider: Arc<dyn LocationProvider>,
    device: DeviceIdentity,
    permission: Arc<dyn PermissionGate>,
    host: Arc<dyn HostControl>,
    clock: Arc<dyn Clock>,
    options: ReporterOptions,
    events: EventDispatcher,
    state_tx: watch::Sender<ReporterState>,
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("device", &self.device)
            .field("options", &self.options)
            .finish()
    }
}

impl Reporter {
    /// Start building a reporter.
    pub fn builder(
        store: Arc<dyn RemoteStore>,
        provider: Arc<dyn LocationProvider>,
    ) -> ReporterBuilder {
        ReporterBuilder::new(store, provider)
    }

    /// The device this reporter reports for.
    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    /// Subscribe to events.
    pub fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Watch the controller state.
    pub fn watch_state(&self) -> watch::Receiver<ReporterState> {
        self.state_tx.subscribe()
    }

    /// Run the reporter on a new task.
    pub fn spawn(self) -> ReporterHandle {
        let cancel = CancellationToken::new();
        let state = self.watch_state();
        let events = self.events.clone();
        let token = cancel.clone();
        let task = tokio::spawn(self.run(token));
        ReporterHandle {
            cancel,
            state,
            events,
            task,
        }
    }

    /// Run until `cancel` fires or the reporter cannot continue.
    ///
    /// When the run ends for any reason other than cancellation, the host is
    /// asked to stop exactly once.
    pub async fn run(self, cancel: CancellationToken) -> ReporterExit {
        let mut controller = CadenceController::with_state_sender(
            Arc::clone(&self.provider),
            self.options.initial_config,
            self.events.clone(),
            self.state_tx.clone(),
        );
        let writer = PositionWriter::new(
            Arc::clone(&self.store),
            self.device.clone(),
            Arc::clone(&self.clock),
            self.options.timestamp_source,
            self.events.clone(),
        );

        info!("Starting location reporter for device {}", self.device);

        let exit = match controller.start(self.permission.as_ref()).await {
            Ok(_) => {
                let mut config = self.subscribe_config().await;
                let exit = self
                    .event_loop(&mut controller, &writer, &mut config, &cancel)
                    .await;
                if let Some(subscription) = config {
                    self.store.unsubscribe(subscription.id()).await;
                }
                exit
            }
            Err(e) => ReporterExit::from_error(e),
        };

        if let Err(e) = controller.stop().await {
            warn!("Error tearing down location updates: {}", e);
        }

        match exit.stop_reason() {
            Some(reason) => {
                error!("Location reporter stopping: {}", reason);
                self.events.send(ReporterEvent::StopRequested {
                    reason: reason.clone(),
                });
                self.host.request_stop(reason);
            }
            None => info!("Location reporter stopped"),
        }
        exit
    }

    async fn subscribe_config(&self) -> Option<ValueSubscription> {
        match self.store.subscribe(&self.options.config_path).await {
            Ok(subscription) => {
                debug!("Listening for interval changes at {}", self.options.config_path);
                Some(subscription)
            }
            Err(e) => {
                warn!(
                    "Error subscribing to {}: {}; keeping {} ms",
                    self.options.config_path,
                    e,
                    self.options.initial_config.interval_millis()
                );
                None
            }
        }
    }

    async fn event_loop(
        &self,
        controller: &mut CadenceController,
        writer: &PositionWriter,
        config: &mut Option<ValueSubscription>,
        cancel: &CancellationToken,
    ) -> ReporterExit {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return ReporterExit::Stopped,

                update = next_update(config) => {
                    let Some(first) = update else {
                        warn!("Interval listener closed; keeping current interval");
                        *config = None;
                        continue;
                    };
                    let (latest, closed) = self.coalesce(first, config);
                    if closed {
                        warn!("Interval listener closed; keeping current interval");
                        *config = None;
                    }
                    let Some(latest) = latest else { continue };
                    match controller.apply_config(latest).await {
                        Ok(ConfigOutcome::Restarted { from, to }) => debug!(
                            "Restarted location updates: {} ms -> {} ms",
                            from.as_millis(),
                            to.as_millis()
                        ),
                        Ok(outcome) => debug!("Interval notification: {:?}", outcome),
                        Err(e) => return ReporterExit::from_error(e),
                    }
                }

                fix = controller.next_fix() => match fix {
                    Some(fix) => {
                        writer.report(fix);
                    }
                    None => {
                        return ReporterExit::SubscriptionFailed(
                            "location source ended the subscription".to_string(),
                        );
                    }
                },
            }
        }
    }

    /// Fold `first` and every update already queued into the last valid config.
    ///
    /// Also reports whether the stream ended while draining.
    fn coalesce(
        &self,
        first: ValueUpdate,
        config: &mut Option<ValueSubscription>,
    ) -> (Option<ReportingConfig>, bool) {
        let mut latest = self.accept(first);
        let mut closed = false;
        if let Some(subscription) = config.as_mut() {
            loop {
                match subscription.next().now_or_never() {
                    Some(Some(update)) => {
                        if let Some(valid) = self.accept(update) {
                            latest = Some(valid);
                        }
                    }
                    Some(None) => {
                        closed = true;
                        break;
                    }
                    None => break,
                }
            }
        }
        if let Some(config) = &latest {
            debug!("Latest interval notification: {} ms", config.interval_millis());
        }
        (latest, closed)
    }

    fn accept(&self, update: ValueUpdate) -> Option<ReportingConfig> {
        match update {
            Ok(value) => accept_config_update(value.as_ref(), &self.events),
            Err(e) => {
                warn!("Error in interval listener: {}", e);
                None
            }
        }
    }
}

async fn next_update(config: &mut Option<ValueSubscription>) -> Option<ValueUpdate> {
    match config.as_mut() {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

/// Handle to a spawned reporter.
#[derive(Debug)]
pub struct ReporterHandle {
    cancel: CancellationToken,
    state: watch::Receiver<ReporterState>,
    events: EventDispatcher,
    task: JoinHandle<ReporterExit>,
}

impl ReporterHandle {
    /// Current controller state.
    pub fn state(&self) -> ReporterState {
        *self.state.borrow()
    }

    /// Watch the controller state.
    pub fn watch_state(&self) -> watch::Receiver<ReporterState> {
        self.state.clone()
    }

    /// Subscribe to events.
    pub fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// A token that stops the reporter when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the reporter task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the reporter and wait for it to finish.
    pub async fn stop(self) -> ReporterExit {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the reporter to finish on its own.
    pub async fn join(self) -> ReporterExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(e) => ReporterExit::SubscriptionFailed(format!("reporter task failed: {}", e)),
        }
    }
}
