//! Sticky reporter supervision.
//!
//! The [`Supervisor`] plays the host role for the reporter. A run that ends
//! because the location subscription failed is restarted after a delay, the
//! way a sticky platform service is recreated after being killed. A run that
//! ends for lack of permission is final: restarting cannot fix it.

use std::sync::{Arc, Mutex};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fotohora_core::{
    EventDispatcher, EventReceiver, HostControl, LocationProvider, RemoteStore, Reporter,
    ReporterExit, StaticPermission, StopReason,
};
use fotohora_types::DeviceIdentity;

use crate::config::ReporterConfig;

/// Host that records the reporter's stop requests.
#[derive(Debug, Default)]
pub struct ServiceHost {
    requests: Mutex<Vec<StopReason>>,
}

impl ServiceHost {
    /// Create a host with no recorded requests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stop request received, in order.
    pub fn stop_requests(&self) -> Vec<StopReason> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl HostControl for ServiceHost {
    fn request_stop(&self, reason: StopReason) {
        error!("Reporter asked the service to stop: {}", reason);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(reason);
    }
}

/// Runs the reporter and restarts it after subscription failures.
pub struct Supervisor {
    store: Arc<dyn RemoteStore>,
    provider: Arc<dyn LocationProvider>,
    device: DeviceIdentity,
    settings: ReporterConfig,
    host: Arc<ServiceHost>,
    events: EventDispatcher,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("device", &self.device)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Supervisor {
    /// Create a supervisor for `device`.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        provider: Arc<dyn LocationProvider>,
        device: DeviceIdentity,
        settings: ReporterConfig,
    ) -> Self {
        Self {
            store,
            provider,
            device,
            settings,
            host: Arc::new(ServiceHost::new()),
            events: EventDispatcher::default(),
        }
    }

    /// Subscribe to events from every run.
    pub fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// The host receiving stop requests.
    pub fn host(&self) -> &ServiceHost {
        &self.host
    }

    fn reporter(&self) -> Reporter {
        Reporter::builder(Arc::clone(&self.store), Arc::clone(&self.provider))
            .device(self.device.clone())
            .permission(Arc::new(StaticPermission(self.settings.location_permission)))
            .host(self.host.clone())
            .options(self.settings.reporter_options())
            .events(self.events.clone())
            .build()
    }

    /// Run until cancelled or until a run ends in a way restarting cannot fix.
    pub async fn run(&self, cancel: CancellationToken) -> ReporterExit {
        let mut attempt = 1u32;
        loop {
            let exit = self.reporter().run(cancel.child_token()).await;

            let ReporterExit::SubscriptionFailed(reason) = &exit else {
                return exit;
            };
            if !self.settings.restart_on_failure || cancel.is_cancelled() {
                return exit;
            }

            let delay = self.settings.restart_delay();
            warn!(
                "Reporter run {} failed: {}; restarting in {}s",
                attempt,
                reason,
                delay.as_secs()
            );
            tokio::select! {
                _ = cancel.cancelled() => return ReporterExit::Stopped,
                _ = sleep(delay) => {}
            }
            attempt += 1;
            info!("Restarting reporter (run {})", attempt);
        }
    }
}
