//! Simulated location source.
//!
//! [`SimulatedLocationProvider`] produces a random walk around an origin so
//! the reporter can run on machines without location hardware. Each
//! subscription gets its own polling task that emits one fix per interval
//! tick; the walk position is shared, so a restart at a new interval
//! continues from where the previous subscription left off.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use fotohora_types::{Coordinates, PositionFix};

use crate::error::{Error, Result};
use crate::traits::{Clock, FixSubscription, LocationProvider, SubscriptionId, SystemClock};

/// Meters per degree of latitude.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Latitude is kept away from the poles so longitude steps stay finite.
const MAX_LATITUDE: f64 = 89.9;

/// A location source that walks randomly around an origin.
pub struct SimulatedLocationProvider {
    position: Arc<Mutex<Coordinates>>,
    step_meters: f64,
    clock: Arc<dyn Clock>,
    buffer: usize,
    tasks: Mutex<HashMap<SubscriptionId, CancellationToken>>,
}

impl std::fmt::Debug for SimulatedLocationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedLocationProvider")
            .field("position", &self.position())
            .field("step_meters", &self.step_meters)
            .field("active", &self.active_count())
            .finish()
    }
}

impl SimulatedLocationProvider {
    /// Walk around `origin`, moving `step_meters` per fix.
    pub fn new(origin: Coordinates, step_meters: f64) -> Self {
        Self::with_clock(origin, step_meters, Arc::new(SystemClock))
    }

    /// Like [`new`](Self::new), stamping fixes with `clock`.
    pub fn with_clock(origin: Coordinates, step_meters: f64, clock: Arc<dyn Clock>) -> Self {
        Self {
            position: Arc::new(Mutex::new(origin)),
            step_meters: step_meters.max(0.0),
            clock,
            buffer: 4,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Current walk position.
    pub fn position(&self) -> Coordinates {
        *self.position.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of live subscriptions.
    pub fn active_count(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for SimulatedLocationProvider {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, token) in tasks.drain() {
            token.cancel();
        }
    }
}

#[async_trait]
impl LocationProvider for SimulatedLocationProvider {
    async fn request_updates(&self, every: Duration) -> Result<FixSubscription> {
        if every.is_zero() {
            return Err(Error::invalid_config("location interval must be > 0"));
        }

        let (tx, subscription) = FixSubscription::channel(every, self.buffer);
        let token = CancellationToken::new();
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(subscription.id(), token.clone());

        let position = Arc::clone(&self.position);
        let clock = Arc::clone(&self.clock);
        let step = self.step_meters;
        let id = subscription.id();

        info!("Simulated location updates {} every {} ms", id, every.as_millis());

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let next = {
                            let mut current = position.lock().unwrap_or_else(|e| e.into_inner());
                            *current = walk(*current, step, &mut rand::rng());
                            *current
                        };
                        let fix = PositionFix::new(next.lat, next.lng, clock.now_millis());
                        // A full buffer means the consumer is behind; skip the fix.
                        if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(fix) {
                            break;
                        }
                    }
                }
            }
            debug!("Simulated location task {} finished", id);
        });

        Ok(subscription)
    }

    async fn remove_updates(&self, subscription: FixSubscription) -> Result<()> {
        let token = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&subscription.id());
        match token {
            Some(token) => {
                token.cancel();
                debug!("Removed simulated location updates {}", subscription.id());
            }
            None => debug!("Unknown simulated subscription {}", subscription.id()),
        }
        Ok(())
    }
}

/// Move `from` by `step_meters` in a random direction.
fn walk(from: Coordinates, step_meters: f64, rng: &mut impl Rng) -> Coordinates {
    if step_meters == 0.0 {
        return from;
    }
    let bearing = rng.random_range(0.0..(2.0 * PI));
    let dlat = step_meters * bearing.cos() / METERS_PER_DEGREE;
    let lat = (from.lat + dlat).clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let dlng = step_meters * bearing.sin() / (METERS_PER_DEGREE * lat.to_radians().cos());
    let mut lng = from.lng + dlng;
    if lng > 180.0 {
        lng -= 360.0;
    } else if lng < -180.0 {
        lng += 360.0;
    }
    Coordinates { lat, lng }
}
