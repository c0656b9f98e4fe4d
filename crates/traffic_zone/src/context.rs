//! State shared by the tasks of one zone process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use traffic_net::TrafficLevel;
use traffic_net::rpc::RegisterRequest;
use traffic_net::subjects::queue_name;
use traffic_sim::ZoneSimulator;
use uuid::Uuid;

use crate::metrics::ZoneMetrics;
use crate::migration::PendingAcks;

/// Load level reported for `vehicle_count` vehicles.
#[must_use]
pub fn traffic_level(vehicle_count: usize) -> TrafficLevel {
    match vehicle_count {
        0..10 => TrafficLevel::Low,
        10..30 => TrafficLevel::Moderate,
        _ => TrafficLevel::High,
    }
}

/// How long an inbound envelope id is remembered.
pub const HANDLED_TTL: Duration = Duration::from_secs(600);

/// Upper bound on remembered inbound envelope ids.
pub const HANDLED_CAPACITY: usize = 10_000;

/// Inbound VEHICLE_ENTERING envelopes already applied to the zone, with the
/// verdict sent back in their ACK.
///
/// Entries expire after `ttl`; past `capacity` the oldest entry is evicted.
#[derive(Debug, Clone)]
pub struct HandledEnvelopes {
    inner: Arc<StdMutex<HashMap<Uuid, (bool, Instant)>>>,
    ttl: Duration,
    capacity: usize,
}

impl Default for HandledEnvelopes {
    fn default() -> Self {
        Self::new(HANDLED_TTL, HANDLED_CAPACITY)
    }
}

impl HandledEnvelopes {
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Arc::new(StdMutex::new(HashMap::new())),
            ttl,
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, (bool, Instant)>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Verdict recorded for `envelope_id`, if it was handled and has not expired.
    #[must_use]
    pub fn verdict(&self, envelope_id: &Uuid) -> Option<bool> {
        let mut handled = self.lock();
        let entry = handled
            .get(envelope_id)
            .map(|(accepted, at)| (*accepted, at.elapsed() > self.ttl));
        match entry {
            Some((_, true)) => {
                handled.remove(envelope_id);
                None
            }
            Some((accepted, false)) => Some(accepted),
            None => None,
        }
    }

    pub fn record(&self, envelope_id: Uuid, accepted: bool) {
        let mut handled = self.lock();
        let ttl = self.ttl;
        handled.retain(|_, (_, at)| at.elapsed() <= ttl);
        while handled.len() >= self.capacity {
            let Some(oldest) = handled.iter().min_by_key(|(_, (_, at))| *at).map(|(id, _)| *id) else {
                break;
            };
            handled.remove(&oldest);
        }
        handled.insert(envelope_id, (accepted, Instant::now()));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Handles to the zone and its bookkeeping.
///
/// The simulator lock is never held across a network call.
#[derive(Debug, Clone)]
pub struct ZoneContext {
    name: String,
    queue: String,
    zone: Arc<Mutex<ZoneSimulator>>,
    metrics: Arc<ZoneMetrics>,
    pending: PendingAcks,
    handled: HandledEnvelopes,
}

impl ZoneContext {
    #[must_use]
    pub fn new(zone: ZoneSimulator, metrics: ZoneMetrics) -> Self {
        let name = zone.name().to_string();
        Self {
            queue: queue_name(&name),
            name,
            zone: Arc::new(Mutex::new(zone)),
            metrics: Arc::new(metrics),
            pending: PendingAcks::default(),
            handled: HandledEnvelopes::default(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inbound queue of the zone.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    #[must_use]
    pub fn zone(&self) -> &Arc<Mutex<ZoneSimulator>> {
        &self.zone
    }

    #[must_use]
    pub fn metrics(&self) -> &ZoneMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn pending(&self) -> &PendingAcks {
        &self.pending
    }

    #[must_use]
    pub fn handled(&self) -> &HandledEnvelopes {
        &self.handled
    }

    /// Current vehicle count and level, refreshing the vehicle gauge.
    pub async fn load(&self) -> (usize, TrafficLevel) {
        let count = self.zone.lock().await.vehicle_count();
        self.metrics.set_vehicles(&self.name, count);
        (count, traffic_level(count))
    }

    /// Registration body carrying the current load.
    pub async fn register_request(&self) -> RegisterRequest {
        let (vehicle_count, traffic_level) = self.load().await;
        RegisterRequest {
            zone: self.name.clone(),
            queue: self.queue.clone(),
            vehicle_count,
            traffic_level,
        }
    }
}
