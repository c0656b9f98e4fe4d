//! Outbound vehicle migration.
//!
//! On every scan the [`MigrationCoordinator`] picks the vehicles matched by
//! its [`ExitPredicate`], asks the registry for the least-loaded healthy zone
//! and hands each vehicle over with a VEHICLE_ENTERING message. A vehicle is
//! removed locally before the publish; if the publish fails after every
//! retry it is put back when its id is still free.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use traffic_net::subjects::queue_name;
use traffic_net::{Envelope, MessageBus};
use traffic_sim::{DVec2, Vehicle, VehicleId};
use uuid::Uuid;

use crate::context::ZoneContext;
use crate::registry_client::RegistryClient;

// ── Exit predicates ─────────────────────────────────────────────────────────

/// Decides whether a vehicle has left the zone.
pub trait ExitPredicate: Send + Sync {
    fn should_exit(&self, vehicle: &Vehicle) -> bool;
}

impl<F> ExitPredicate for F
where
    F: Fn(&Vehicle) -> bool + Send + Sync,
{
    fn should_exit(&self, vehicle: &Vehicle) -> bool {
        self(vehicle)
    }
}

/// Exit past a coordinate on the heading's axis: east/west vehicles when
/// `position.x > x`, north/south vehicles when `position.y > y`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisThreshold {
    pub x: f64,
    pub y: f64,
}

impl AxisThreshold {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<DVec2> for AxisThreshold {
    fn from(point: DVec2) -> Self {
        Self::new(point.x, point.y)
    }
}

impl ExitPredicate for AxisThreshold {
    fn should_exit(&self, vehicle: &Vehicle) -> bool {
        let limit = if vehicle.heading.is_horizontal() { self.x } else { self.y };
        vehicle.along() > limit
    }
}

// ── Pending acknowledgments ─────────────────────────────────────────────────

/// Default age after which an unacknowledged hand-off is dropped.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// A hand-off waiting for the target's ACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMigration {
    pub vehicle: VehicleId,
    pub target: String,
    pub sent_at: Instant,
}

/// Hand-offs sent but not yet acknowledged, keyed by envelope id.
#[derive(Debug, Clone, Default)]
pub struct PendingAcks {
    inner: Arc<Mutex<HashMap<Uuid, PendingMigration>>>,
}

impl PendingAcks {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, PendingMigration>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, envelope_id: Uuid, vehicle: VehicleId, target: impl Into<String>) {
        self.lock().insert(
            envelope_id,
            PendingMigration {
                vehicle,
                target: target.into(),
                sent_at: Instant::now(),
            },
        );
    }

    /// Clear the entry for `envelope_id`, returning it if it was pending.
    pub fn acknowledge(&self, envelope_id: &Uuid) -> Option<PendingMigration> {
        self.lock().remove(envelope_id)
    }

    #[must_use]
    pub fn contains(&self, envelope_id: &Uuid) -> bool {
        self.lock().contains_key(envelope_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and return the entries older than `age`.
    pub fn expire(&self, age: Duration) -> Vec<(Uuid, PendingMigration)> {
        let mut pending = self.lock();
        let expired: Vec<Uuid> = pending
            .iter()
            .filter(|(_, p)| p.sent_at.elapsed() > age)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| pending.remove(&id).map(|p| (id, p)))
            .collect()
    }
}

// ── Scan ────────────────────────────────────────────────────────────────────

/// A vehicle successfully handed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub vehicle: VehicleId,
    pub target: String,
    pub envelope_id: Uuid,
}

/// A hand-off whose publish failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedMigration {
    pub vehicle: VehicleId,
    pub target: String,
    pub error: String,
    /// `true` if the vehicle was put back into the zone.
    pub restored: bool,
}

/// Outcome of one [`MigrationCoordinator::scan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub migrated: Vec<Migration>,
    /// Exiting vehicles kept for the next scan.
    pub retained: usize,
    pub failed: Vec<FailedMigration>,
}

impl ScanReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.migrated.is_empty() && self.retained == 0 && self.failed.is_empty()
    }
}

/// Hands exiting vehicles to other zones.
pub struct MigrationCoordinator {
    ctx: ZoneContext,
    bus: MessageBus,
    registry: Arc<dyn RegistryClient>,
    predicate: Box<dyn ExitPredicate>,
    ack_timeout: Duration,
}

impl MigrationCoordinator {
    #[must_use]
    pub fn new(
        ctx: ZoneContext,
        bus: MessageBus,
        registry: Arc<dyn RegistryClient>,
        predicate: impl ExitPredicate + 'static,
    ) -> Self {
        Self {
            ctx,
            bus,
            registry,
            predicate: Box::new(predicate),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    /// Age after which an unacknowledged hand-off is given up on.
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    async fn exiting(&self) -> Vec<VehicleId> {
        let zone = self.ctx.zone().lock().await;
        zone.vehicles()
            .filter(|v| self.predicate.should_exit(v))
            .map(|v| v.id.clone())
            .collect()
    }

    /// Hand every exiting vehicle to the least-loaded healthy zone.
    pub async fn scan(&self) -> ScanReport {
        let mut report = ScanReport::default();
        let candidates = self.exiting().await;
        if candidates.is_empty() {
            return report;
        }

        let exclude = [self.ctx.name().to_string()];
        for (idx, id) in candidates.iter().enumerate() {
            let target = match self.registry.least_loaded(&exclude).await {
                Ok(target) => target,
                Err(e) if e.is_no_healthy_target() => {
                    warn!(zone = %self.ctx.name(), vehicle = %id, "no healthy zone to receive vehicle; retaining");
                    report.retained += 1;
                    continue;
                }
                Err(e) => {
                    warn!(zone = %self.ctx.name(), error = %e, "registry query failed; retaining exiting vehicles");
                    report.retained += candidates.len() - idx;
                    break;
                }
            };

            let Some(vehicle) = self.ctx.zone().lock().await.remove_vehicle(id) else {
                continue;
            };

            let envelope = match Envelope::vehicle_entering(self.ctx.name(), target.as_str(), &vehicle) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!(vehicle = %id, error = %e, "cannot encode vehicle for migration");
                    let restored = self.restore(vehicle).await;
                    report.failed.push(FailedMigration {
                        vehicle: id.clone(),
                        target,
                        error: e.to_string(),
                        restored,
                    });
                    continue;
                }
            };

            self.ctx.pending().insert(envelope.id, id.clone(), target.as_str());
            match self.bus.publish(&envelope, &queue_name(&target)).await {
                Ok(()) => {
                    self.ctx.metrics().migrations_sent.inc();
                    info!(vehicle = %id, from = %self.ctx.name(), to = %target, envelope = %envelope.id, "vehicle migrated");
                    report.migrated.push(Migration {
                        vehicle: id.clone(),
                        target,
                        envelope_id: envelope.id,
                    });
                }
                Err(e) => {
                    self.ctx.pending().acknowledge(&envelope.id);
                    self.ctx.metrics().migrations_failed.inc();
                    let restored = self.restore(vehicle).await;
                    error!(vehicle = %id, to = %target, error = %e, restored, "migration failed");
                    report.failed.push(FailedMigration {
                        vehicle: id.clone(),
                        target,
                        error: e.to_string(),
                        restored,
                    });
                }
            }
        }

        self.ctx.load().await;
        report
    }

    /// Drop pending hand-offs older than the ACK timeout, returning how many
    /// were dropped. The vehicles are not restored: the target may still
    /// hold them.
    pub fn expire_pending(&self) -> usize {
        let expired = self.ctx.pending().expire(self.ack_timeout);
        for (id, pending) in &expired {
            warn!(envelope = %id, vehicle = %pending.vehicle, to = %pending.target, "migration never acknowledged; giving up");
        }
        let count = expired.len();
        self.ctx
            .metrics()
            .migrations_unacknowledged
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
        count
    }

    async fn restore(&self, vehicle: Vehicle) -> bool {
        let id = vehicle.id.clone();
        match self.ctx.zone().lock().await.add_vehicle(vehicle) {
            Ok(()) => true,
            Err(e) => {
                error!(vehicle = %id, error = %e, "vehicle lost");
                false
            }
        }
    }

    /// Scan every `interval` until `cancel` fires.
    pub async fn run(self, interval: Duration, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let report = self.scan().await;
            if !report.is_empty() {
                debug!(
                    migrated = report.migrated.len(),
                    retained = report.retained,
                    failed = report.failed.len(),
                    "migration scan"
                );
            }
            self.expire_pending();
        }
        Ok(())
    }
}
