//! Handlers for messages arriving on a zone's queue.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info, warn};
use traffic_net::messages::{MessageKind, Payload};
use traffic_net::subjects::queue_name;
use traffic_net::{Envelope, Handler, HandlerSet, MessageBus};
use traffic_sim::{SimError, Vehicle};

use crate::context::ZoneContext;

/// Admits migrating vehicles and acknowledges them to the sender.
///
/// Envelope ids already handled are remembered, so a redelivery only
/// re-sends the ACK and never admits the vehicle twice.
pub struct VehicleEnteringHandler {
    ctx: ZoneContext,
    bus: MessageBus,
}

impl VehicleEnteringHandler {
    /// Apply a hand-off to the zone, returning the verdict for its ACK.
    async fn admit(&self, vehicle: Vehicle, origin: &str) -> bool {
        let id = vehicle.id.clone();
        let admitted = self.ctx.zone().lock().await.admit(vehicle);
        match admitted {
            Ok(()) => {
                self.ctx.metrics().migrations_received.inc();
                info!(zone = %self.ctx.name(), vehicle = %id, from = %origin, "vehicle admitted");
                true
            }
            Err(SimError::DuplicateVehicle(_)) => {
                debug!(vehicle = %id, from = %origin, "vehicle already resident");
                true
            }
            Err(e) => {
                warn!(vehicle = %id, from = %origin, error = %e, "rejecting migrating vehicle");
                false
            }
        }
    }
}

#[async_trait]
impl Handler for VehicleEnteringHandler {
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        let Payload::VehicleEntering(entering) = &envelope.payload else {
            return Ok(());
        };
        let vehicle = entering.clone().into_vehicle();
        let id = vehicle.id.clone();

        let accepted = if let Some(accepted) = self.ctx.handled().verdict(&envelope.id) {
            debug!(vehicle = %id, envelope = %envelope.id, "envelope already handled; re-sending ack");
            accepted
        } else {
            let accepted = self.admit(vehicle, &envelope.origin).await;
            self.ctx.handled().record(envelope.id, accepted);
            accepted
        };
        self.ctx.load().await;

        let mut ack = Envelope::ack(self.ctx.name(), envelope.origin.as_str(), envelope.id)?;
        if let Payload::Ack(body) = &mut ack.payload {
            body.ok = accepted;
        }
        self.bus
            .publish(&ack, &queue_name(&envelope.origin))
            .await
            .with_context(|| format!("failed to acknowledge {} to {}", envelope.id, envelope.origin))?;
        Ok(())
    }
}

/// Clears pending hand-offs once the target confirms them.
pub struct AckHandler {
    ctx: ZoneContext,
}

#[async_trait]
impl Handler for AckHandler {
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        let Payload::Ack(ack) = &envelope.payload else {
            return Ok(());
        };
        match self.ctx.pending().acknowledge(&ack.acknowledged_id) {
            Some(pending) if ack.ok => {
                debug!(vehicle = %pending.vehicle, to = %pending.target, "migration acknowledged");
            }
            Some(pending) => {
                warn!(vehicle = %pending.vehicle, to = %pending.target, "target refused migrated vehicle");
            }
            None => {
                debug!(envelope = %ack.acknowledged_id, from = %envelope.origin, "ack for unknown migration");
            }
        }
        Ok(())
    }
}

/// Logs load reports from other zones.
pub struct ZoneStateHandler;

#[async_trait]
impl Handler for ZoneStateHandler {
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        if let Payload::ZoneState(state) = &envelope.payload {
            info!(zone = %state.zone, vehicles = state.vehicle_count, level = %state.traffic_level, "zone state");
        }
        Ok(())
    }
}

/// Every handler a zone registers on its queue.
#[must_use]
pub fn handlers(ctx: &ZoneContext, bus: &MessageBus) -> HandlerSet {
    HandlerSet::new()
        .on(
            MessageKind::VehicleEntering,
            Arc::new(VehicleEnteringHandler {
                ctx: ctx.clone(),
                bus: bus.clone(),
            }),
        )
        .on(MessageKind::Ack, Arc::new(AckHandler { ctx: ctx.clone() }))
        .on(MessageKind::ZoneState, Arc::new(ZoneStateHandler))
}
