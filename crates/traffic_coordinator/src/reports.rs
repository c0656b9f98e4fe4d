//! Consumer of the ZONE_STATE reporting queue.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use traffic_net::messages::{MessageKind, Payload};
use traffic_net::subjects::REPORT_QUEUE;
use traffic_net::{Envelope, Handler, HandlerSet, MessageBus};

use crate::state::CoordinatorState;

/// Applies ZONE_STATE reports to the registry.
pub struct ReportHandler {
    state: CoordinatorState,
}

#[async_trait]
impl Handler for ReportHandler {
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        let Payload::ZoneState(report) = &envelope.payload else {
            return Ok(());
        };
        if self.state.observe(report).await {
            debug!(zone = %report.zone, vehicles = report.vehicle_count, level = %report.traffic_level, "zone report");
        } else {
            debug!(zone = %report.zone, "report from unregistered zone");
        }
        Ok(())
    }
}

#[must_use]
pub fn handlers(state: CoordinatorState) -> HandlerSet {
    HandlerSet::new().on(MessageKind::ZoneState, Arc::new(ReportHandler { state }))
}

/// Consume [`REPORT_QUEUE`] until `cancel` fires.
///
/// # Errors
///
/// Propagates fatal bus errors.
pub async fn run(bus: MessageBus, state: CoordinatorState, cancel: CancellationToken) -> anyhow::Result<()> {
    bus.consume(REPORT_QUEUE, &handlers(state), &cancel).await?;
    Ok(())
}
