//! Zone runner: the harness that runs one zone as a process.
//!
//! The runner builds the zone from its layout and drives these periodic
//! tasks in one supervised group:
//!
//! 1. the simulation tick loop;
//! 2. the consumer of the zone's inbound queue;
//! 3. registration and heartbeats to the coordinator;
//! 4. ZONE_STATE reports to the reporting queue;
//! 5. the migration scan;
//! 6. the optional metrics and snapshot endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use traffic_net::subjects::REPORT_QUEUE;
use traffic_net::{Envelope, MessageBus, TaskGroup};

use crate::config::ZoneConfig;
use crate::context::ZoneContext;
use crate::handlers::handlers;
use crate::metrics::ZoneMetrics;
use crate::migration::{AxisThreshold, MigrationCoordinator};
use crate::registry_client::RegistryClient;

/// Destination recorded on ZONE_STATE reports.
const COORDINATOR: &str = "coordinator";

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Advance the simulation every `period` until `cancel` fires.
pub async fn tick_loop(ctx: ZoneContext, period: Duration, cancel: CancellationToken) -> Result<()> {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let mut zone = ctx.zone().lock().await;
        zone.tick();
        trace!(zone = %ctx.name(), tick = zone.tick_count(), "tick");
    }
    Ok(())
}

/// Keeps the zone registered with the coordinator.
pub struct Heartbeat {
    ctx: ZoneContext,
    registry: Arc<dyn RegistryClient>,
    registered: bool,
}

impl Heartbeat {
    #[must_use]
    pub fn new(ctx: ZoneContext, registry: Arc<dyn RegistryClient>) -> Self {
        Self {
            ctx,
            registry,
            registered: false,
        }
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    async fn register(&mut self) {
        let req = self.ctx.register_request().await;
        match self.registry.register(&req).await {
            Ok(message) => {
                self.registered = true;
                info!(zone = %req.zone, queue = %req.queue, %message, "registered with coordinator");
            }
            Err(e) => warn!(zone = %req.zone, error = %e, "registration failed; retrying next period"),
        }
    }

    /// Register if needed, otherwise send one heartbeat.
    ///
    /// A coordinator that no longer knows the zone triggers an immediate
    /// re-registration.
    pub async fn beat(&mut self) {
        if !self.registered {
            self.register().await;
            return;
        }
        let req = self.ctx.register_request().await;
        match self.registry.heartbeat(&req).await {
            Ok(health) => {
                self.ctx.metrics().heartbeats_sent.inc();
                debug!(zone = %req.zone, vehicles = req.vehicle_count, %health, "heartbeat");
            }
            Err(e) if e.is_not_registered() => {
                error!(zone = %req.zone, error = %e, "coordinator does not know this zone; re-registering");
                self.registered = false;
                self.register().await;
            }
            Err(e) => warn!(zone = %req.zone, error = %e, "heartbeat failed"),
        }
    }

    /// Beat every `period` until `cancel` fires.
    pub async fn run(mut self, period: Duration, cancel: CancellationToken) -> Result<()> {
        let mut ticker = ticker(period);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.beat() => {}
            }
        }
        Ok(())
    }
}

/// Publish one ZONE_STATE report to [`REPORT_QUEUE`].
///
/// # Errors
///
/// Returns the bus error once every publish attempt has failed.
pub async fn report(ctx: &ZoneContext, bus: &MessageBus) -> Result<()> {
    let (count, level) = ctx.load().await;
    let envelope = Envelope::zone_state(ctx.name(), COORDINATOR, ctx.name(), count, level)?;
    bus.publish(&envelope, REPORT_QUEUE).await?;
    debug!(zone = %ctx.name(), vehicles = count, %level, "zone state reported");
    Ok(())
}

/// Report every `period` until `cancel` fires. Failures are logged and
/// skipped.
pub async fn report_loop(ctx: ZoneContext, bus: MessageBus, period: Duration, cancel: CancellationToken) -> Result<()> {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            () = cancel.cancelled() => break,
            result = report(&ctx, &bus) => {
                if let Err(e) = result {
                    warn!(zone = %ctx.name(), error = %e, "zone state report failed");
                }
            }
        }
    }
    Ok(())
}

async fn serve(addr: SocketAddr, ctx: ZoneContext, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "HTTP listening");
    axum::serve(listener, crate::http::router(ctx))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

/// A zone process.
pub struct ZoneRunner {
    config: ZoneConfig,
    ctx: ZoneContext,
    bus: MessageBus,
    registry: Arc<dyn RegistryClient>,
}

impl ZoneRunner {
    /// Build the zone described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout is invalid or metrics cannot be created.
    pub fn new(config: ZoneConfig, bus: MessageBus, registry: Arc<dyn RegistryClient>) -> Result<Self> {
        let zone = config
            .layout
            .build(&config.name, config.seed)
            .with_context(|| format!("cannot build zone {}", config.name))?
            .with_kinematics(config.kinematics);
        let metrics = ZoneMetrics::new().context("failed to create metrics")?;
        let ctx = ZoneContext::new(zone, metrics);
        let bus = bus.with_retry(config.retry);
        Ok(Self {
            config,
            ctx,
            bus,
            registry,
        })
    }

    #[must_use]
    pub fn context(&self) -> &ZoneContext {
        &self.ctx
    }

    /// Run every zone task until `cancel` fires or one of them fails.
    ///
    /// # Errors
    ///
    /// Returns the first task failure.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let Self {
            config,
            ctx,
            bus,
            registry,
        } = self;
        let exit = AxisThreshold::from(config.exit_point());
        info!(
            zone = %ctx.name(),
            queue = %ctx.queue(),
            exit_x = exit.x,
            exit_y = exit.y,
            "zone starting"
        );

        let mut tasks = TaskGroup::new(cancel.clone());
        tasks.spawn("tick", tick_loop(ctx.clone(), config.tick_interval, cancel.clone()));

        let consumer_bus = bus.clone();
        let consumer_ctx = ctx.clone();
        let token = cancel.clone();
        tasks.spawn("consumer", async move {
            let handlers = handlers(&consumer_ctx, &consumer_bus);
            consumer_bus.consume(consumer_ctx.queue(), &handlers, &token).await?;
            Ok(())
        });

        tasks.spawn(
            "heartbeat",
            Heartbeat::new(ctx.clone(), Arc::clone(&registry)).run(config.heartbeat_interval, cancel.clone()),
        );
        tasks.spawn(
            "reporter",
            report_loop(ctx.clone(), bus.clone(), config.report_interval, cancel.clone()),
        );
        tasks.spawn(
            "migration",
            MigrationCoordinator::new(ctx.clone(), bus, registry, exit)
                .with_ack_timeout(config.ack_timeout)
                .run(config.migration_interval, cancel.clone()),
        );
        if let Some(addr) = config.http_addr {
            tasks.spawn("http", serve(addr, ctx.clone(), cancel.clone()));
        }

        let result = tasks.join().await;
        info!(zone = %ctx.name(), "zone stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use traffic_net::{Inbox, MemoryTransport, Payload, Transport, TrafficLevel};
    use traffic_sim::{Bounds, DVec2};

    use super::*;
    use crate::registry_client::fake::{FakeRegistry, Target};

    fn config() -> ZoneConfig {
        ZoneConfig::new("north", Bounds::new(DVec2::ZERO, DVec2::splat(100.0)))
            .with_seed(Some(11))
            .with_tick_interval(Duration::from_millis(10))
            .with_heartbeat_interval(Duration::from_millis(10))
            .with_report_interval(Duration::from_millis(10))
            .with_migration_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_heartbeat_registers_then_beats() {
        let registry = Arc::new(FakeRegistry::new(Target::NoneHealthy));
        let runner = ZoneRunner::new(
            config(),
            MessageBus::new(Arc::new(MemoryTransport::new())),
            Arc::clone(&registry) as Arc<dyn RegistryClient>,
        )
        .unwrap();
        let ctx = runner.context().clone();
        let mut heartbeat = Heartbeat::new(ctx.clone(), Arc::clone(&registry) as Arc<dyn RegistryClient>);

        heartbeat.beat().await;
        assert!(heartbeat.is_registered());
        assert_eq!(registry.registrations.load(Ordering::SeqCst), 1);

        heartbeat.beat().await;
        assert_eq!(registry.heartbeats.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.metrics().heartbeats_sent.get(), 1);

        // The coordinator restarted and lost the zone.
        registry.forget();
        heartbeat.beat().await;
        assert_eq!(registry.registrations.load(Ordering::SeqCst), 2);
        assert!(heartbeat.is_registered());
    }

    #[tokio::test]
    async fn test_report_publishes_zone_state() {
        let transport = MemoryTransport::new();
        let bus = MessageBus::new(Arc::new(transport.clone()));
        let runner = ZoneRunner::new(config(), bus.clone(), Arc::new(FakeRegistry::new(Target::NoneHealthy))).unwrap();

        report(runner.context(), &bus).await.unwrap();

        let mut inbox = transport.open(REPORT_QUEUE).await.unwrap();
        let delivery = inbox.next().await.unwrap().unwrap();
        let envelope = Envelope::decode(delivery.payload()).unwrap();
        assert_eq!(envelope.origin, "north");
        let Payload::ZoneState(state) = envelope.payload else {
            panic!("expected ZONE_STATE, got {:?}", envelope.payload);
        };
        assert_eq!(state.zone, "north");
        assert_eq!(state.vehicle_count, 5);
        assert_eq!(state.traffic_level, TrafficLevel::Low);
    }

    #[tokio::test]
    async fn test_runner_ticks_registers_and_stops() {
        let transport = MemoryTransport::new();
        let registry = Arc::new(FakeRegistry::new(Target::NoneHealthy));
        let runner = ZoneRunner::new(
            config(),
            MessageBus::new(Arc::new(transport.clone())),
            Arc::clone(&registry) as Arc<dyn RegistryClient>,
        )
        .unwrap();
        let ctx = runner.context().clone();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(runner.run(cancel.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let ticks = ctx.zone().lock().await.tick_count();
                if ticks >= 3
                    && registry.heartbeats.load(Ordering::SeqCst) > 0
                    && transport.backlog(REPORT_QUEUE) > 0
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_invalid_layout_is_rejected() {
        let config = ZoneConfig::new("bad", Bounds::new(DVec2::splat(10.0), DVec2::ZERO));
        let result = ZoneRunner::new(
            config,
            MessageBus::new(Arc::new(MemoryTransport::new())),
            Arc::new(FakeRegistry::new(Target::NoneHealthy)),
        );
        assert!(result.is_err());
    }
}
