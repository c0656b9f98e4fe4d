//! Zone process entry point.
//!
//! 1. Connect to NATS and bind the JetStream work-queue stream.
//! 2. Build the zone from its bounds.
//! 3. Run the zone tasks until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use traffic_net::connection::DEFAULT_NATS_URL;
use traffic_net::{JetStreamTransport, MessageBus, NatsConnection, RetryPolicy};
use traffic_sim::{Bounds, DVec2, ZoneLayout};
use traffic_zone::{NatsRegistryClient, ZoneConfig, ZoneRunner};

#[derive(Parser)]
#[command(name = "traffic_zone", about = "Runs one zone of the distributed traffic simulation")]
struct Args {
    /// Zone name
    #[arg(long, env = "ZONE_NAME")]
    name: String,

    #[arg(long, default_value_t = 0.0)]
    xmin: f64,

    #[arg(long, default_value_t = 100.0)]
    xmax: f64,

    #[arg(long, default_value_t = 0.0)]
    ymin: f64,

    #[arg(long, default_value_t = 100.0)]
    ymax: f64,

    /// Vehicles spawned at startup
    #[arg(long, default_value_t = 5)]
    vehicles: usize,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Fraction of the bounds past which vehicles leave the zone
    #[arg(long, default_value_t = traffic_zone::config::DEFAULT_EXIT_FRACTION)]
    exit_fraction: f64,

    /// Milliseconds between simulation ticks
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,

    /// Milliseconds between migration scans
    #[arg(long, default_value_t = 1000)]
    migration_ms: u64,

    /// Seconds to wait for a hand-off ACK before giving up on it
    #[arg(long, default_value_t = 30)]
    ack_timeout_secs: u64,

    /// Seconds between heartbeats
    #[arg(long, default_value_t = 5)]
    heartbeat_secs: u64,

    /// Seconds between zone state reports
    #[arg(long, default_value_t = 5)]
    report_secs: u64,

    /// Milliseconds to wait for a registry reply
    #[arg(long, default_value_t = 2000)]
    rpc_timeout_ms: u64,

    /// Publish attempts before a hand-off is given up
    #[arg(long, default_value_t = 5)]
    publish_attempts: u32,

    /// Address of the metrics and snapshot endpoint
    #[arg(long, env = "ZONE_HTTP_ADDR")]
    http_addr: Option<SocketAddr>,

    /// NATS server URL
    #[arg(short, long, env = "NATS_URL", default_value = DEFAULT_NATS_URL)]
    nats_url: String,
}

impl Args {
    fn into_config(self) -> ZoneConfig {
        let bounds = Bounds::new(DVec2::new(self.xmin, self.ymin), DVec2::new(self.xmax, self.ymax));
        ZoneConfig::new(self.name, bounds)
            .with_layout(ZoneLayout::new(bounds).with_vehicles(self.vehicles))
            .with_seed(self.seed)
            .with_exit_fraction(self.exit_fraction)
            .with_tick_interval(Duration::from_millis(self.tick_ms.max(1)))
            .with_migration_interval(Duration::from_millis(self.migration_ms.max(1)))
            .with_heartbeat_interval(Duration::from_secs(self.heartbeat_secs.max(1)))
            .with_report_interval(Duration::from_secs(self.report_secs.max(1)))
            .with_ack_timeout(Duration::from_secs(self.ack_timeout_secs))
            .with_rpc_timeout(Duration::from_millis(self.rpc_timeout_ms))
            .with_retry(RetryPolicy::default().with_max_attempts(self.publish_attempts))
            .with_http_addr(self.http_addr)
            .with_nats_url(self.nats_url)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("traffic_zone=info".parse()?))
        .init();

    let config = Args::parse().into_config();
    info!(zone = %config.name, url = %config.nats_url, "traffic zone starting");

    let connection = NatsConnection::connect_to(&config.nats_url).await?;
    let transport = JetStreamTransport::new(&connection).await?;
    let registry = NatsRegistryClient::new(connection, config.rpc_timeout);
    let runner = ZoneRunner::new(config, MessageBus::new(Arc::new(transport)), Arc::new(registry))?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C; shutting down"),
        }
        shutdown.cancel();
    });

    runner.run(cancel).await
}
