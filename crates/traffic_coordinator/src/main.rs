//! # traffic_coordinator
//!
//! Central coordinator of the distributed traffic simulation. It keeps the
//! registry of zones, classifies their health and answers least-loaded
//! queries used to pick migration targets.
//!
//! ## Startup Sequence
//!
//! 1. Connect to NATS and bind the JetStream work-queue stream.
//! 2. Serve the HTTP API and the NATS registry responder.
//! 3. Consume ZONE_STATE reports and sweep health on a fixed period.
//! 4. Run until Ctrl-C, then cancel every task and wait for them.

mod api;
mod config;
mod metrics;
mod monitor;
mod registry;
mod reports;
mod rpc;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use traffic_net::connection::DEFAULT_NATS_URL;
use traffic_net::{JetStreamTransport, MessageBus, NatsConnection, TaskGroup};

use config::{CoordinatorConfig, RegistryConfig};
use metrics::CoordinatorMetrics;
use monitor::HealthMonitor;
use rpc::RegistryResponder;
use state::CoordinatorState;

#[derive(Parser)]
#[command(name = "traffic_coordinator", about = "Zone registry and load balancer for the traffic simulation")]
struct Args {
    /// Address of the HTTP API
    #[arg(long, env = "COORDINATOR_ADDR", default_value = "0.0.0.0:8000")]
    http_addr: SocketAddr,

    /// Optional separate address serving only /metrics
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// NATS server URL
    #[arg(short, long, env = "NATS_URL", default_value = DEFAULT_NATS_URL)]
    nats_url: String,

    /// Seconds without a heartbeat before a zone is UNHEALTHY
    #[arg(long, default_value_t = 15)]
    heartbeat_timeout: i64,

    /// Vehicle count above which a zone is OVERLOADED
    #[arg(long, default_value_t = 50)]
    overload_threshold: usize,

    /// Seconds between health sweeps
    #[arg(long, default_value_t = 5)]
    sweep_interval: u64,
}

impl Args {
    fn into_config(self) -> CoordinatorConfig {
        CoordinatorConfig {
            http_addr: self.http_addr,
            metrics_addr: self.metrics_addr,
            nats_url: self.nats_url,
            registry: RegistryConfig::default()
                .with_heartbeat_timeout(TimeDelta::seconds(self.heartbeat_timeout))
                .with_overload_threshold(self.overload_threshold),
            sweep_interval: Duration::from_secs(self.sweep_interval.max(1)),
        }
    }
}

async fn serve(addr: SocketAddr, app: axum::Router, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "HTTP listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("traffic_coordinator=info".parse()?))
        .init();

    let config = Args::parse().into_config();
    info!(?config, "traffic coordinator starting");

    let metrics = CoordinatorMetrics::new().context("failed to create metrics")?;
    let state = CoordinatorState::new(config.registry, metrics);

    let connection = NatsConnection::connect_to(&config.nats_url).await?;
    let transport = JetStreamTransport::new(&connection).await?;
    let bus = MessageBus::new(Arc::new(transport));

    let cancel = CancellationToken::new();
    let mut tasks = TaskGroup::new(cancel.clone());

    tasks.spawn(
        "http",
        serve(config.http_addr, api::router(state.clone()), cancel.clone()),
    );
    if let Some(addr) = config.metrics_addr {
        tasks.spawn(
            "metrics",
            serve(addr, api::metrics_router(state.clone()), cancel.clone()),
        );
    }

    let responder = RegistryResponder::new(state.clone());
    let token = cancel.clone();
    tasks.spawn("registry-rpc", async move { responder.run(&connection, &token).await });

    tasks.spawn("reports", reports::run(bus, state.clone(), cancel.clone()));
    tasks.spawn(
        "health-monitor",
        HealthMonitor::new(state, config.sweep_interval).run(cancel.clone()),
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C; shutting down"),
        }
        shutdown.cancel();
    });

    let result = tasks.join().await;
    info!("traffic coordinator shut down");
    result
}
