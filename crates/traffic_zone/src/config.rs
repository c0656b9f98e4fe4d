//! Zone process configuration.

use std::net::SocketAddr;
use std::time::Duration;

use traffic_net::RetryPolicy;
use traffic_net::connection::DEFAULT_NATS_URL;
use traffic_sim::{Bounds, DVec2, KinematicsConfig, ZoneLayout};

use crate::migration::DEFAULT_ACK_TIMEOUT;

/// Fraction of the zone span past which a vehicle leaves the zone.
pub const DEFAULT_EXIT_FRACTION: f64 = 0.65;

/// Configuration for a zone process.
#[derive(Debug, Clone)]
pub struct ZoneConfig {
    /// Zone name; also the prefix of its queue.
    pub name: String,
    /// Bootstrap layout of the zone.
    pub layout: ZoneLayout,
    /// RNG seed; random when `None`.
    pub seed: Option<u64>,
    pub kinematics: KinematicsConfig,
    /// Fraction of the bounds used by the default exit predicate.
    pub exit_fraction: f64,
    /// Period of the simulation tick.
    pub tick_interval: Duration,
    /// Period of registry heartbeats.
    pub heartbeat_interval: Duration,
    /// Period of ZONE_STATE reports.
    pub report_interval: Duration,
    /// Period of the migration scan.
    pub migration_interval: Duration,
    /// Age after which an unacknowledged hand-off is dropped.
    pub ack_timeout: Duration,
    /// Bound on every registry request.
    pub rpc_timeout: Duration,
    /// Retry policy of outbound publishes.
    pub retry: RetryPolicy,
    /// Address of the metrics and snapshot endpoint, if any.
    pub http_addr: Option<SocketAddr>,
    pub nats_url: String,
}

impl ZoneConfig {
    /// Configuration of a zone covering `bounds`, with default periods.
    #[must_use]
    pub fn new(name: impl Into<String>, bounds: Bounds) -> Self {
        Self {
            name: name.into(),
            layout: ZoneLayout::new(bounds),
            seed: None,
            kinematics: KinematicsConfig::default(),
            exit_fraction: DEFAULT_EXIT_FRACTION,
            tick_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(5),
            report_interval: Duration::from_secs(5),
            migration_interval: Duration::from_secs(1),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            rpc_timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            http_addr: None,
            nats_url: DEFAULT_NATS_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_layout(mut self, layout: ZoneLayout) -> Self {
        self.layout = layout;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_kinematics(mut self, kinematics: KinematicsConfig) -> Self {
        self.kinematics = kinematics;
        self
    }

    #[must_use]
    pub fn with_exit_fraction(mut self, fraction: f64) -> Self {
        self.exit_fraction = fraction;
        self
    }

    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    #[must_use]
    pub fn with_migration_interval(mut self, interval: Duration) -> Self {
        self.migration_interval = interval;
        self
    }

    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_http_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.http_addr = addr;
        self
    }

    #[must_use]
    pub fn with_nats_url(mut self, url: impl Into<String>) -> Self {
        self.nats_url = url.into();
        self
    }

    /// Exit coordinates of the default predicate.
    #[must_use]
    pub fn exit_point(&self) -> DVec2 {
        let fraction = self.exit_fraction.clamp(0.0, 1.0);
        self.layout.bounds.at(DVec2::splat(fraction))
    }
}
