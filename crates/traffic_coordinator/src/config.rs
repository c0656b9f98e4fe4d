//! Coordinator configuration.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::TimeDelta;

/// Health classification thresholds of the node registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// A node whose last heartbeat is older than this is UNHEALTHY.
    pub heartbeat_timeout: TimeDelta,
    /// A node reporting more vehicles than this is OVERLOADED.
    pub overload_threshold: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: TimeDelta::seconds(15),
            overload_threshold: 50,
        }
    }
}

impl RegistryConfig {
    #[must_use]
    pub fn with_heartbeat_timeout(mut self, timeout: TimeDelta) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_overload_threshold(mut self, threshold: usize) -> Self {
        self.overload_threshold = threshold;
        self
    }
}

/// Everything the coordinator process needs to start.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Address of the registry HTTP API.
    pub http_addr: SocketAddr,
    /// Optional separate listener serving only `/metrics`.
    pub metrics_addr: Option<SocketAddr>,
    /// NATS server URL.
    pub nats_url: String,
    pub registry: RegistryConfig,
    /// Period of the health sweep.
    pub sweep_interval: Duration,
}
