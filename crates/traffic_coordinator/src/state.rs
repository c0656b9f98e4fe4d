//! State shared by the HTTP API, the NATS responder, the report consumer and
//! the health monitor.
//!
//! Every operation takes the registry lock once, applies the change, refreshes
//! the metrics and releases the lock before returning.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use traffic_net::messages::{Health, ZoneState};
use traffic_net::rpc::{NodesResponse, RegisterRequest};

use crate::config::RegistryConfig;
use crate::metrics::CoordinatorMetrics;
use crate::registry::{NodeRegistry, RegistryError};

#[derive(Debug, Clone)]
pub struct CoordinatorState {
    registry: Arc<Mutex<NodeRegistry>>,
    metrics: Arc<CoordinatorMetrics>,
}

impl CoordinatorState {
    #[must_use]
    pub fn new(config: RegistryConfig, metrics: CoordinatorMetrics) -> Self {
        Self {
            registry: Arc::new(Mutex::new(NodeRegistry::new(config))),
            metrics: Arc::new(metrics),
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Arc<Mutex<NodeRegistry>> {
        &self.registry
    }

    #[must_use]
    pub fn metrics(&self) -> &CoordinatorMetrics {
        &self.metrics
    }

    /// Register a zone.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Invalid`] for a malformed request.
    pub async fn register(&self, req: RegisterRequest) -> Result<String, RegistryError> {
        let zone = req.zone.clone();
        let queue = req.queue.clone();
        let mut registry = self.registry.lock().await;
        registry.register(req, Utc::now())?;
        self.metrics.refresh(&registry);
        info!(zone = %zone, queue = %queue, "zone registered");
        Ok(format!("zone {zone} registered"))
    }

    /// Record a heartbeat and return the zone's new health.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotRegistered`] for an unknown zone.
    pub async fn heartbeat(&self, req: &RegisterRequest) -> Result<Health, RegistryError> {
        let mut registry = self.registry.lock().await;
        let health = registry.heartbeat(req, Utc::now())?;
        self.metrics.heartbeats_received.inc();
        self.metrics.refresh(&registry);
        debug!(zone = %req.zone, vehicles = req.vehicle_count, %health, "heartbeat");
        Ok(health)
    }

    /// Name of the least-loaded healthy zone outside `exclude`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoHealthyTarget`] if there is none.
    pub async fn least_loaded(&self, exclude: &[String]) -> Result<String, RegistryError> {
        let registry = self.registry.lock().await;
        let record = registry.least_loaded(exclude, Utc::now())?;
        Ok(record.zone.clone())
    }

    pub async fn nodes(&self) -> NodesResponse {
        self.registry.lock().await.views()
    }

    /// Apply a ZONE_STATE report. Returns `false` if the zone is unknown.
    pub async fn observe(&self, report: &ZoneState) -> bool {
        let mut registry = self.registry.lock().await;
        self.metrics.zone_reports.inc();
        let known = registry.observe_load(&report.zone, report.vehicle_count, report.traffic_level);
        self.metrics.refresh(&registry);
        known
    }

    /// Run one health sweep and return the zones that became UNHEALTHY.
    pub async fn sweep(&self) -> Vec<String> {
        let mut registry = self.registry.lock().await;
        let newly = registry.sweep(Utc::now());
        self.metrics.refresh(&registry);
        newly
    }
}

#[cfg(test)]
pub(crate) fn test_state() -> CoordinatorState {
    CoordinatorState::new(
        RegistryConfig::default(),
        CoordinatorMetrics::new().unwrap(),
    )
}

#[cfg(test)]
pub(crate) fn test_request(zone: &str, vehicles: usize, level: traffic_net::TrafficLevel) -> RegisterRequest {
    RegisterRequest {
        zone: zone.to_string(),
        queue: traffic_net::subjects::queue_name(zone),
        vehicle_count: vehicles,
        traffic_level: level,
    }
}

#[cfg(test)]
mod tests {
    use traffic_net::TrafficLevel;

    use super::*;

    #[tokio::test]
    async fn test_register_then_heartbeat_overloaded() {
        let state = test_state();
        state.register(test_request("A", 5, TrafficLevel::Low)).await.unwrap();
        let health = state
            .heartbeat(&test_request("A", 60, TrafficLevel::High))
            .await
            .unwrap();
        assert_eq!(health, Health::Overloaded);
        assert_eq!(state.metrics().heartbeats_received.get(), 1);
        assert_eq!(state.nodes().await["A"].health, Health::Overloaded);
    }

    #[tokio::test]
    async fn test_observe_counts_reports() {
        let state = test_state();
        state.register(test_request("A", 0, TrafficLevel::Low)).await.unwrap();
        let report = ZoneState {
            zone: "A".into(),
            vehicle_count: 12,
            traffic_level: TrafficLevel::Moderate,
        };
        assert!(state.observe(&report).await);
        assert!(
            !state
                .observe(&ZoneState {
                    zone: "B".into(),
                    ..report
                })
                .await
        );
        assert_eq!(state.metrics().zone_reports.get(), 2);
        assert_eq!(state.nodes().await["A"].vehicle_count, 12);
    }
}
