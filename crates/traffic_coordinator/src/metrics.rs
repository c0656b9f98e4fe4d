//! Prometheus metrics of the coordinator.

use prometheus::{Encoder, IntCounter, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::registry::NodeRegistry;

pub struct CoordinatorMetrics {
    registry: Registry,
    pub nodes_registered: IntGauge,
    pub nodes_by_health: IntGaugeVec,
    pub zone_vehicles: IntGaugeVec,
    pub heartbeats_received: IntCounter,
    pub zone_reports: IntCounter,
}

impl CoordinatorMetrics {
    /// Create every collector and register it in a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector is rejected by the registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let nodes_registered = IntGauge::new("traffic_nodes_registered", "Zones known to the registry")?;
        let nodes_by_health = IntGaugeVec::new(
            Opts::new("traffic_nodes", "Zones per health state"),
            &["health"],
        )?;
        let zone_vehicles = IntGaugeVec::new(
            Opts::new("traffic_zone_vehicles", "Last reported vehicle count per zone"),
            &["zone"],
        )?;
        let heartbeats_received = IntCounter::new(
            "traffic_heartbeats_received_total",
            "Heartbeats accepted from zones",
        )?;
        let zone_reports = IntCounter::new(
            "traffic_zone_reports_total",
            "ZONE_STATE reports consumed",
        )?;

        registry.register(Box::new(nodes_registered.clone()))?;
        registry.register(Box::new(nodes_by_health.clone()))?;
        registry.register(Box::new(zone_vehicles.clone()))?;
        registry.register(Box::new(heartbeats_received.clone()))?;
        registry.register(Box::new(zone_reports.clone()))?;

        Ok(Self {
            registry,
            nodes_registered,
            nodes_by_health,
            zone_vehicles,
            heartbeats_received,
            zone_reports,
        })
    }

    /// Set the gauges from the current registry contents.
    pub fn refresh(&self, nodes: &NodeRegistry) {
        self.nodes_registered.set(gauge_value(nodes.len()));
        for (health, count) in nodes.health_counts() {
            self.nodes_by_health
                .with_label_values(&[health.as_str()])
                .set(gauge_value(count));
        }
        for record in nodes.list_nodes() {
            self.zone_vehicles
                .with_label_values(&[record.zone.as_str()])
                .set(gauge_value(record.vehicle_count));
        }
    }

    /// Encode all collectors in the Prometheus text format.
    ///
    /// Returns the content type and the encoded body.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> prometheus::Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

impl std::fmt::Debug for CoordinatorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorMetrics").finish_non_exhaustive()
    }
}

fn gauge_value(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use traffic_net::TrafficLevel;
    use traffic_net::rpc::RegisterRequest;

    use super::*;

    #[test]
    fn test_refresh_and_encode() {
        let metrics = CoordinatorMetrics::new().unwrap();
        let mut nodes = NodeRegistry::default();
        nodes
            .register(
                RegisterRequest {
                    zone: "A".into(),
                    queue: "A_queue".into(),
                    vehicle_count: 7,
                    traffic_level: TrafficLevel::Low,
                },
                Utc::now(),
            )
            .unwrap();
        metrics.heartbeats_received.inc();
        metrics.refresh(&nodes);

        let (content_type, body) = metrics.encode().unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("traffic_nodes_registered 1"));
        assert!(text.contains(r#"traffic_nodes{health="HEALTHY"} 1"#));
        assert!(text.contains(r#"traffic_nodes{health="UNHEALTHY"} 0"#));
        assert!(text.contains(r#"traffic_zone_vehicles{zone="A"} 7"#));
        assert!(text.contains("traffic_heartbeats_received_total 1"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = CoordinatorMetrics::new().unwrap();
        let b = CoordinatorMetrics::new().unwrap();
        a.zone_reports.inc();
        assert_eq!(a.zone_reports.get(), 1);
        assert_eq!(b.zone_reports.get(), 0);
    }
}
