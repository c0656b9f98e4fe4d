//! Prometheus metrics of a zone process.

use prometheus::{Encoder, IntCounter, IntGaugeVec, Opts, Registry, TextEncoder};

pub struct ZoneMetrics {
    registry: Registry,
    pub zone_vehicles: IntGaugeVec,
    pub heartbeats_sent: IntCounter,
    pub migrations_sent: IntCounter,
    pub migrations_received: IntCounter,
    pub migrations_failed: IntCounter,
    pub migrations_unacknowledged: IntCounter,
}

impl ZoneMetrics {
    /// Create every collector in a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector is rejected by the registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let zone_vehicles = IntGaugeVec::new(
            Opts::new("traffic_zone_vehicles", "Vehicles resident in the zone"),
            &["zone"],
        )?;
        let heartbeats_sent = IntCounter::new("traffic_heartbeats_sent_total", "Heartbeats accepted by the registry")?;
        let migrations_sent = IntCounter::new("traffic_migrations_sent_total", "Vehicles handed to another zone")?;
        let migrations_received = IntCounter::new(
            "traffic_migrations_received_total",
            "Vehicles admitted from another zone",
        )?;
        let migrations_failed = IntCounter::new(
            "traffic_migrations_failed_total",
            "Hand-offs whose publish failed after every retry",
        )?;

        let migrations_unacknowledged = IntCounter::new(
            "traffic_migrations_unacknowledged_total",
            "Hand-offs dropped after no ACK arrived in time",
        )?;

        registry.register(Box::new(zone_vehicles.clone()))?;
        registry.register(Box::new(heartbeats_sent.clone()))?;
        registry.register(Box::new(migrations_sent.clone()))?;
        registry.register(Box::new(migrations_received.clone()))?;
        registry.register(Box::new(migrations_failed.clone()))?;
        registry.register(Box::new(migrations_unacknowledged.clone()))?;

        Ok(Self {
            registry,
            zone_vehicles,
            heartbeats_sent,
            migrations_sent,
            migrations_received,
            migrations_failed,
            migrations_unacknowledged,
        })
    }

    pub fn set_vehicles(&self, zone: &str, count: usize) {
        self.zone_vehicles
            .with_label_values(&[zone])
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Encode all collectors in the Prometheus text format.
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

impl std::fmt::Debug for ZoneMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneMetrics").finish_non_exhaustive()
    }
}
