//! Node registry: tracks every zone that has registered, its last reported
//! load and its health.
//!
//! Health is classified in two places:
//!
//! - on every heartbeat, as OVERLOADED or HEALTHY from the reported load;
//! - on every [`sweep`](NodeRegistry::sweep), as UNHEALTHY when the last
//!   heartbeat is older than the configured timeout.
//!
//! Records are never removed; a zone that comes back simply heartbeats or
//! registers again.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use traffic_net::messages::{Health, TrafficLevel};
use traffic_net::rpc::{FaultCode, NodeView, NodesResponse, RegisterRequest, RegistryFault};

use crate::config::RegistryConfig;

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The zone has never registered.
    #[error("zone {0} is not registered")]
    NotRegistered(String),

    /// No zone can currently accept vehicles.
    #[error("no healthy zone is available")]
    NoHealthyTarget,

    /// The request is missing required fields.
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl From<RegistryError> for RegistryFault {
    fn from(e: RegistryError) -> Self {
        let code = match e {
            RegistryError::NotRegistered(_) => FaultCode::NotRegistered,
            RegistryError::NoHealthyTarget => FaultCode::NoHealthyTarget,
            RegistryError::Invalid(_) => FaultCode::BadRequest,
        };
        RegistryFault::new(code, e)
    }
}

/// What the coordinator knows about one zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub zone: String,
    pub queue: String,
    pub vehicle_count: usize,
    pub traffic_level: TrafficLevel,
    pub last_heartbeat: DateTime<Utc>,
    pub health: Health,
    /// Order of first registration; breaks ties in target selection.
    seq: u64,
}

impl NodeRecord {
    #[must_use]
    pub fn view(&self) -> NodeView {
        NodeView {
            zone: self.zone.clone(),
            queue: self.queue.clone(),
            vehicle_count: self.vehicle_count,
            traffic_level: self.traffic_level,
            last_heartbeat: self.last_heartbeat,
            health: self.health,
        }
    }
}

/// Registry of all zones known to the coordinator.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<String, NodeRecord>,
    config: RegistryConfig,
    next_seq: u64,
}

impl NodeRegistry {
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            nodes: BTreeMap::new(),
            config,
            next_seq: 0,
        }
    }

    fn validate(req: &RegisterRequest) -> Result<(), RegistryError> {
        if req.zone.trim().is_empty() {
            return Err(RegistryError::Invalid("zone is empty".into()));
        }
        if req.queue.trim().is_empty() {
            return Err(RegistryError::Invalid("queue is empty".into()));
        }
        Ok(())
    }

    /// Create or overwrite the record of `req.zone` and mark it HEALTHY.
    ///
    /// Re-registration keeps the zone's original place in the tie-break
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Invalid`] for an empty zone or queue name.
    pub fn register(&mut self, req: RegisterRequest, now: DateTime<Utc>) -> Result<Health, RegistryError> {
        Self::validate(&req)?;
        let seq = match self.nodes.get(&req.zone) {
            Some(existing) => existing.seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.nodes.insert(
            req.zone.clone(),
            NodeRecord {
                zone: req.zone,
                queue: req.queue,
                vehicle_count: req.vehicle_count,
                traffic_level: req.traffic_level,
                last_heartbeat: now,
                health: Health::Healthy,
                seq,
            },
        );
        Ok(Health::Healthy)
    }

    /// Record a heartbeat and reclassify the zone from its reported load.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotRegistered`] if the zone is unknown.
    pub fn heartbeat(&mut self, req: &RegisterRequest, now: DateTime<Utc>) -> Result<Health, RegistryError> {
        let threshold = self.config.overload_threshold;
        let record = self
            .nodes
            .get_mut(&req.zone)
            .ok_or_else(|| RegistryError::NotRegistered(req.zone.clone()))?;
        if !req.queue.is_empty() {
            record.queue.clone_from(&req.queue);
        }
        record.vehicle_count = req.vehicle_count;
        record.traffic_level = req.traffic_level;
        record.last_heartbeat = now;
        record.health = if req.vehicle_count > threshold || req.traffic_level == TrafficLevel::High {
            Health::Overloaded
        } else {
            Health::Healthy
        };
        Ok(record.health)
    }

    /// Update the load figures of a registered zone without touching its
    /// heartbeat or health. Returns `false` for an unknown zone.
    pub fn observe_load(&mut self, zone: &str, vehicle_count: usize, traffic_level: TrafficLevel) -> bool {
        match self.nodes.get_mut(zone) {
            Some(record) => {
                record.vehicle_count = vehicle_count;
                record.traffic_level = traffic_level;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn get(&self, zone: &str) -> Option<&NodeRecord> {
        self.nodes.get(zone)
    }

    /// All records, in zone-name order.
    pub fn list_nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    /// Public views of every record, keyed by zone.
    #[must_use]
    pub fn views(&self) -> NodesResponse {
        self.nodes
            .iter()
            .map(|(zone, record)| (zone.clone(), record.view()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn is_stale(&self, record: &NodeRecord, now: DateTime<Utc>) -> bool {
        now - record.last_heartbeat > self.config.heartbeat_timeout
    }

    /// The HEALTHY, non-stale zone outside `exclude` with the fewest
    /// vehicles. Ties go to the zone that registered first.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoHealthyTarget`] if there is none.
    pub fn least_loaded(&self, exclude: &[String], now: DateTime<Utc>) -> Result<&NodeRecord, RegistryError> {
        self.nodes
            .values()
            .filter(|r| r.health == Health::Healthy)
            .filter(|r| !self.is_stale(r, now))
            .filter(|r| !exclude.iter().any(|z| z == &r.zone))
            .min_by_key(|r| (r.vehicle_count, r.seq))
            .ok_or(RegistryError::NoHealthyTarget)
    }

    /// Mark every zone whose heartbeat is older than the timeout UNHEALTHY.
    ///
    /// Returns the zones that became UNHEALTHY on this sweep.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = self.config.heartbeat_timeout;
        let mut newly = Vec::new();
        for record in self.nodes.values_mut() {
            if now - record.last_heartbeat > timeout && record.health != Health::Unhealthy {
                record.health = Health::Unhealthy;
                newly.push(record.zone.clone());
            }
        }
        newly
    }

    /// Number of zones in each health state.
    #[must_use]
    pub fn health_counts(&self) -> BTreeMap<Health, usize> {
        let mut counts: BTreeMap<Health, usize> = Health::ALL.into_iter().map(|h| (h, 0)).collect();
        for record in self.nodes.values() {
            *counts.entry(record.health).or_default() += 1;
        }
        counts
    }
}
