//! # traffic_zone
//!
//! One zone of the distributed traffic simulation, run as a process.
//!
//! This crate provides:
//!
//! - [`config`]: Zone process configuration.
//! - [`context`]: Handles shared by the zone's tasks.
//! - [`handlers`]: Handlers for the zone's inbound queue.
//! - [`migration`]: Exit predicates and outbound vehicle hand-off.
//! - [`registry_client`]: Client of the coordinator's registry RPC.
//! - [`runner`]: The supervised set of periodic zone tasks.
//! - [`http`]: Metrics and snapshot endpoint.
//! - [`metrics`]: Prometheus collectors.

pub mod config;
pub mod context;
pub mod handlers;
pub mod http;
pub mod metrics;
pub mod migration;
pub mod registry_client;
pub mod runner;

pub use config::ZoneConfig;
pub use context::ZoneContext;
pub use migration::{AxisThreshold, ExitPredicate, MigrationCoordinator, PendingAcks, ScanReport};
pub use registry_client::{NatsRegistryClient, RegistryClient, RegistryClientError};
pub use runner::ZoneRunner;
