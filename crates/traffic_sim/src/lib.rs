//! # traffic_sim
//!
//! Simulation core for a single traffic zone.
//!
//! This crate provides:
//!
//! - [`light`]: Cyclic traffic-light phase state machine.
//! - [`vehicle`]: Vehicle identity, heading, and kinematic state.
//! - [`intersection`]: Static intersections and their associated lights.
//! - [`road`]: Road axes and extents derived from intersection coordinates.
//! - [`kinematics`]: Per-tick movement, obstruction, snapping, and turning.
//! - [`zone`]: The [`ZoneSimulator`] that owns and ticks a zone.
//! - [`snapshot`]: Immutable, serialisable views of a zone.
//! - [`layout`]: Bootstrap of a zone from its bounds.
//! - [`error`]: Simulation error types.

pub mod error;
pub mod intersection;
pub mod kinematics;
pub mod layout;
pub mod light;
pub mod road;
pub mod snapshot;
pub mod vehicle;
pub mod zone;

pub use error::SimError;
pub use intersection::Intersection;
pub use kinematics::KinematicsConfig;
pub use layout::{Bounds, ZoneLayout};
pub use light::{LightSchedule, Phase, PhaseDurations, TrafficLight};
pub use road::{Extent, Road, RoadNetwork};
pub use snapshot::{LightView, ZoneSnapshot};
pub use vehicle::{Heading, Vehicle, VehicleId};
pub use zone::ZoneSimulator;

// Re-export the vector type used for all positions.
pub use glam::DVec2;
