//! Simulation error types.

use crate::light::Phase;
use crate::vehicle::VehicleId;

/// Errors raised while building or mutating a zone.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// A vehicle with the same id is already resident in the zone.
    #[error("vehicle {0} is already present in the zone")]
    DuplicateVehicle(VehicleId),

    /// A vehicle carries kinematic state the simulator cannot integrate.
    #[error("invalid vehicle {id}: {reason}")]
    InvalidVehicle {
        /// The offending vehicle.
        id: VehicleId,
        /// Why it was rejected.
        reason: String,
    },

    /// A phase was configured with a zero-tick duration.
    #[error("duration of the {0:?} phase must be at least one tick")]
    InvalidDuration(Phase),

    /// A light schedule was configured with a zero-tick period.
    #[error("light schedule period must be at least one tick")]
    InvalidSchedule,

    /// The zone layout cannot produce a valid zone.
    #[error("invalid zone layout: {0}")]
    InvalidLayout(String),
}
