//! Vehicle identity, heading, and kinematic state.
//!
//! A [`Vehicle`] is plain data. All per-tick behaviour lives in
//! [`kinematics`](crate::kinematics) so the zone can run the steps in a fixed
//! order.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Identifier of a vehicle. Unique within a zone at any instant, and kept
/// unchanged when the vehicle migrates to another zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(String);

impl VehicleId {
    /// Create a vehicle id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for VehicleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Compass heading of a vehicle. Vehicles only ever travel along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Heading {
    /// Towards increasing y.
    North,
    /// Towards decreasing y.
    South,
    /// Towards increasing x.
    East,
    /// Towards decreasing x.
    West,
}

impl Heading {
    /// All four headings.
    pub const ALL: [Heading; 4] = [Heading::North, Heading::South, Heading::East, Heading::West];

    /// Unit vector pointing along this heading.
    #[must_use]
    pub const fn direction(self) -> DVec2 {
        match self {
            Heading::North => DVec2::Y,
            Heading::South => DVec2::NEG_Y,
            Heading::East => DVec2::X,
            Heading::West => DVec2::NEG_X,
        }
    }

    /// Returns `true` for headings that travel along the x axis.
    #[must_use]
    pub const fn is_horizontal(self) -> bool {
        matches!(self, Heading::East | Heading::West)
    }

    /// The opposite heading.
    #[must_use]
    pub const fn reversed(self) -> Self {
        match self {
            Heading::North => Heading::South,
            Heading::South => Heading::North,
            Heading::East => Heading::West,
            Heading::West => Heading::East,
        }
    }

    /// The two headings on the perpendicular axis.
    #[must_use]
    pub const fn perpendicular(self) -> [Heading; 2] {
        if self.is_horizontal() {
            [Heading::North, Heading::South]
        } else {
            [Heading::East, Heading::West]
        }
    }
}

/// A vehicle resident in a zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    /// Identifier, unique within the owning zone.
    pub id: VehicleId,
    /// World-space position.
    pub position: DVec2,
    /// Distance travelled per tick. Never negative.
    pub speed: f64,
    /// Current direction of travel.
    pub heading: Heading,
    /// `false` while the vehicle is held by a red light.
    pub moving: bool,
}

impl Vehicle {
    /// Create a moving vehicle.
    #[must_use]
    pub fn new(id: impl Into<VehicleId>, position: DVec2, speed: f64, heading: Heading) -> Self {
        Self {
            id: id.into(),
            position,
            speed,
            heading,
            moving: true,
        }
    }

    /// Where the vehicle would be after one unobstructed tick.
    #[must_use]
    pub fn tentative_position(&self) -> DVec2 {
        self.position + self.heading.direction() * self.speed
    }

    /// Coordinate along the heading's axis (x for east/west, y otherwise).
    #[must_use]
    pub fn along(&self) -> f64 {
        if self.heading.is_horizontal() {
            self.position.x
        } else {
            self.position.y
        }
    }

    /// Check that the vehicle can be integrated into a zone.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidVehicle`] for an empty id, a non-finite
    /// position, or a negative or non-finite speed.
    pub fn validate(&self) -> Result<(), SimError> {
        let reason = if self.id.as_str().is_empty() {
            "id is empty"
        } else if !self.position.is_finite() {
            "position is not finite"
        } else if !self.speed.is_finite() || self.speed < 0.0 {
            "speed must be finite and non-negative"
        } else {
            return Ok(());
        };
        Err(SimError::InvalidVehicle {
            id: self.id.clone(),
            reason: reason.to_string(),
        })
    }
}
