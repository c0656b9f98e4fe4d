//! Static intersections.

use std::collections::BTreeSet;

use glam::DVec2;
use serde::{Deserialize, Serialize};

/// A crossing of a horizontal and a vertical road, controlled by zero or more
/// traffic lights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intersection {
    /// Identifier, unique within the zone.
    pub id: String,
    /// Center of the intersection.
    pub location: DVec2,
    /// Ids of the lights controlling this intersection.
    pub lights: BTreeSet<String>,
}

impl Intersection {
    /// Create an intersection with no associated lights.
    #[must_use]
    pub fn new(id: impl Into<String>, location: DVec2) -> Self {
        Self {
            id: id.into(),
            location,
            lights: BTreeSet::new(),
        }
    }

    /// Associate a light with this intersection.
    #[must_use]
    pub fn with_light(mut self, light_id: impl Into<String>) -> Self {
        self.lights.insert(light_id.into());
        self
    }

    /// Returns `true` if `point` lies within `tolerance` of the center.
    #[must_use]
    pub fn is_near(&self, point: DVec2, tolerance: f64) -> bool {
        self.location.distance(point) <= tolerance
    }
}
