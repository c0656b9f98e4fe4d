//! Immutable, serialisable views of a zone.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::intersection::Intersection;
use crate::light::{Phase, TrafficLight};
use crate::vehicle::Vehicle;

/// Observable state of a single light.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightView {
    pub id: String,
    pub position: DVec2,
    pub phase: Phase,
    pub timer: u32,
}

impl From<&TrafficLight> for LightView {
    fn from(light: &TrafficLight) -> Self {
        Self {
            id: light.id().to_string(),
            position: light.position(),
            phase: light.phase(),
            timer: light.timer(),
        }
    }
}

/// Point-in-time copy of everything a renderer or dashboard needs.
///
/// Vehicles are listed in id order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub zone: String,
    pub tick: u64,
    pub lights: Vec<LightView>,
    pub vehicles: Vec<Vehicle>,
    pub intersections: Vec<Intersection>,
}

impl ZoneSnapshot {
    /// Look up a vehicle by id.
    #[must_use]
    pub fn vehicle(&self, id: &str) -> Option<&Vehicle> {
        self.vehicles.iter().find(|v| v.id.as_str() == id)
    }

    /// Look up a light by id.
    #[must_use]
    pub fn light(&self, id: &str) -> Option<&LightView> {
        self.lights.iter().find(|l| l.id == id)
    }
}
