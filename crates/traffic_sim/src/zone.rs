//! Zone simulator.
//!
//! A [`ZoneSimulator`] owns everything resident in one zone and advances it
//! one tick at a time:
//!
//! 1. Update every light whose schedule is due on this tick.
//! 2. Move every vehicle, in id order, through the kinematics steps.
//! 3. Advance the tick counter.

use std::collections::BTreeMap;

use glam::DVec2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, trace};

use crate::error::SimError;
use crate::intersection::Intersection;
use crate::kinematics::{self, KinematicsConfig};
use crate::light::TrafficLight;
use crate::road::RoadNetwork;
use crate::snapshot::{LightView, ZoneSnapshot};
use crate::vehicle::{Vehicle, VehicleId};

/// The authoritative state of a single zone.
#[derive(Debug)]
pub struct ZoneSimulator {
    name: String,
    vehicles: BTreeMap<VehicleId, Vehicle>,
    lights: Vec<TrafficLight>,
    intersections: Vec<Intersection>,
    roads: RoadNetwork,
    kinematics: KinematicsConfig,
    rng: StdRng,
    tick: u64,
}

impl ZoneSimulator {
    /// Create an empty zone with the given lights and intersections.
    ///
    /// The road network is derived from the intersections. Turning decisions
    /// draw from an OS-seeded generator; use [`with_seed`](Self::with_seed)
    /// for reproducible runs.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        lights: Vec<TrafficLight>,
        intersections: Vec<Intersection>,
    ) -> Self {
        let roads = RoadNetwork::from_intersections(&intersections);
        Self {
            name: name.into(),
            vehicles: BTreeMap::new(),
            lights,
            intersections,
            roads,
            kinematics: KinematicsConfig::default(),
            rng: StdRng::from_os_rng(),
            tick: 0,
        }
    }

    /// Reseed the turning generator.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    #[must_use]
    pub fn with_kinematics(mut self, kinematics: KinematicsConfig) -> Self {
        self.kinematics = kinematics;
        self
    }

    /// Advance the zone by one tick.
    pub fn tick(&mut self) {
        for light in &mut self.lights {
            if !light.schedule().is_due(self.tick) {
                continue;
            }
            if let Some(phase) = light.update() {
                trace!(zone = %self.name, light = light.id(), ?phase, "light changed phase");
            }
        }

        for vehicle in self.vehicles.values_mut() {
            let proceed = kinematics::can_proceed(vehicle, &self.lights, &self.kinematics);
            kinematics::advance(vehicle, proceed);
            kinematics::align_to_road(vehicle, &self.roads);
            let bounced = kinematics::clamp_and_bounce(vehicle, &self.roads);
            if !bounced {
                kinematics::reorient_at_intersection(
                    vehicle,
                    &self.intersections,
                    &self.kinematics,
                    &mut self.rng,
                );
            }
        }

        self.tick += 1;
    }

    /// Capture the current state of the zone.
    #[must_use]
    pub fn snapshot(&self) -> ZoneSnapshot {
        ZoneSnapshot {
            zone: self.name.clone(),
            tick: self.tick,
            lights: self.lights.iter().map(LightView::from).collect(),
            vehicles: self.vehicles.values().cloned().collect(),
            intersections: self.intersections.clone(),
        }
    }

    /// Insert a vehicle at its current position.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidVehicle`] if the vehicle fails validation,
    /// or [`SimError::DuplicateVehicle`] if its id is already resident.
    pub fn add_vehicle(&mut self, vehicle: Vehicle) -> Result<(), SimError> {
        vehicle.validate()?;
        if self.vehicles.contains_key(&vehicle.id) {
            return Err(SimError::DuplicateVehicle(vehicle.id));
        }
        self.vehicles.insert(vehicle.id.clone(), vehicle);
        Ok(())
    }

    /// Accept a vehicle migrating in from another zone.
    ///
    /// The vehicle is placed at the entry end of the local road matching its
    /// heading (the low end for north and east, the high end for south and
    /// west) and starts moving. Zones without roads keep its position.
    ///
    /// # Errors
    ///
    /// Same as [`add_vehicle`](Self::add_vehicle).
    pub fn admit(&mut self, mut vehicle: Vehicle) -> Result<(), SimError> {
        vehicle.validate()?;
        if self.vehicles.contains_key(&vehicle.id) {
            return Err(SimError::DuplicateVehicle(vehicle.id));
        }
        if let Some(road) = self.roads.road_for(vehicle.heading, vehicle.position) {
            let entry = road.extent.entry(vehicle.heading);
            if vehicle.heading.is_horizontal() {
                vehicle.position = DVec2::new(entry, road.coord);
            } else {
                vehicle.position = DVec2::new(road.coord, entry);
            }
        }
        vehicle.moving = true;
        debug!(zone = %self.name, vehicle = %vehicle.id, position = ?vehicle.position, "admitted vehicle");
        self.vehicles.insert(vehicle.id.clone(), vehicle);
        Ok(())
    }

    /// Remove a vehicle, returning it if it was resident.
    pub fn remove_vehicle(&mut self, id: &VehicleId) -> Option<Vehicle> {
        self.vehicles.remove(id)
    }

    #[must_use]
    pub fn vehicle(&self, id: &VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(id)
    }

    #[must_use]
    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Resident vehicles in id order.
    pub fn vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of ticks run so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    #[must_use]
    pub fn roads(&self) -> &RoadNetwork {
        &self.roads
    }

    #[must_use]
    pub fn lights(&self) -> &[TrafficLight] {
        &self.lights
    }

    #[must_use]
    pub fn intersections(&self) -> &[Intersection] {
        &self.intersections
    }

    #[must_use]
    pub fn kinematics(&self) -> &KinematicsConfig {
        &self.kinematics
    }
}
