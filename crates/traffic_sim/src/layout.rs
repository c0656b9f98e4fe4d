//! Bootstrap of a zone from its bounds.
//!
//! The default layout is a 2×2 grid: lights and intersections sit at 25 % and
//! 75 % of the bounds on each axis, and a handful of vehicles are spawned on
//! random roads with random headings.

use glam::DVec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SimError;
use crate::intersection::Intersection;
use crate::light::{LightSchedule, PhaseDurations, TrafficLight};
use crate::road::RoadNetwork;
use crate::vehicle::{Heading, Vehicle};
use crate::zone::ZoneSimulator;

/// Axis-aligned rectangle covered by a zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: DVec2,
    pub max: DVec2,
}

impl Bounds {
    #[must_use]
    pub fn new(min: DVec2, max: DVec2) -> Self {
        Self { min, max }
    }

    /// Width and height.
    #[must_use]
    pub fn span(&self) -> DVec2 {
        self.max - self.min
    }

    /// The point at the given fraction of the bounds on each axis.
    #[must_use]
    pub fn at(&self, fraction: DVec2) -> DVec2 {
        self.min + self.span() * fraction
    }

    #[must_use]
    pub fn contains(&self, point: DVec2) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}

/// Parameters for building a zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneLayout {
    pub bounds: Bounds,
    /// Fractions of the bounds at which grid lines are placed, on both axes.
    pub grid: Vec<f64>,
    /// Number of vehicles spawned at bootstrap.
    pub vehicles: usize,
    /// Speed of every spawned vehicle.
    pub speed: f64,
    pub durations: PhaseDurations,
    /// Lag, in ticks, between the first updates of consecutive lights.
    pub stagger: u64,
}

impl ZoneLayout {
    /// Default 2×2 layout over `bounds`.
    #[must_use]
    pub fn new(bounds: Bounds) -> Self {
        Self {
            bounds,
            grid: vec![0.25, 0.75],
            vehicles: 5,
            speed: 3.0,
            durations: PhaseDurations::default(),
            stagger: 1,
        }
    }

    #[must_use]
    pub fn with_grid(mut self, grid: Vec<f64>) -> Self {
        self.grid = grid;
        self
    }

    #[must_use]
    pub fn with_vehicles(mut self, vehicles: usize) -> Self {
        self.vehicles = vehicles;
        self
    }

    #[must_use]
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    #[must_use]
    pub fn with_durations(mut self, durations: PhaseDurations) -> Self {
        self.durations = durations;
        self
    }

    #[must_use]
    pub fn with_stagger(mut self, stagger: u64) -> Self {
        self.stagger = stagger;
        self
    }

    fn validate(&self) -> Result<(), SimError> {
        let Bounds { min, max } = self.bounds;
        if !min.is_finite() || !max.is_finite() || max.cmple(min).any() {
            return Err(SimError::InvalidLayout(format!(
                "bounds must be finite and non-empty, got {min} to {max}"
            )));
        }
        if self.grid.is_empty() {
            return Err(SimError::InvalidLayout("grid has no lines".into()));
        }
        if let Some(f) = self.grid.iter().find(|f| !(0.0..=1.0).contains(*f)) {
            return Err(SimError::InvalidLayout(format!(
                "grid fraction {f} is outside [0, 1]"
            )));
        }
        if !self.speed.is_finite() || self.speed < 0.0 {
            return Err(SimError::InvalidLayout(format!(
                "speed must be finite and non-negative, got {}",
                self.speed
            )));
        }
        self.durations.validate()
    }

    /// Build the zone named `name`.
    ///
    /// Ids are derived from the upper-cased name: lights `{NAME}-T{n}`,
    /// intersections `{NAME}-I{n}`, vehicles `{NAME}-V{n}`, all numbered from
    /// one. With a `seed`, both vehicle placement and the simulator's turning
    /// decisions are reproducible.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidLayout`] for empty or non-finite bounds, an
    /// empty grid, a grid fraction outside `[0, 1]`, or a bad speed, and
    /// [`SimError::InvalidDuration`] for a zero-length phase.
    pub fn build(&self, name: &str, seed: Option<u64>) -> Result<ZoneSimulator, SimError> {
        self.validate()?;
        let prefix = name.to_uppercase();
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut lights = Vec::new();
        let mut intersections = Vec::new();
        let mut idx = 1u64;
        for &fy in &self.grid {
            for &fx in &self.grid {
                let at = self.bounds.at(DVec2::new(fx, fy));
                let light_id = format!("{prefix}-T{idx}");
                let schedule = LightSchedule::new(1, (idx - 1) * self.stagger)?;
                lights.push(TrafficLight::new(&light_id, at, self.durations)?.with_schedule(schedule));
                intersections.push(Intersection::new(format!("{prefix}-I{idx}"), at).with_light(light_id));
                idx += 1;
            }
        }

        let roads = RoadNetwork::from_intersections(&intersections);
        let mut zone = ZoneSimulator::new(name, lights, intersections)
            .with_seed(rng.random());
        for n in 1..=self.vehicles {
            let heading = Heading::ALL[rng.random_range(0..Heading::ALL.len())];
            let position = spawn_point(&roads, heading, &mut rng);
            zone.add_vehicle(Vehicle::new(
                format!("{prefix}-V{n}"),
                position,
                self.speed,
                heading,
            ))?;
        }

        info!(
            zone = name,
            lights = zone.lights().len(),
            vehicles = zone.vehicle_count(),
            "zone built"
        );
        Ok(zone)
    }
}

// A random point on a random road matching the heading's axis.
fn spawn_point<R: Rng + ?Sized>(roads: &RoadNetwork, heading: Heading, rng: &mut R) -> DVec2 {
    let candidates = if heading.is_horizontal() {
        roads.horizontal()
    } else {
        roads.vertical()
    };
    let road = candidates[rng.random_range(0..candidates.len())];
    let along = if road.extent.max > road.extent.min {
        rng.random_range(road.extent.min..=road.extent.max)
    } else {
        road.extent.min
    };
    if heading.is_horizontal() {
        DVec2::new(along, road.coord)
    } else {
        DVec2::new(road.coord, along)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ZoneLayout {
        ZoneLayout::new(Bounds::new(DVec2::new(0.0, 0.0), DVec2::new(400.0, 400.0)))
    }

    #[test]
    fn test_default_grid() {
        let zone = layout().build("a", Some(3)).unwrap();
        assert_eq!(zone.name(), "a");
        assert_eq!(zone.lights().len(), 4);
        assert_eq!(zone.intersections().len(), 4);
        assert_eq!(zone.vehicle_count(), 5);

        let ids: Vec<&str> = zone.lights().iter().map(TrafficLight::id).collect();
        assert_eq!(ids, ["A-T1", "A-T2", "A-T3", "A-T4"]);
        assert_eq!(zone.intersections()[0].id, "A-I1");
        assert_eq!(zone.intersections()[0].location, DVec2::new(100.0, 100.0));
        assert_eq!(zone.intersections()[3].location, DVec2::new(300.0, 300.0));
        assert!(zone.intersections()[1].lights.contains("A-T2"));
        assert!(zone.vehicle(&"A-V5".into()).is_some());
    }

    #[test]
    fn test_lights_are_staggered() {
        let zone = layout().with_stagger(2).build("a", Some(3)).unwrap();
        let lags: Vec<u64> = zone.lights().iter().map(|l| l.schedule().lag()).collect();
        assert_eq!(lags, vec![0, 2, 4, 6]);
    }

    #[test]
    fn test_vehicles_spawn_on_roads() {
        let zone = layout().with_vehicles(40).build("b", Some(11)).unwrap();
        for v in zone.vehicles() {
            let (cross, along) = if v.heading.is_horizontal() {
                (v.position.y, v.position.x)
            } else {
                (v.position.x, v.position.y)
            };
            assert!(cross == 100.0 || cross == 300.0, "{} off road", v.id);
            assert!((100.0..=300.0).contains(&along));
            assert_eq!(v.speed, 3.0);
        }
    }

    #[test]
    fn test_seeded_builds_are_reproducible() {
        let a = layout().build("a", Some(9)).unwrap().snapshot();
        let b = layout().build("a", Some(9)).unwrap().snapshot();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_layouts_rejected() {
        let empty = ZoneLayout::new(Bounds::new(DVec2::ZERO, DVec2::new(0.0, 10.0)));
        assert!(matches!(empty.build("a", None), Err(SimError::InvalidLayout(_))));

        let outside = layout().with_grid(vec![0.5, 1.5]);
        assert!(matches!(outside.build("a", None), Err(SimError::InvalidLayout(_))));

        let stalled = layout().with_durations(PhaseDurations::new(3, 3, 0));
        assert!(matches!(stalled.build("a", None), Err(SimError::InvalidDuration(_))));
    }

    #[test]
    fn test_bounds_contains() {
        let bounds = Bounds::new(DVec2::ZERO, DVec2::new(10.0, 5.0));
        assert!(bounds.contains(DVec2::new(10.0, 5.0)));
        assert!(!bounds.contains(DVec2::new(10.5, 1.0)));
        assert_eq!(bounds.at(DVec2::splat(0.5)), DVec2::new(5.0, 2.5));
    }
}
