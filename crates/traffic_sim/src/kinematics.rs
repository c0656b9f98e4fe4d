//! Per-tick vehicle kinematics.
//!
//! The zone runs these steps for each vehicle, in this order:
//!
//! 1. [`can_proceed`]: is a red light in the way?
//! 2. [`advance`]: move by `speed` along the heading, or stop.
//! 3. [`align_to_road`]: snap the cross axis onto the nearest road.
//! 4. [`clamp_and_bounce`]: turn around at the end of the road.
//! 5. [`reorient_at_intersection`]: maybe turn onto the crossing road.
//!
//! Reorientation is skipped on a tick where the vehicle bounced.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::intersection::Intersection;
use crate::light::TrafficLight;
use crate::road::RoadNetwork;
use crate::vehicle::Vehicle;

/// Tunable thresholds for vehicle movement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinematicsConfig {
    /// How far beyond its next position a vehicle looks for red lights.
    pub lookahead: f64,
    /// Maximum cross-axis offset at which a light still applies to a vehicle.
    pub lateral_tolerance: f64,
    /// Distance from an intersection center within which a vehicle may turn.
    pub intersection_tolerance: f64,
    /// Probability of turning when at an intersection, in `[0, 1]`.
    pub turn_probability: f64,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            lookahead: 10.0,
            lateral_tolerance: 5.0,
            intersection_tolerance: 2.0,
            turn_probability: 0.3,
        }
    }
}

impl KinematicsConfig {
    #[must_use]
    pub fn with_lookahead(mut self, lookahead: f64) -> Self {
        self.lookahead = lookahead;
        self
    }

    #[must_use]
    pub fn with_lateral_tolerance(mut self, tolerance: f64) -> Self {
        self.lateral_tolerance = tolerance;
        self
    }

    #[must_use]
    pub fn with_intersection_tolerance(mut self, tolerance: f64) -> Self {
        self.intersection_tolerance = tolerance;
        self
    }

    /// Set the turn probability, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_turn_probability(mut self, probability: f64) -> Self {
        self.turn_probability = probability;
        self
    }

    fn turn_probability(&self) -> f64 {
        if self.turn_probability.is_nan() {
            0.0
        } else {
            self.turn_probability.clamp(0.0, 1.0)
        }
    }
}

/// Returns `false` if a red light lies ahead of the vehicle, no further than
/// `lookahead` past its tentative next position, and within the lateral
/// tolerance of its road. Green and yellow lights never block.
#[must_use]
pub fn can_proceed<'a>(
    vehicle: &Vehicle,
    lights: impl IntoIterator<Item = &'a TrafficLight>,
    config: &KinematicsConfig,
) -> bool {
    let dir = vehicle.heading.direction();
    let reach = vehicle.speed + config.lookahead;
    !lights.into_iter().any(|light| {
        if !light.phase().blocks() {
            return false;
        }
        let offset = light.position() - vehicle.position;
        let ahead = offset.dot(dir);
        let lateral = (offset - dir * ahead).length();
        (0.0..=reach).contains(&ahead) && lateral <= config.lateral_tolerance
    })
}

/// Move the vehicle one tick along its heading, or hold it in place.
pub fn advance(vehicle: &mut Vehicle, proceed: bool) {
    if proceed {
        vehicle.position = vehicle.tentative_position();
        vehicle.moving = true;
    } else {
        vehicle.moving = false;
    }
}

/// Snap the cross-axis coordinate onto the nearest road for the heading.
pub fn align_to_road(vehicle: &mut Vehicle, roads: &RoadNetwork) {
    let Some(road) = roads.road_for(vehicle.heading, vehicle.position) else {
        return;
    };
    if vehicle.heading.is_horizontal() {
        vehicle.position.y = road.coord;
    } else {
        vehicle.position.x = road.coord;
    }
}

/// Treat both ends of the current road as walls: clamp the vehicle to the
/// road's extent and reverse its heading.
///
/// Returns `true` if the vehicle bounced. Stopped vehicles never bounce.
pub fn clamp_and_bounce(vehicle: &mut Vehicle, roads: &RoadNetwork) -> bool {
    if !vehicle.moving {
        return false;
    }
    let Some(road) = roads.road_for(vehicle.heading, vehicle.position) else {
        return false;
    };
    let along = vehicle.along();
    if road.extent.contains(along) {
        return false;
    }
    let clamped = road.extent.clamp(along);
    if vehicle.heading.is_horizontal() {
        vehicle.position.x = clamped;
    } else {
        vehicle.position.y = clamped;
    }
    vehicle.heading = vehicle.heading.reversed();
    true
}

/// At an intersection, turn onto the perpendicular road with the configured
/// probability. A turning vehicle is placed on the intersection center so it
/// sits on the new road.
///
/// Returns `true` if the vehicle turned. Stopped vehicles never turn.
pub fn reorient_at_intersection<R: Rng + ?Sized>(
    vehicle: &mut Vehicle,
    intersections: &[Intersection],
    config: &KinematicsConfig,
    rng: &mut R,
) -> bool {
    if !vehicle.moving {
        return false;
    }
    let Some(inter) = intersections
        .iter()
        .find(|i| i.is_near(vehicle.position, config.intersection_tolerance))
    else {
        return false;
    };
    if !rng.random_bool(config.turn_probability()) {
        return false;
    }
    let options = vehicle.heading.perpendicular();
    vehicle.heading = options[rng.random_range(0..options.len())];
    vehicle.position = inter.location;
    true
}

#[cfg(test)]
mod tests {
    use glam::DVec2;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::light::{Phase, PhaseDurations};
    use crate::vehicle::Heading;

    fn roads() -> (Vec<Intersection>, RoadNetwork) {
        let inters = vec![
            Intersection::new("I1", DVec2::new(100.0, 100.0)),
            Intersection::new("I2", DVec2::new(300.0, 100.0)),
            Intersection::new("I3", DVec2::new(100.0, 300.0)),
            Intersection::new("I4", DVec2::new(300.0, 300.0)),
        ];
        let network = RoadNetwork::from_intersections(&inters);
        (inters, network)
    }

    fn light_in(phase: Phase, position: DVec2) -> TrafficLight {
        let mut light = TrafficLight::new("T1", position, PhaseDurations::new(1, 1, 1)).unwrap();
        while light.phase() != phase {
            light.update();
        }
        light
    }

    #[test]
    fn test_red_light_ahead_blocks() {
        let config = KinematicsConfig::default();
        let v = Vehicle::new("V1", DVec2::new(90.0, 100.0), 3.0, Heading::East);
        let red = light_in(Phase::Red, DVec2::new(100.0, 100.0));
        assert!(!can_proceed(&v, [&red], &config));
    }

    #[test]
    fn test_green_and_yellow_never_block() {
        let config = KinematicsConfig::default();
        let v = Vehicle::new("V1", DVec2::new(95.0, 100.0), 3.0, Heading::East);
        let green = light_in(Phase::Green, DVec2::new(100.0, 100.0));
        let yellow = light_in(Phase::Yellow, DVec2::new(100.0, 100.0));
        assert!(can_proceed(&v, [&green, &yellow], &config));
    }

    #[test]
    fn test_red_light_behind_or_far_does_not_block() {
        let config = KinematicsConfig::default();
        let v = Vehicle::new("V1", DVec2::new(150.0, 100.0), 3.0, Heading::East);
        let behind = light_in(Phase::Red, DVec2::new(100.0, 100.0));
        let far = light_in(Phase::Red, DVec2::new(300.0, 100.0));
        let beside = light_in(Phase::Red, DVec2::new(155.0, 140.0));
        assert!(can_proceed(&v, [&behind, &far, &beside], &config));
    }

    #[test]
    fn test_advance_moves_or_stops() {
        let mut v = Vehicle::new("V1", DVec2::new(0.0, 0.0), 2.5, Heading::North);
        advance(&mut v, true);
        assert_eq!(v.position, DVec2::new(0.0, 2.5));
        assert!(v.moving);
        advance(&mut v, false);
        assert_eq!(v.position, DVec2::new(0.0, 2.5));
        assert!(!v.moving);
        advance(&mut v, true);
        assert!(v.moving);
    }

    #[test]
    fn test_align_snaps_cross_axis() {
        let (_, network) = roads();
        let mut v = Vehicle::new("V1", DVec2::new(150.0, 112.0), 1.0, Heading::East);
        align_to_road(&mut v, &network);
        assert_eq!(v.position, DVec2::new(150.0, 100.0));

        let mut v = Vehicle::new("V2", DVec2::new(280.0, 150.0), 1.0, Heading::South);
        align_to_road(&mut v, &network);
        assert_eq!(v.position, DVec2::new(300.0, 150.0));
    }

    #[test]
    fn test_bounce_at_road_end() {
        let (_, network) = roads();
        let mut v = Vehicle::new("V1", DVec2::new(302.0, 100.0), 3.0, Heading::East);
        assert!(clamp_and_bounce(&mut v, &network));
        assert_eq!(v.position, DVec2::new(300.0, 100.0));
        assert_eq!(v.heading, Heading::West);

        let mut v = Vehicle::new("V2", DVec2::new(100.0, 97.0), 3.0, Heading::South);
        assert!(clamp_and_bounce(&mut v, &network));
        assert_eq!(v.position, DVec2::new(100.0, 100.0));
        assert_eq!(v.heading, Heading::North);
    }

    #[test]
    fn test_stopped_vehicle_never_bounces_or_turns() {
        let (inters, network) = roads();
        let mut rng = StdRng::seed_from_u64(7);
        let config = KinematicsConfig::default().with_turn_probability(1.0);

        let mut v = Vehicle::new("V1", DVec2::new(302.0, 100.0), 3.0, Heading::East);
        v.moving = false;
        assert!(!clamp_and_bounce(&mut v, &network));
        assert_eq!(v.heading, Heading::East);

        let mut v = Vehicle::new("V2", DVec2::new(100.0, 100.0), 3.0, Heading::East);
        v.moving = false;
        assert!(!reorient_at_intersection(&mut v, &inters, &config, &mut rng));
        assert_eq!(v.heading, Heading::East);
    }

    #[test]
    fn test_turn_at_intersection() {
        let (inters, _) = roads();
        let mut rng = StdRng::seed_from_u64(7);
        let always = KinematicsConfig::default().with_turn_probability(1.0);
        let never = KinematicsConfig::default().with_turn_probability(0.0);

        let mut v = Vehicle::new("V1", DVec2::new(299.0, 100.0), 3.0, Heading::East);
        assert!(!reorient_at_intersection(&mut v, &inters, &never, &mut rng));
        assert_eq!(v.heading, Heading::East);

        assert!(reorient_at_intersection(&mut v, &inters, &always, &mut rng));
        assert!(!v.heading.is_horizontal());
        assert_eq!(v.position, DVec2::new(300.0, 100.0));
    }

    #[test]
    fn test_no_turn_away_from_intersections() {
        let (inters, _) = roads();
        let mut rng = StdRng::seed_from_u64(7);
        let always = KinematicsConfig::default().with_turn_probability(1.0);
        let mut v = Vehicle::new("V1", DVec2::new(200.0, 100.0), 3.0, Heading::East);
        assert!(!reorient_at_intersection(&mut v, &inters, &always, &mut rng));
        assert_eq!(v.heading, Heading::East);
    }
}
