//! Road network derived from intersection coordinates.
//!
//! Every distinct intersection y-value is a horizontal road and every
//! distinct x-value is a vertical road. A road extends from its first to its
//! last intersection; vehicles reaching either end turn around.

use glam::DVec2;

use crate::intersection::Intersection;
use crate::vehicle::Heading;

/// Coordinates closer than this are treated as the same road.
const AXIS_EPSILON: f64 = 1e-9;

/// Inclusive bounds of a road along its own axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min: f64,
    pub max: f64,
}

impl Extent {
    /// Clamp a coordinate to this extent.
    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }

    /// End a vehicle travelling along `heading` enters from.
    #[must_use]
    pub fn entry(&self, heading: Heading) -> f64 {
        match heading {
            Heading::North | Heading::East => self.min,
            Heading::South | Heading::West => self.max,
        }
    }

    fn include(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// A single straight road.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Road {
    /// Position on the cross axis: y for horizontal roads, x for vertical.
    pub coord: f64,
    /// Bounds along the road's own axis.
    pub extent: Extent,
}

/// Read-only set of horizontal and vertical roads, each sorted by `coord`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoadNetwork {
    horizontal: Vec<Road>,
    vertical: Vec<Road>,
}

impl RoadNetwork {
    /// Derive the road network from intersection locations.
    #[must_use]
    pub fn from_intersections<'a>(intersections: impl IntoIterator<Item = &'a Intersection>) -> Self {
        let mut network = Self::default();
        for inter in intersections {
            let DVec2 { x, y } = inter.location;
            insert(&mut network.horizontal, y, x);
            insert(&mut network.vertical, x, y);
        }
        network
    }

    /// Returns `true` if there are no roads at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.horizontal.is_empty() && self.vertical.is_empty()
    }

    /// Horizontal roads, sorted by y.
    #[must_use]
    pub fn horizontal(&self) -> &[Road] {
        &self.horizontal
    }

    /// Vertical roads, sorted by x.
    #[must_use]
    pub fn vertical(&self) -> &[Road] {
        &self.vertical
    }

    /// The horizontal road nearest to `y`.
    #[must_use]
    pub fn nearest_horizontal(&self, y: f64) -> Option<&Road> {
        nearest(&self.horizontal, y)
    }

    /// The vertical road nearest to `x`.
    #[must_use]
    pub fn nearest_vertical(&self, x: f64) -> Option<&Road> {
        nearest(&self.vertical, x)
    }

    /// The road a vehicle at `position` travelling along `heading` belongs to.
    #[must_use]
    pub fn road_for(&self, heading: Heading, position: DVec2) -> Option<&Road> {
        if heading.is_horizontal() {
            self.nearest_horizontal(position.y)
        } else {
            self.nearest_vertical(position.x)
        }
    }
}

fn insert(roads: &mut Vec<Road>, coord: f64, along: f64) {
    let idx = roads.partition_point(|r| r.coord < coord - AXIS_EPSILON);
    match roads.get_mut(idx) {
        Some(road) if (road.coord - coord).abs() <= AXIS_EPSILON => road.extent.include(along),
        _ => roads.insert(
            idx,
            Road {
                coord,
                extent: Extent {
                    min: along,
                    max: along,
                },
            },
        ),
    }
}

// Ties go to the lower coordinate.
fn nearest(roads: &[Road], value: f64) -> Option<&Road> {
    let idx = roads.partition_point(|r| r.coord < value);
    let above = roads.get(idx);
    let below = idx.checked_sub(1).and_then(|i| roads.get(i));
    match (below, above) {
        (Some(b), Some(a)) => {
            if value - b.coord <= a.coord - value {
                Some(b)
            } else {
                Some(a)
            }
        }
        (b, a) => b.or(a),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> RoadNetwork {
        let inters = [
            Intersection::new("I1", DVec2::new(100.0, 100.0)),
            Intersection::new("I2", DVec2::new(300.0, 100.0)),
            Intersection::new("I3", DVec2::new(100.0, 300.0)),
            Intersection::new("I4", DVec2::new(300.0, 300.0)),
        ];
        RoadNetwork::from_intersections(&inters)
    }

    #[test]
    fn test_axes_are_sorted_and_deduplicated() {
        let roads = grid();
        let ys: Vec<f64> = roads.horizontal().iter().map(|r| r.coord).collect();
        let xs: Vec<f64> = roads.vertical().iter().map(|r| r.coord).collect();
        assert_eq!(ys, vec![100.0, 300.0]);
        assert_eq!(xs, vec![100.0, 300.0]);
    }

    #[test]
    fn test_extents_span_intersections() {
        let roads = grid();
        let road = roads.nearest_horizontal(100.0).unwrap();
        assert_eq!(road.extent, Extent { min: 100.0, max: 300.0 });
        let road = roads.nearest_vertical(300.0).unwrap();
        assert_eq!(road.extent, Extent { min: 100.0, max: 300.0 });
    }

    #[test]
    fn test_nearest_road() {
        let roads = grid();
        assert_eq!(roads.nearest_horizontal(150.0).unwrap().coord, 100.0);
        assert_eq!(roads.nearest_horizontal(250.0).unwrap().coord, 300.0);
        assert_eq!(roads.nearest_horizontal(-50.0).unwrap().coord, 100.0);
        assert_eq!(roads.nearest_horizontal(900.0).unwrap().coord, 300.0);
        // Exactly halfway resolves to the lower road.
        assert_eq!(roads.nearest_horizontal(200.0).unwrap().coord, 100.0);
    }

    #[test]
    fn test_road_for_heading() {
        let roads = grid();
        let road = roads
            .road_for(Heading::North, DVec2::new(290.0, 10.0))
            .unwrap();
        assert_eq!(road.coord, 300.0);
        let road = roads.road_for(Heading::West, DVec2::new(290.0, 120.0)).unwrap();
        assert_eq!(road.coord, 100.0);
    }

    #[test]
    fn test_empty_network() {
        let none: [Intersection; 0] = [];
        let roads = RoadNetwork::from_intersections(&none);
        assert!(roads.is_empty());
        assert!(roads.nearest_vertical(1.0).is_none());
    }
}
