//! Geographic utilities for the segment network.
//!
//! Distance math comes in two flavors and both are used deliberately:
//! haversine meters for anything user-facing (search radii, path length)
//! and plain Euclidean degrees for segment-endpoint equality, which is
//! how the matching tolerance is defined and is accurate enough at city
//! scale. Tolerance bucketing ([`CoordKey`]) turns a coordinate into a
//! discrete grid cell so endpoints can be indexed in hash maps.

use geo::{Distance, Haversine, Point};

use crate::Coordinate;

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance between two coordinates in meters.
///
/// # Example
/// ```
/// use path_network::{geo_utils, Coordinate};
///
/// let a = Coordinate::new(51.5074, -0.1278); // London
/// let b = Coordinate::new(48.8566, 2.3522); // Paris
/// let d = geo_utils::haversine_distance(&a, &b);
/// assert!((d - 343_560.0).abs() < 5_000.0);
/// ```
#[inline]
pub fn haversine_distance(a: &Coordinate, b: &Coordinate) -> f64 {
    let p1 = Point::new(a.lng, a.lat);
    let p2 = Point::new(b.lng, b.lat);
    Haversine::distance(p1, p2)
}

/// Euclidean distance between two coordinates in raw degrees.
///
/// Segment matching tolerance is defined on this metric: cheap, and at
/// city scale the latitude distortion stays well below the ~5 m
/// tolerance it guards.
#[inline]
pub fn degree_distance(a: &Coordinate, b: &Coordinate) -> f64 {
    let dlat = a.lat - b.lat;
    let dlng = a.lng - b.lng;
    (dlat * dlat + dlng * dlng).sqrt()
}

/// Total length of a polyline in meters. Fewer than 2 points is 0.0.
pub fn polyline_length(points: &[Coordinate]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Convert meters to approximate degrees at a given latitude.
///
/// Conservative (uses the longitude shrink factor), suitable for sizing
/// square search windows around a point.
#[inline]
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    // At the equator, 1 degree is about 111,320 meters; longitude degrees
    // shrink with cos(latitude).
    let lat_rad = latitude.to_radians();
    let meters_per_degree = 111_320.0 * lat_rad.cos().max(0.1);
    meters / meters_per_degree
}

/// Drop points that sit within `tolerance_deg` of the previously kept
/// point. Snapped GPS traces often contain runs of identical output
/// coordinates, which would otherwise decompose into degenerate
/// segments.
pub fn dedup_consecutive(points: &[Coordinate], tolerance_deg: f64) -> Vec<Coordinate> {
    let mut kept: Vec<Coordinate> = Vec::with_capacity(points.len());
    for point in points {
        match kept.last() {
            Some(last) if degree_distance(last, point) <= tolerance_deg => {}
            _ => kept.push(*point),
        }
    }
    kept
}

// =============================================================================
// Tolerance Bucketing
// =============================================================================

/// A coordinate rounded onto a tolerance-sized grid.
///
/// Two coordinates within one tolerance of each other land either in the
/// same cell or in adjacent cells, so an exact-match lookup plus a 3x3
/// [`CoordKey::neighborhood`] scan finds every candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoordKey {
    pub lat_cell: i64,
    pub lng_cell: i64,
}

impl CoordKey {
    /// Bucket a coordinate at the given cell size in degrees.
    pub fn bucket(coord: &Coordinate, cell_deg: f64) -> Self {
        Self {
            lat_cell: (coord.lat / cell_deg).floor() as i64,
            lng_cell: (coord.lng / cell_deg).floor() as i64,
        }
    }

    /// The 3x3 block of cells centered on this one, self included.
    pub fn neighborhood(&self) -> impl Iterator<Item = CoordKey> + '_ {
        let lat = self.lat_cell;
        let lng = self.lng_cell;
        (-1..=1).flat_map(move |dy| {
            (-1..=1).map(move |dx| CoordKey {
                lat_cell: lat + dy,
                lng_cell: lng + dx,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_haversine_distance_same_point() {
        let p = Coordinate::new(51.5074, -0.1278);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_haversine_distance_known_value() {
        // London to Paris is approximately 344 km
        let london = Coordinate::new(51.5074, -0.1278);
        let paris = Coordinate::new(48.8566, 2.3522);
        let dist = haversine_distance(&london, &paris);
        assert!(approx_eq(dist, 343_560.0, 5_000.0));
    }

    #[test]
    fn test_degree_distance() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0003, 0.0004);
        assert!(approx_eq(degree_distance(&a, &b), 0.0005, 1e-12));
    }

    #[test]
    fn test_polyline_length_short_inputs() {
        assert_eq!(polyline_length(&[]), 0.0);
        assert_eq!(polyline_length(&[Coordinate::new(51.0, 0.0)]), 0.0);
    }

    #[test]
    fn test_polyline_length_two_points() {
        let track = vec![
            Coordinate::new(51.5074, -0.1278),
            Coordinate::new(51.5080, -0.1280),
        ];
        let length = polyline_length(&track);
        assert!(length > 0.0);
        assert!(length < 100.0); // about 68m
    }

    #[test]
    fn test_meters_to_degrees() {
        // At the equator, 111km is one degree
        let deg = meters_to_degrees(111_320.0, 0.0);
        assert!(approx_eq(deg, 1.0, 0.01));

        // Same distance spans more degrees at higher latitude
        let deg_45 = meters_to_degrees(111_320.0, 45.0);
        assert!(deg_45 > 1.0);
    }

    #[test]
    fn test_dedup_consecutive_collapses_runs() {
        let tol = 0.00005;
        let a = Coordinate::new(51.5000, -0.1200);
        let a_dup = Coordinate::new(51.500001, -0.120001);
        let b = Coordinate::new(51.5010, -0.1190);
        let deduped = dedup_consecutive(&[a, a_dup, a_dup, b, b], tol);
        assert_eq!(deduped, vec![a, b]);

        // Distinct points survive untouched
        let clean = dedup_consecutive(&[a, b], tol);
        assert_eq!(clean.len(), 2);
    }

    #[test]
    fn test_coord_key_same_cell() {
        let tol = 0.00005;
        let a = Coordinate::new(51.500010, -0.127710);
        let b = Coordinate::new(51.500011, -0.127711);
        assert_eq!(CoordKey::bucket(&a, tol), CoordKey::bucket(&b, tol));
    }

    #[test]
    fn test_coord_key_neighborhood_covers_tolerance() {
        let tol = 0.00005;
        // Points a hair apart but straddling a cell boundary
        let a = Coordinate::new(0.000049, 0.0);
        let b = Coordinate::new(0.000051, 0.0);
        let key_a = CoordKey::bucket(&a, tol);
        let key_b = CoordKey::bucket(&b, tol);
        assert_ne!(key_a, key_b);
        assert!(key_a.neighborhood().any(|k| k == key_b));
    }

    #[test]
    fn test_coord_key_negative_coords() {
        let tol = 0.00005;
        let a = Coordinate::new(-33.8688, 151.2093); // Sydney
        let key = CoordKey::bucket(&a, tol);
        assert!(key.lat_cell < 0);
        assert!(key.lng_cell > 0);
        assert_eq!(key.neighborhood().count(), 9);
    }
}
