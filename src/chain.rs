//! Chain reconstruction.
//!
//! A path's segments are stored as a set; this module recovers the
//! traversal order. Endpoints within the match tolerance are collapsed
//! onto canonical nodes, segments become directed edges between nodes,
//! and a valid path is a graph with exactly one simple walk that covers
//! every edge. Anything else is rejected with a typed error rather than
//! repaired: a fork is [`NetworkError::BranchingPath`], a closed loop is
//! [`NetworkError::CyclicPath`], and two unconnected pieces are
//! [`NetworkError::DisjointSegments`].

use std::collections::HashMap;

use crate::error::{NetworkError, Result};
use crate::geo_utils::{degree_distance, CoordKey};
use crate::{Coordinate, Segment};

/// Collapses nearby endpoints onto canonical node ids.
///
/// The first coordinate seen for a node becomes its representative;
/// later endpoints within the tolerance map to the same id.
struct NodeIndex {
    tolerance_deg: f64,
    cells: HashMap<CoordKey, Vec<usize>>,
    coords: Vec<Coordinate>,
}

impl NodeIndex {
    fn new(tolerance_deg: f64) -> Self {
        Self {
            tolerance_deg,
            cells: HashMap::new(),
            coords: Vec::new(),
        }
    }

    fn canonicalize(&mut self, coord: &Coordinate) -> usize {
        let key = CoordKey::bucket(coord, self.tolerance_deg);
        for cell in key.neighborhood() {
            let Some(ids) = self.cells.get(&cell) else {
                continue;
            };
            for &id in ids {
                if degree_distance(&self.coords[id], coord) <= self.tolerance_deg {
                    return id;
                }
            }
        }

        let id = self.coords.len();
        self.coords.push(*coord);
        self.cells.entry(key).or_default().push(id);
        id
    }
}

/// Recover the traversal order of an unordered set of segments.
///
/// Returns segment ids in walk order. The empty set reconstructs to an
/// empty chain.
///
/// # Errors
///
/// - [`NetworkError::BranchingPath`] when any node has two or more
///   outgoing (or incoming) segments
/// - [`NetworkError::CyclicPath`] when every node is balanced and no
///   start exists
/// - [`NetworkError::DisjointSegments`] when the walk from the start
///   ends before covering every segment
///
/// # Example
/// ```
/// use path_network::chain::reconstruct_chain;
/// use path_network::{Coordinate, Segment};
///
/// let a = Coordinate::new(51.5000, -0.1200);
/// let b = Coordinate::new(51.5010, -0.1190);
/// let c = Coordinate::new(51.5020, -0.1180);
/// let segments = vec![
///     Segment { id: "seg-2".to_string(), start: b, end: c },
///     Segment { id: "seg-1".to_string(), start: a, end: b },
/// ];
///
/// let order = reconstruct_chain(&segments, 0.00005).unwrap();
/// assert_eq!(order, vec!["seg-1".to_string(), "seg-2".to_string()]);
/// ```
pub fn reconstruct_chain(segments: &[Segment], tolerance_deg: f64) -> Result<Vec<String>> {
    if segments.is_empty() {
        return Ok(Vec::new());
    }

    let mut nodes = NodeIndex::new(tolerance_deg);
    let mut out_edges: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut in_degree: HashMap<usize, usize> = HashMap::new();
    let mut endpoints = Vec::with_capacity(segments.len());

    for (i, segment) in segments.iter().enumerate() {
        let start = nodes.canonicalize(&segment.start);
        let end = nodes.canonicalize(&segment.end);
        out_edges.entry(start).or_default().push(i);
        *in_degree.entry(end).or_insert(0) += 1;
        endpoints.push((start, end));
    }

    for (&node, edges) in &out_edges {
        if edges.len() > 1 {
            let coord = nodes.coords[node];
            return Err(NetworkError::BranchingPath {
                lat: coord.lat,
                lng: coord.lng,
                fan_out: edges.len(),
            });
        }
    }
    for (&node, &degree) in &in_degree {
        if degree > 1 {
            let coord = nodes.coords[node];
            return Err(NetworkError::BranchingPath {
                lat: coord.lat,
                lng: coord.lng,
                fan_out: degree,
            });
        }
    }

    // Chain starts are nodes with an outgoing segment and no incoming one.
    let mut starts: Vec<usize> = out_edges
        .keys()
        .filter(|node| !in_degree.contains_key(node))
        .copied()
        .collect();

    if starts.is_empty() {
        // Every node balanced and nothing dangling: a closed loop.
        return Err(NetworkError::CyclicPath {
            segment_count: segments.len(),
        });
    }

    // With several disconnected chains there are several starts; walk
    // from the geographically smallest so the reachable count in the
    // error is deterministic.
    starts.sort_by(|a, b| {
        let ca = nodes.coords[*a];
        let cb = nodes.coords[*b];
        ca.lat
            .total_cmp(&cb.lat)
            .then_with(|| ca.lng.total_cmp(&cb.lng))
    });

    let mut order = Vec::with_capacity(segments.len());
    let mut current = starts[0];
    while let Some(edges) = out_edges.get(&current) {
        let idx = edges[0];
        order.push(idx);
        current = endpoints[idx].1;
    }

    if order.len() < segments.len() {
        return Err(NetworkError::DisjointSegments {
            reachable: order.len(),
            total: segments.len(),
        });
    }

    Ok(order.into_iter().map(|i| segments[i].id.clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 0.00005;

    fn seg(id: &str, start: Coordinate, end: Coordinate) -> Segment {
        Segment {
            id: id.to_string(),
            start,
            end,
        }
    }

    fn points() -> [Coordinate; 5] {
        [
            Coordinate::new(51.5000, -0.1200),
            Coordinate::new(51.5010, -0.1190),
            Coordinate::new(51.5020, -0.1180),
            Coordinate::new(51.5030, -0.1170),
            Coordinate::new(51.5040, -0.1160),
        ]
    }

    #[test]
    fn test_single_segment() {
        let [a, b, ..] = points();
        let order = reconstruct_chain(&[seg("seg-1", a, b)], TOL).unwrap();
        assert_eq!(order, vec!["seg-1".to_string()]);
    }

    #[test]
    fn test_empty_set() {
        assert_eq!(reconstruct_chain(&[], TOL).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_recovers_order_from_any_permutation() {
        let [a, b, c, d, e] = points();
        let chain = [
            seg("seg-1", a, b),
            seg("seg-2", b, c),
            seg("seg-3", c, d),
            seg("seg-4", d, e),
        ];
        let expected: Vec<String> = chain.iter().map(|s| s.id.clone()).collect();

        // Rotate through a handful of shuffles
        let permutations: [[usize; 4]; 4] = [
            [0, 1, 2, 3],
            [3, 2, 1, 0],
            [2, 0, 3, 1],
            [1, 3, 0, 2],
        ];
        for perm in permutations {
            let shuffled: Vec<Segment> = perm.iter().map(|&i| chain[i].clone()).collect();
            assert_eq!(reconstruct_chain(&shuffled, TOL).unwrap(), expected);
        }
    }

    #[test]
    fn test_joins_endpoints_within_tolerance() {
        let [a, b, c, ..] = points();
        // Second segment starts a hair away from where the first ends
        let b_nudged = Coordinate::new(b.lat + 0.00002, b.lng - 0.00001);
        let order =
            reconstruct_chain(&[seg("seg-2", b_nudged, c), seg("seg-1", a, b)], TOL).unwrap();
        assert_eq!(order, vec!["seg-1".to_string(), "seg-2".to_string()]);
    }

    #[test]
    fn test_branching_detected() {
        let [a, b, c, d, ..] = points();
        let err = reconstruct_chain(
            &[seg("seg-1", a, b), seg("seg-2", b, c), seg("seg-3", b, d)],
            TOL,
        )
        .unwrap_err();
        match err {
            NetworkError::BranchingPath { lat, lng, fan_out } => {
                assert_eq!(fan_out, 2);
                assert!((lat - b.lat).abs() <= TOL);
                assert!((lng - b.lng).abs() <= TOL);
            }
            other => panic!("expected BranchingPath, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_counts_as_branching() {
        let [a, b, c, d, ..] = points();
        // Two segments converging on the same node
        let err = reconstruct_chain(
            &[seg("seg-1", a, c), seg("seg-2", b, c), seg("seg-3", c, d)],
            TOL,
        )
        .unwrap_err();
        assert!(matches!(err, NetworkError::BranchingPath { fan_out: 2, .. }));
    }

    #[test]
    fn test_cycle_detected() {
        let [a, b, c, ..] = points();
        let err = reconstruct_chain(
            &[seg("seg-1", a, b), seg("seg-2", b, c), seg("seg-3", c, a)],
            TOL,
        )
        .unwrap_err();
        assert!(matches!(err, NetworkError::CyclicPath { segment_count: 3 }));
    }

    #[test]
    fn test_disjoint_detected() {
        let [a, b, c, d, e] = points();
        // a->b->c connected, d->e floating
        let err = reconstruct_chain(
            &[seg("seg-1", a, b), seg("seg-2", b, c), seg("seg-3", d, e)],
            TOL,
        )
        .unwrap_err();
        match err {
            NetworkError::DisjointSegments { reachable, total } => {
                assert_eq!(total, 3);
                assert_eq!(reachable, 2);
            }
            other => panic!("expected DisjointSegments, got {other:?}"),
        }
    }
}
