//! Two-tier path search.
//!
//! Matching runs in two phases. A coarse phase queries an R-tree of
//! path endpoints with a degree-sized window around the query origin and
//! destination and intersects the two candidate sets. The precise phase
//! then measures haversine distances for both endpoints and sorts each
//! surviving path into a tier: [`MatchTier::Direct`] when both ends are
//! inside the configured radius, [`MatchTier::Near`] when either end
//! needs the extra buffer. Direct matches always rank above near ones;
//! inside a tier the path score decides.

use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::{Coordinate, PathRecord, SearchConfig};

/// How closely a path's endpoints matched the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// Both endpoints within `max_distance_m`.
    Direct,
    /// At least one endpoint needed the near buffer.
    Near,
}

/// One search hit, carrying the measured endpoint distances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathMatch {
    pub path: PathRecord,
    pub tier: MatchTier,
    pub origin_distance_m: f64,
    pub destination_distance_m: f64,
}

/// Tier for a single endpoint distance, or `None` when out of range.
///
/// Boundaries are inclusive: exactly `max_distance_m` is still
/// [`MatchTier::Direct`], exactly `max_distance_m + near_buffer_m` is
/// still [`MatchTier::Near`].
pub fn classify_distance(distance_m: f64, config: &SearchConfig) -> Option<MatchTier> {
    if distance_m <= config.max_distance_m {
        Some(MatchTier::Direct)
    } else if distance_m <= config.max_distance_m + config.near_buffer_m {
        Some(MatchTier::Near)
    } else {
        None
    }
}

/// Combine per-endpoint tiers; the worse endpoint decides the path.
pub fn combine_tiers(origin: MatchTier, destination: MatchTier) -> MatchTier {
    origin.max(destination)
}

/// Order: tier, then score descending, then total endpoint distance.
pub fn rank_matches(mut matches: Vec<PathMatch>) -> Vec<PathMatch> {
    matches.sort_by(|a, b| {
        a.tier
            .cmp(&b.tier)
            .then_with(|| b.path.score.total_cmp(&a.path.score))
            .then_with(|| {
                let da = a.origin_distance_m + a.destination_distance_m;
                let db = b.origin_distance_m + b.destination_distance_m;
                da.total_cmp(&db)
            })
    });
    matches
}

// =============================================================================
// Coarse Endpoint Index
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointKind {
    Origin,
    Destination,
}

#[derive(Debug, Clone)]
struct EndpointEntry {
    path_id: String,
    kind: EndpointKind,
    position: [f64; 2],
}

impl RTreeObject for EndpointEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

/// R-tree over the origin and destination points of every path.
///
/// Must be rebuilt whenever the path set changes; the owning engine
/// tracks that with a dirty flag and rebuilds lazily.
#[derive(Debug)]
pub struct EndpointIndex {
    tree: RTree<EndpointEntry>,
    len: usize,
}

impl EndpointIndex {
    pub fn build(paths: &[&PathRecord]) -> Self {
        let mut entries = Vec::with_capacity(paths.len() * 2);
        for path in paths {
            entries.push(EndpointEntry {
                path_id: path.id.clone(),
                kind: EndpointKind::Origin,
                position: [path.origin.lng, path.origin.lat],
            });
            entries.push(EndpointEntry {
                path_id: path.id.clone(),
                kind: EndpointKind::Destination,
                position: [path.destination.lng, path.destination.lat],
            });
        }
        Self {
            tree: RTree::bulk_load(entries),
            len: paths.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Ids of paths whose origin lies in the window around `origin` AND
    /// whose destination lies in the window around `destination`.
    pub fn candidates(
        &self,
        origin: &Coordinate,
        destination: &Coordinate,
        window_deg: f64,
    ) -> Vec<String> {
        let origin_hits: std::collections::HashSet<&str> = self
            .tree
            .locate_in_envelope(&window(origin, window_deg))
            .filter(|e| e.kind == EndpointKind::Origin)
            .map(|e| e.path_id.as_str())
            .collect();

        let mut both: Vec<String> = self
            .tree
            .locate_in_envelope(&window(destination, window_deg))
            .filter(|e| {
                e.kind == EndpointKind::Destination && origin_hits.contains(e.path_id.as_str())
            })
            .map(|e| e.path_id.clone())
            .collect();
        both.sort_unstable();
        both.dedup();
        both
    }
}

fn window(center: &Coordinate, half_width_deg: f64) -> AABB<[f64; 2]> {
    AABB::from_corners(
        [center.lng - half_width_deg, center.lat - half_width_deg],
        [center.lng + half_width_deg, center.lat + half_width_deg],
    )
}

/// Precise distances from a query pair to a path's endpoints.
pub fn endpoint_distances(
    path: &PathRecord,
    origin: &Coordinate,
    destination: &Coordinate,
) -> (f64, f64) {
    (
        haversine_distance(origin, &path.origin),
        haversine_distance(destination, &path.destination),
    )
}
