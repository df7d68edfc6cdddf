//! Segment deduplication.
//!
//! All geometry in the network flows through [`SegmentIndex::resolve`]:
//! given a directed point pair it either returns the id of an existing
//! segment whose endpoints both lie within the match tolerance, or mints
//! a new one. The first writer wins, so the stored coordinates are those
//! of whoever created the segment and later near-miss pairs snap onto
//! them. Segments are append-only; a segment outlives every path that
//! references it so reports stay pinned to stable ids.
//!
//! Lookup is two-phase. Endpoints are bucketed onto a tolerance-sized
//! grid ([`CoordKey`]) and the 3x3 neighborhood of the query cell is
//! scanned, which catches pairs that straddle a cell boundary. Survivors
//! are then verified with exact degree-space distances on both endpoints.

use std::collections::HashMap;

use log::debug;

use crate::error::{NetworkError, Result};
use crate::geo_utils::{degree_distance, CoordKey};
use crate::{Coordinate, Segment};

/// Outcome of resolving one point pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSegment {
    pub segment_id: String,
    /// False when an existing segment was reused.
    pub created: bool,
}

/// Append-only store of deduplicated directed segments.
#[derive(Debug, Clone)]
pub struct SegmentIndex {
    tolerance_deg: f64,
    segments: HashMap<String, Segment>,
    /// Grid cell of each segment's start point -> segment ids.
    start_cells: HashMap<CoordKey, Vec<String>>,
    next_id: u64,
}

impl SegmentIndex {
    pub fn new(tolerance_deg: f64) -> Self {
        Self {
            tolerance_deg,
            segments: HashMap::new(),
            start_cells: HashMap::new(),
            next_id: 1,
        }
    }

    /// Rebuild an index from previously stored segments.
    ///
    /// The id counter resumes after the highest `seg-N` suffix seen, so
    /// restored stores keep minting unique ids.
    pub fn from_segments(tolerance_deg: f64, segments: Vec<Segment>) -> Self {
        let mut index = Self::new(tolerance_deg);
        for segment in segments {
            if let Some(n) = segment
                .id
                .strip_prefix("seg-")
                .and_then(|s| s.parse::<u64>().ok())
            {
                index.next_id = index.next_id.max(n + 1);
            }
            index.insert(segment);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Segment> {
        self.segments.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.segments.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    /// Find the existing segment matching this directed pair, or mint a
    /// new one.
    ///
    /// A pair matches an existing segment only when both endpoints are
    /// within the tolerance of the stored endpoints, in the same order.
    /// The reverse direction never matches.
    ///
    /// # Errors
    ///
    /// - [`NetworkError::InvalidCoordinate`] for out-of-range points
    /// - [`NetworkError::InvalidSegment`] when the pair collapses to a
    ///   point at the match tolerance
    pub fn resolve(&mut self, start: Coordinate, end: Coordinate) -> Result<ResolvedSegment> {
        for point in [&start, &end] {
            if !point.is_valid() {
                return Err(NetworkError::InvalidCoordinate {
                    lat: point.lat,
                    lng: point.lng,
                });
            }
        }

        let separation = degree_distance(&start, &end);
        if separation <= self.tolerance_deg {
            return Err(NetworkError::InvalidSegment {
                separation_deg: separation,
                tolerance_deg: self.tolerance_deg,
            });
        }

        if let Some(id) = self.find_match(&start, &end) {
            return Ok(ResolvedSegment {
                segment_id: id,
                created: false,
            });
        }

        let id = format!("seg-{}", self.next_id);
        self.next_id += 1;
        debug!(
            "[SegmentIndex] Minted {} ({:.6},{:.6}) -> ({:.6},{:.6})",
            id, start.lat, start.lng, end.lat, end.lng
        );
        self.insert(Segment {
            id: id.clone(),
            start,
            end,
        });

        Ok(ResolvedSegment {
            segment_id: id,
            created: true,
        })
    }

    /// Resolve every consecutive pair of a polyline, in order.
    ///
    /// Requires at least two points. On any error nothing is rolled
    /// back; segments minted for earlier pairs remain, which is harmless
    /// because the store is shared and append-only.
    pub fn decompose(&mut self, points: &[Coordinate]) -> Result<Vec<ResolvedSegment>> {
        if points.len() < 2 {
            return Err(NetworkError::InsufficientPoints {
                point_count: points.len(),
                minimum_required: 2,
            });
        }

        let mut resolved = Vec::with_capacity(points.len() - 1);
        for pair in points.windows(2) {
            resolved.push(self.resolve(pair[0], pair[1])?);
        }
        Ok(resolved)
    }

    fn find_match(&self, start: &Coordinate, end: &Coordinate) -> Option<String> {
        let key = CoordKey::bucket(start, self.tolerance_deg);
        for cell in key.neighborhood() {
            let Some(ids) = self.start_cells.get(&cell) else {
                continue;
            };
            for id in ids {
                let segment = &self.segments[id];
                if degree_distance(&segment.start, start) <= self.tolerance_deg
                    && degree_distance(&segment.end, end) <= self.tolerance_deg
                {
                    return Some(id.clone());
                }
            }
        }
        None
    }

    fn insert(&mut self, segment: Segment) {
        let key = CoordKey::bucket(&segment.start, self.tolerance_deg);
        self.start_cells
            .entry(key)
            .or_default()
            .push(segment.id.clone());
        self.segments.insert(segment.id.clone(), segment);
    }
}
