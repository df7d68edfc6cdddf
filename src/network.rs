//! # Path Network Engine
//!
//! Stateful engine that owns the whole segment network: the
//! deduplicated segment store, paths and trips referencing it, obstacle
//! reports pinned to segments, and the spatial index used by search.
//!
//! ## Architecture
//!
//! All writes funnel through `&mut self` methods so the engine can keep
//! its secondary indexes (reports by segment, reports by session, paths
//! by segment) in step with the primary maps. The endpoint R-tree is
//! the one derived structure that is expensive to rebuild, so it is
//! tracked with a dirty flag and rebuilt lazily on the next search.
//!
//! Time-dependent operations come in pairs: `foo()` uses the wall
//! clock, `foo_at(now)` takes an explicit instant. Report decay, expiry
//! and rate limiting are all pure in `now`, which keeps the lifecycle
//! deterministic under test.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::Serialize;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::chain::reconstruct_chain;
use crate::error::{NetworkError, OptionExt, Result};
use crate::external::{Geocoder, RoadSnapper};
use crate::geo_utils::dedup_consecutive;
use crate::reliability;
use crate::search::{
    classify_distance, combine_tiers, endpoint_distances, rank_matches, EndpointIndex, PathMatch,
};
use crate::segments::SegmentIndex;
use crate::status;
use crate::{
    ConfirmDecision, Coordinate, LocationQuery, NetworkConfig, NewPath, NewReport, NewTrip,
    PathMode, PathRecord, PathStatus, Report, ReportState, Segment, TripRecord,
};

// ============================================================================
// Path Network Engine
// ============================================================================

/// The main stateful network engine.
///
/// Holds every segment, path, trip and report in memory together with
/// the indexes needed to serve search and aggregation without scanning.
pub struct PathNetwork {
    // Core state
    segments: SegmentIndex,
    paths: HashMap<String, PathRecord>,
    trips: HashMap<String, TripRecord>,
    reports: HashMap<String, Report>,

    // Secondary indexes
    reports_by_segment: HashMap<String, Vec<String>>,
    reports_by_session: HashMap<String, Vec<String>>,
    paths_by_segment: HashMap<String, HashSet<String>>,

    // Spatial index over path endpoints for search
    endpoint_index: EndpointIndex,
    endpoint_dirty: bool,

    // Collaborators (absent in offline operation)
    geocoder: Option<Box<dyn Geocoder>>,
    snapper: Option<Box<dyn RoadSnapper>>,

    // Id counters
    next_path_id: u64,
    next_trip_id: u64,
    next_report_id: u64,

    // Configuration
    config: NetworkConfig,
}

impl PathNetwork {
    /// Create an engine with default configuration.
    pub fn new() -> Self {
        Self::with_config(NetworkConfig::default())
    }

    /// Create an engine with custom configuration.
    pub fn with_config(config: NetworkConfig) -> Self {
        Self {
            segments: SegmentIndex::new(config.segment.match_tolerance_deg),
            paths: HashMap::new(),
            trips: HashMap::new(),
            reports: HashMap::new(),
            reports_by_segment: HashMap::new(),
            reports_by_session: HashMap::new(),
            paths_by_segment: HashMap::new(),
            endpoint_index: EndpointIndex::build(&[]),
            endpoint_dirty: false,
            geocoder: None,
            snapper: None,
            next_path_id: 1,
            next_trip_id: 1,
            next_report_id: 1,
            config,
        }
    }

    /// Rebuild an engine from previously stored state.
    ///
    /// Secondary indexes are reconstructed and the id counters resume
    /// after the highest suffix found, so a restored engine keeps
    /// minting unique ids.
    pub fn restore(
        config: NetworkConfig,
        segments: Vec<Segment>,
        paths: Vec<PathRecord>,
        trips: Vec<TripRecord>,
        reports: Vec<Report>,
    ) -> Self {
        let mut network = Self::with_config(config);
        network.segments = SegmentIndex::from_segments(
            network.config.segment.match_tolerance_deg,
            segments,
        );

        for path in paths {
            network.next_path_id = network.next_path_id.max(id_suffix(&path.id, "path-") + 1);
            for segment_id in &path.segment_ids {
                network
                    .paths_by_segment
                    .entry(segment_id.clone())
                    .or_default()
                    .insert(path.id.clone());
            }
            network.paths.insert(path.id.clone(), path);
        }

        for trip in trips {
            network.next_trip_id = network.next_trip_id.max(id_suffix(&trip.id, "trip-") + 1);
            network.trips.insert(trip.id.clone(), trip);
        }

        for report in reports {
            network.next_report_id = network.next_report_id.max(id_suffix(&report.id, "rep-") + 1);
            network
                .reports_by_segment
                .entry(report.segment_id.clone())
                .or_default()
                .push(report.id.clone());
            network
                .reports_by_session
                .entry(report.session_id.clone())
                .or_default()
                .push(report.id.clone());
            network.reports.insert(report.id.clone(), report);
        }

        network.endpoint_dirty = !network.paths.is_empty();
        info!(
            "[PathNetwork] Restored {} segments, {} paths, {} trips, {} reports",
            network.segments.len(),
            network.paths.len(),
            network.trips.len(),
            network.reports.len()
        );
        network
    }

    // ========================================================================
    // Collaborators
    // ========================================================================

    /// Install a geocoder for free-text search queries.
    pub fn set_geocoder(&mut self, geocoder: Box<dyn Geocoder>) {
        self.geocoder = Some(geocoder);
    }

    /// Install a road snapper for GPS-recorded geometry.
    pub fn set_snapper(&mut self, snapper: Box<dyn RoadSnapper>) {
        self.snapper = Some(snapper);
    }

    // ========================================================================
    // Path Management
    // ========================================================================

    /// Create a path from a polyline.
    ///
    /// The polyline is decomposed into deduplicated segments, validated
    /// as a single contiguous chain, and scored immediately. Segments
    /// shared with already-reported paths pull those reports into the
    /// new path's published status from the start.
    ///
    /// In [`PathMode::Automatic`] the points are first run through the
    /// road snapper when one is installed; a snapping failure degrades
    /// to the raw trace rather than failing the creation.
    pub fn create_path(&mut self, new_path: NewPath) -> Result<PathRecord> {
        self.create_path_at(new_path, Utc::now())
    }

    /// [`Self::create_path`] at an explicit instant.
    pub fn create_path_at(&mut self, new_path: NewPath, now: DateTime<Utc>) -> Result<PathRecord> {
        let points = match new_path.mode {
            PathMode::Automatic => self.snap_or_raw(&new_path.points),
            PathMode::Manual => new_path.points.clone(),
        };

        let resolved = self.segments.decompose(&points)?;
        let minted = resolved.iter().filter(|r| r.created).count();
        let chain_segments: Vec<Segment> = resolved
            .iter()
            .map(|r| self.segments.get(&r.segment_id).cloned())
            .collect::<Option<Vec<_>>>()
            .ok_or_internal("resolved segment missing from index")?;
        let ordered = reconstruct_chain(&chain_segments, self.config.segment.match_tolerance_deg)?;

        let first = ordered.first().ok_or_internal("reconstructed chain is empty")?;
        let last = ordered.last().ok_or_internal("reconstructed chain is empty")?;
        let origin = self
            .segments
            .get(first)
            .map(|s| s.start)
            .ok_or_internal("chain start missing from index")?;
        let destination = self
            .segments
            .get(last)
            .map(|s| s.end)
            .ok_or_internal("chain end missing from index")?;
        let length_m: f64 = ordered
            .iter()
            .filter_map(|id| self.segments.get(id))
            .map(|s| s.length_m())
            .sum();

        let id = format!("path-{}", self.next_path_id);
        self.next_path_id += 1;

        let record = PathRecord {
            id: id.clone(),
            title: new_path.title,
            description: new_path.description,
            session_id: new_path.session_id,
            visibility: new_path.visibility,
            mode: new_path.mode,
            baseline_status: new_path.baseline_status,
            published_status: new_path.baseline_status,
            score: status::quality_score(new_path.baseline_status, 0.0, &self.config.status),
            segment_ids: ordered,
            origin,
            destination,
            length_m,
            created_at: now,
        };

        for segment_id in &record.segment_ids {
            self.paths_by_segment
                .entry(segment_id.clone())
                .or_default()
                .insert(id.clone());
        }

        info!(
            "[PathNetwork] Created {} '{}' ({} segments, {} new, {:.0} m)",
            id,
            record.title,
            record.segment_ids.len(),
            minted,
            record.length_m
        );

        self.paths.insert(id.clone(), record);
        self.endpoint_dirty = true;
        self.recompute_path(&id, now);

        self.paths
            .get(&id)
            .cloned()
            .ok_or_internal("path lost after insert")
    }

    /// Delete a path. Only the owning session may delete it; the
    /// underlying segments stay, since other paths and reports may
    /// reference them.
    pub fn delete_path(&mut self, path_id: &str, session_id: &str) -> Result<()> {
        let owner = self
            .paths
            .get(path_id)
            .map(|p| p.session_id.clone())
            .ok_or_not_found("path", path_id)?;
        if owner != session_id {
            return Err(NetworkError::Forbidden {
                kind: "path",
                id: path_id.to_string(),
            });
        }

        if let Some(record) = self.paths.remove(path_id) {
            for segment_id in &record.segment_ids {
                let now_empty = match self.paths_by_segment.get_mut(segment_id) {
                    Some(set) => {
                        set.remove(path_id);
                        set.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.paths_by_segment.remove(segment_id);
                }
            }
        }

        self.endpoint_dirty = true;
        info!("[PathNetwork] Deleted {}", path_id);
        Ok(())
    }

    pub fn get_path(&self, path_id: &str) -> Option<&PathRecord> {
        self.paths.get(path_id)
    }

    pub fn has_path(&self, path_id: &str) -> bool {
        self.paths.contains_key(path_id)
    }

    pub fn get_path_ids(&self) -> Vec<String> {
        self.paths.keys().cloned().collect()
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    // ========================================================================
    // Trip Management
    // ========================================================================

    /// Record a GPS trip. The trace is snapped (when a snapper is
    /// installed), decomposed into shared segments and validated as a
    /// chain, exactly like an automatic-mode path.
    pub fn record_trip(&mut self, new_trip: NewTrip) -> Result<TripRecord> {
        self.record_trip_at(new_trip, Utc::now())
    }

    /// [`Self::record_trip`] at an explicit instant.
    pub fn record_trip_at(&mut self, new_trip: NewTrip, now: DateTime<Utc>) -> Result<TripRecord> {
        let points = self.snap_or_raw(&new_trip.points);
        let resolved = self.segments.decompose(&points)?;
        let chain_segments: Vec<Segment> = resolved
            .iter()
            .map(|r| self.segments.get(&r.segment_id).cloned())
            .collect::<Option<Vec<_>>>()
            .ok_or_internal("resolved segment missing from index")?;
        let ordered = reconstruct_chain(&chain_segments, self.config.segment.match_tolerance_deg)?;
        let length_m: f64 = ordered
            .iter()
            .filter_map(|id| self.segments.get(id))
            .map(|s| s.length_m())
            .sum();

        let id = format!("trip-{}", self.next_trip_id);
        self.next_trip_id += 1;

        let record = TripRecord {
            id: id.clone(),
            session_id: new_trip.session_id,
            segment_ids: ordered,
            length_m,
            recorded_at: now,
        };

        info!(
            "[PathNetwork] Recorded {} ({} segments, {:.0} m)",
            id,
            record.segment_ids.len(),
            record.length_m
        );

        self.trips.insert(id.clone(), record);
        self.trips
            .get(&id)
            .cloned()
            .ok_or_internal("trip lost after insert")
    }

    /// Delete a trip. Only the owning session may delete it.
    pub fn delete_trip(&mut self, trip_id: &str, session_id: &str) -> Result<()> {
        let owner = self
            .trips
            .get(trip_id)
            .map(|t| t.session_id.clone())
            .ok_or_not_found("trip", trip_id)?;
        if owner != session_id {
            return Err(NetworkError::Forbidden {
                kind: "trip",
                id: trip_id.to_string(),
            });
        }
        self.trips.remove(trip_id);
        info!("[PathNetwork] Deleted {}", trip_id);
        Ok(())
    }

    pub fn get_trip(&self, trip_id: &str) -> Option<&TripRecord> {
        self.trips.get(trip_id)
    }

    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }

    // ========================================================================
    // Segments
    // ========================================================================

    pub fn get_segment(&self, segment_id: &str) -> Option<&Segment> {
        self.segments.get(segment_id)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Search for paths whose endpoints match the query pair.
    ///
    /// Candidate statuses and scores are recomputed before ranking, so
    /// results reflect current report decay. Hidden paths are only
    /// returned when `viewer` is their owning session. An unresolvable
    /// address (no geocoder, service failure, or no hit) yields an
    /// empty result, never an error.
    pub fn search_paths(
        &mut self,
        origin: &LocationQuery,
        destination: &LocationQuery,
        viewer: Option<&str>,
    ) -> Result<Vec<PathMatch>> {
        self.search_paths_at(origin, destination, viewer, Utc::now())
    }

    /// [`Self::search_paths`] at an explicit instant.
    pub fn search_paths_at(
        &mut self,
        origin: &LocationQuery,
        destination: &LocationQuery,
        viewer: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<PathMatch>> {
        let Some(origin_coord) = self.resolve_location(origin)? else {
            return Ok(Vec::new());
        };
        let Some(destination_coord) = self.resolve_location(destination)? else {
            return Ok(Vec::new());
        };

        self.ensure_endpoint_index();
        let candidates = self.endpoint_index.candidates(
            &origin_coord,
            &destination_coord,
            self.config.search.coarse_window_deg,
        );
        debug!(
            "[PathNetwork] Search coarse phase: {} of {} paths",
            candidates.len(),
            self.paths.len()
        );

        let mut matches = Vec::new();
        for path_id in candidates {
            self.recompute_path(&path_id, now);
            let Some(path) = self.paths.get(&path_id) else {
                continue;
            };
            if !path.visibility && viewer != Some(path.session_id.as_str()) {
                continue;
            }

            let (origin_m, destination_m) =
                endpoint_distances(path, &origin_coord, &destination_coord);
            let origin_tier = classify_distance(origin_m, &self.config.search);
            let destination_tier = classify_distance(destination_m, &self.config.search);
            let (Some(origin_tier), Some(destination_tier)) = (origin_tier, destination_tier)
            else {
                continue;
            };

            matches.push(PathMatch {
                path: path.clone(),
                tier: combine_tiers(origin_tier, destination_tier),
                origin_distance_m: origin_m,
                destination_distance_m: destination_m,
            });
        }

        Ok(rank_matches(matches))
    }

    fn resolve_location(&self, query: &LocationQuery) -> Result<Option<Coordinate>> {
        match query {
            LocationQuery::Point { coord } => {
                if !coord.is_valid() {
                    return Err(NetworkError::InvalidCoordinate {
                        lat: coord.lat,
                        lng: coord.lng,
                    });
                }
                Ok(Some(*coord))
            }
            LocationQuery::Address { query } => {
                let Some(geocoder) = &self.geocoder else {
                    warn!("[PathNetwork] No geocoder installed, cannot resolve '{query}'");
                    return Ok(None);
                };
                match geocoder.geocode(query) {
                    Ok(Some(coord)) => Ok(Some(coord)),
                    Ok(None) => {
                        debug!("[PathNetwork] No geocoding hit for '{query}'");
                        Ok(None)
                    }
                    Err(err) => {
                        warn!("[PathNetwork] Geocoding '{query}' failed: {err}");
                        Ok(None)
                    }
                }
            }
        }
    }

    fn ensure_endpoint_index(&mut self) {
        if !self.endpoint_dirty {
            return;
        }
        let paths: Vec<&PathRecord> = self.paths.values().collect();
        self.endpoint_index = EndpointIndex::build(&paths);
        self.endpoint_dirty = false;
        debug!(
            "[PathNetwork] Rebuilt endpoint index ({} paths)",
            self.endpoint_index.len()
        );
    }

    // ========================================================================
    // Reports
    // ========================================================================

    /// File an obstacle report against a segment.
    ///
    /// Submissions are rate limited per session over a sliding window,
    /// with an extra cooldown against repeated reports on the same
    /// segment. Every path containing the segment is rescored.
    pub fn create_report(&mut self, new_report: NewReport) -> Result<Report> {
        self.create_report_at(new_report, Utc::now())
    }

    /// [`Self::create_report`] at an explicit instant.
    pub fn create_report_at(&mut self, new_report: NewReport, now: DateTime<Utc>) -> Result<Report> {
        if !self.segments.contains(&new_report.segment_id) {
            return Err(NetworkError::NotFound {
                kind: "segment",
                id: new_report.segment_id.clone(),
            });
        }
        if !new_report.position.is_valid() {
            return Err(NetworkError::InvalidCoordinate {
                lat: new_report.position.lat,
                lng: new_report.position.lng,
            });
        }
        self.check_rate_limit(&new_report.session_id, now)?;
        self.check_cooldown(&new_report.session_id, &new_report.segment_id, now)?;

        let id = format!("rep-{}", self.next_report_id);
        self.next_report_id += 1;

        let report = Report {
            id: id.clone(),
            segment_id: new_report.segment_id,
            session_id: new_report.session_id,
            user_id: new_report.user_id,
            obstacle: new_report.obstacle,
            condition: new_report.condition,
            position: new_report.position,
            note: new_report.note,
            state: ReportState::Active,
            reliability: self.config.report.initial_reliability,
            confirm_count: 0,
            reject_count: 0,
            created_at: now,
            last_confirmed_at: None,
        };

        info!(
            "[PathNetwork] Report {} on {} ({}, votes {})",
            id, report.segment_id, report.obstacle, report.condition
        );

        let segment_id = report.segment_id.clone();
        self.reports_by_segment
            .entry(segment_id.clone())
            .or_default()
            .push(id.clone());
        self.reports_by_session
            .entry(report.session_id.clone())
            .or_default()
            .push(id.clone());
        self.reports.insert(id.clone(), report);
        self.recompute_paths_for_segment(&segment_id, now);

        self.reports
            .get(&id)
            .cloned()
            .ok_or_internal("report lost after insert")
    }

    /// Apply a community verdict to an active report.
    ///
    /// Expired and retracted reports cannot be judged; expiry is
    /// evaluated lazily first so the outcome does not depend on whether
    /// a refresh pass happened to run.
    pub fn confirm_report(&mut self, report_id: &str, decision: ConfirmDecision) -> Result<Report> {
        self.confirm_report_at(report_id, decision, Utc::now())
    }

    /// [`Self::confirm_report`] at an explicit instant.
    pub fn confirm_report_at(
        &mut self,
        report_id: &str,
        decision: ConfirmDecision,
        now: DateTime<Utc>,
    ) -> Result<Report> {
        self.refresh_report_state(report_id, now);

        let config = self.config.report.clone();
        let report = self
            .reports
            .get_mut(report_id)
            .ok_or_not_found("report", report_id)?;
        match report.state {
            ReportState::Active => {}
            ReportState::Expired => {
                return Err(NetworkError::Conflict {
                    message: format!("report {report_id} has expired"),
                })
            }
            ReportState::Retracted => {
                return Err(NetworkError::Conflict {
                    message: format!("report {report_id} was retracted"),
                })
            }
        }

        match decision {
            ConfirmDecision::Confirm => reliability::apply_confirm(report, &config, now),
            ConfirmDecision::Reject => reliability::apply_reject(report, &config, now),
        }
        debug!(
            "[PathNetwork] {:?} on {} -> reliability {:.3}",
            decision, report_id, report.reliability
        );

        let segment_id = report.segment_id.clone();
        let snapshot = report.clone();
        self.recompute_paths_for_segment(&segment_id, now);
        Ok(snapshot)
    }

    /// Withdraw one's own report. Idempotent; the record is kept for
    /// audit but stops influencing aggregation immediately.
    pub fn retract_report(&mut self, report_id: &str, session_id: &str) -> Result<Report> {
        self.retract_report_at(report_id, session_id, Utc::now())
    }

    /// [`Self::retract_report`] at an explicit instant.
    pub fn retract_report_at(
        &mut self,
        report_id: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Report> {
        let report = self
            .reports
            .get_mut(report_id)
            .ok_or_not_found("report", report_id)?;
        if report.session_id != session_id {
            return Err(NetworkError::Forbidden {
                kind: "report",
                id: report_id.to_string(),
            });
        }
        report.state = ReportState::Retracted;
        let segment_id = report.segment_id.clone();
        let snapshot = report.clone();

        info!("[PathNetwork] Retracted {}", report_id);
        self.recompute_paths_for_segment(&segment_id, now);
        Ok(snapshot)
    }

    pub fn get_report(&self, report_id: &str) -> Option<&Report> {
        self.reports.get(report_id)
    }

    pub fn report_count(&self) -> usize {
        self.reports.len()
    }

    pub fn active_report_count(&self) -> usize {
        self.reports
            .values()
            .filter(|r| r.state == ReportState::Active)
            .count()
    }

    /// All reports on a segment, including expired and retracted ones.
    pub fn reports_for_segment(&self, segment_id: &str) -> Vec<&Report> {
        self.reports_by_segment
            .get(segment_id)
            .map(|ids| ids.iter().filter_map(|id| self.reports.get(id)).collect())
            .unwrap_or_default()
    }

    /// The status a path currently presents, recomputed from its
    /// active reports.
    pub fn path_status(&mut self, path_id: &str) -> Result<PathStatus> {
        self.path_status_at(path_id, Utc::now())
    }

    /// [`Self::path_status`] at an explicit instant.
    pub fn path_status_at(&mut self, path_id: &str, now: DateTime<Utc>) -> Result<PathStatus> {
        let segment_ids = self
            .paths
            .get(path_id)
            .map(|p| p.segment_ids.clone())
            .ok_or_not_found("path", path_id)?;
        self.refresh_states_for_segments(&segment_ids, now);

        let path = self.paths.get(path_id).ok_or_not_found("path", path_id)?;
        let (published, _) = self.aggregate_path(path, now);
        Ok(published)
    }

    /// Active reports along a path's chain, oldest first, with the
    /// weight each vote currently carries. Staleness is refreshed
    /// before the view is built, so it is current as of `now`.
    pub fn reports_for_path(&mut self, path_id: &str) -> Result<PathReportView> {
        self.reports_for_path_at(path_id, Utc::now())
    }

    /// [`Self::reports_for_path`] at an explicit instant.
    pub fn reports_for_path_at(
        &mut self,
        path_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PathReportView> {
        let segment_ids = self
            .paths
            .get(path_id)
            .map(|p| p.segment_ids.clone())
            .ok_or_not_found("path", path_id)?;
        self.refresh_states_for_segments(&segment_ids, now);

        let config = &self.config.report;
        let mut reports: Vec<WeightedReport> = segment_ids
            .iter()
            .filter_map(|segment_id| self.reports_by_segment.get(segment_id))
            .flatten()
            .filter_map(|report_id| self.reports.get(report_id))
            .filter(|report| report.state == ReportState::Active)
            .map(|report| WeightedReport {
                effective_weight: reliability::effective_weight(report, config, now),
                report: report.clone(),
            })
            .collect();
        reports.sort_by(|a, b| {
            a.report
                .created_at
                .cmp(&b.report.created_at)
                .then_with(|| a.report.id.cmp(&b.report.id))
        });

        let path = self.paths.get(path_id).ok_or_not_found("path", path_id)?;
        let (published_status, _) = self.aggregate_path(path, now);
        Ok(PathReportView {
            path_id: path_id.to_string(),
            published_status,
            reports,
        })
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Expire every active report whose freshness has fallen below the
    /// floor and rescore the affected paths. Returns the number of
    /// reports expired.
    pub fn refresh_reports(&mut self) -> usize {
        self.refresh_reports_at(Utc::now())
    }

    /// [`Self::refresh_reports`] at an explicit instant.
    pub fn refresh_reports_at(&mut self, now: DateTime<Utc>) -> usize {
        let report_ids: Vec<String> = self.reports.keys().cloned().collect();
        let mut touched_segments = HashSet::new();
        let mut expired = 0;

        for report_id in report_ids {
            if self.refresh_report_state(&report_id, now) {
                expired += 1;
                if let Some(report) = self.reports.get(&report_id) {
                    touched_segments.insert(report.segment_id.clone());
                }
            }
        }

        let affected: HashSet<String> = touched_segments
            .iter()
            .filter_map(|segment_id| self.paths_by_segment.get(segment_id))
            .flatten()
            .cloned()
            .collect();
        for path_id in affected {
            self.apply_aggregation(&path_id, now);
        }

        if expired > 0 {
            info!("[PathNetwork] Expired {} stale reports", expired);
        }
        expired
    }

    /// Recompute published status and score for every path.
    pub fn recompute_scores(&mut self) {
        self.recompute_scores_at(Utc::now())
    }

    /// [`Self::recompute_scores`] at an explicit instant.
    pub fn recompute_scores_at(&mut self, now: DateTime<Utc>) {
        let report_ids: Vec<String> = self.reports.keys().cloned().collect();
        for report_id in report_ids {
            self.refresh_report_state(&report_id, now);
        }

        #[cfg(feature = "parallel")]
        let updates: Vec<(String, PathStatus, f64)> = {
            let paths: Vec<&PathRecord> = self.paths.values().collect();
            paths
                .par_iter()
                .map(|path| {
                    let (published, score) = self.aggregate_path(path, now);
                    (path.id.clone(), published, score)
                })
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let updates: Vec<(String, PathStatus, f64)> = self
            .paths
            .values()
            .map(|path| {
                let (published, score) = self.aggregate_path(path, now);
                (path.id.clone(), published, score)
            })
            .collect();

        let count = updates.len();
        for (path_id, published, score) in updates {
            if let Some(path) = self.paths.get_mut(&path_id) {
                path.published_status = published;
                path.score = score;
            }
        }
        debug!("[PathNetwork] Rescored {} paths", count);
    }

    // ========================================================================
    // Aggregation Internals
    // ========================================================================

    /// Transition one report to expired if its freshness has fallen
    /// below the floor. Returns whether the state changed.
    fn refresh_report_state(&mut self, report_id: &str, now: DateTime<Utc>) -> bool {
        let config = &self.config.report;
        let Some(report) = self.reports.get_mut(report_id) else {
            return false;
        };
        if report.state == ReportState::Active && reliability::is_stale(report, config, now) {
            report.state = ReportState::Expired;
            true
        } else {
            false
        }
    }

    fn refresh_states_for_segments(&mut self, segment_ids: &[String], now: DateTime<Utc>) {
        let mut report_ids = Vec::new();
        for segment_id in segment_ids {
            if let Some(ids) = self.reports_by_segment.get(segment_id) {
                report_ids.extend(ids.iter().cloned());
            }
        }
        for report_id in report_ids {
            self.refresh_report_state(&report_id, now);
        }
    }

    /// Weighted vote over the active reports along a path's chain,
    /// blended with the baseline. Returns (published status, score).
    fn aggregate_path(&self, path: &PathRecord, now: DateTime<Utc>) -> (PathStatus, f64) {
        let mut votes = Vec::new();
        let mut total_weight = 0.0;
        for segment_id in &path.segment_ids {
            let Some(report_ids) = self.reports_by_segment.get(segment_id) else {
                continue;
            };
            for report_id in report_ids {
                let Some(report) = self.reports.get(report_id) else {
                    continue;
                };
                if report.state != ReportState::Active {
                    continue;
                }
                let weight = reliability::effective_weight(report, &self.config.report, now);
                total_weight += weight;
                votes.push((report.condition, weight));
            }
        }

        let reported = status::weighted_vote(votes);
        let published = status::blend(reported, path.baseline_status, &self.config.status);
        let score = status::quality_score(published, total_weight, &self.config.status);
        (published, score)
    }

    fn apply_aggregation(&mut self, path_id: &str, now: DateTime<Utc>) {
        let Some(path) = self.paths.get(path_id) else {
            return;
        };
        let (published, score) = self.aggregate_path(path, now);
        if let Some(path) = self.paths.get_mut(path_id) {
            path.published_status = published;
            path.score = score;
        }
    }

    /// Refresh report states along one path and reapply aggregation.
    fn recompute_path(&mut self, path_id: &str, now: DateTime<Utc>) {
        let Some(segment_ids) = self.paths.get(path_id).map(|p| p.segment_ids.clone()) else {
            return;
        };
        self.refresh_states_for_segments(&segment_ids, now);
        self.apply_aggregation(path_id, now);
    }

    /// Rescore every path that contains the given segment.
    fn recompute_paths_for_segment(&mut self, segment_id: &str, now: DateTime<Utc>) {
        let report_ids: Vec<String> = self
            .reports_by_segment
            .get(segment_id)
            .cloned()
            .unwrap_or_default();
        for report_id in report_ids {
            self.refresh_report_state(&report_id, now);
        }

        let affected: Vec<String> = self
            .paths_by_segment
            .get(segment_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for path_id in affected {
            self.apply_aggregation(&path_id, now);
        }
    }

    // ========================================================================
    // Rate Limiting
    // ========================================================================

    fn check_rate_limit(&self, session_id: &str, now: DateTime<Utc>) -> Result<()> {
        let window = Duration::minutes(self.config.report.rate_window_min);
        let cutoff = now - window;
        let Some(report_ids) = self.reports_by_session.get(session_id) else {
            return Ok(());
        };

        let mut in_window: Vec<DateTime<Utc>> = report_ids
            .iter()
            .filter_map(|id| self.reports.get(id))
            .filter(|r| r.created_at > cutoff)
            .map(|r| r.created_at)
            .collect();
        if in_window.len() < self.config.report.rate_max_per_window {
            return Ok(());
        }

        in_window.sort_unstable();
        let oldest = in_window[0];
        Err(NetworkError::RateLimited {
            retry_after_min: ceil_minutes(oldest + window - now),
        })
    }

    fn check_cooldown(&self, session_id: &str, segment_id: &str, now: DateTime<Utc>) -> Result<()> {
        let cooldown = Duration::minutes(self.config.report.cooldown_min);
        let cutoff = now - cooldown;
        let Some(report_ids) = self.reports_by_session.get(session_id) else {
            return Ok(());
        };

        let latest = report_ids
            .iter()
            .filter_map(|id| self.reports.get(id))
            .filter(|r| r.segment_id == segment_id && r.created_at > cutoff)
            .map(|r| r.created_at)
            .max();
        match latest {
            Some(at) => Err(NetworkError::Cooldown {
                retry_after_min: ceil_minutes(at + cooldown - now),
            }),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Geometry Preprocessing
    // ========================================================================

    /// Snap a GPS trace through the installed snapper, falling back to
    /// the raw points when no snapper is present or the call fails.
    /// Consecutive near-duplicate output points are collapsed either
    /// way.
    fn snap_or_raw(&self, points: &[Coordinate]) -> Vec<Coordinate> {
        let tolerance = self.config.segment.match_tolerance_deg;
        let snapped = match &self.snapper {
            Some(snapper) => match snapper.snap(points) {
                Ok(snapped) if snapped.len() == points.len() => snapped,
                Ok(snapped) => {
                    warn!(
                        "[PathNetwork] Snapper returned {} points for {} inputs, using raw trace",
                        snapped.len(),
                        points.len()
                    );
                    points.to_vec()
                }
                Err(err) => {
                    warn!("[PathNetwork] Snapping failed, using raw trace: {err}");
                    points.to_vec()
                }
            },
            None => points.to_vec(),
        };
        dedup_consecutive(&snapped, tolerance)
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn get_config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Replace the configuration.
    ///
    /// The segment store is rebucketed at the new tolerance and every
    /// path is rescored, so this is a full recomputation.
    pub fn set_config(&mut self, config: NetworkConfig) {
        let all_segments: Vec<Segment> = self.segments.iter().cloned().collect();
        self.segments =
            SegmentIndex::from_segments(config.segment.match_tolerance_deg, all_segments);
        self.config = config;
        self.endpoint_dirty = true;
        self.recompute_scores();
    }

    /// Drop all state and reset the id counters.
    pub fn clear(&mut self) {
        self.segments = SegmentIndex::new(self.config.segment.match_tolerance_deg);
        self.paths.clear();
        self.trips.clear();
        self.reports.clear();
        self.reports_by_segment.clear();
        self.reports_by_session.clear();
        self.paths_by_segment.clear();
        self.endpoint_index = EndpointIndex::build(&[]);
        self.endpoint_dirty = false;
        self.next_path_id = 1;
        self.next_trip_id = 1;
        self.next_report_id = 1;
    }

    // ========================================================================
    // Export & Statistics
    // ========================================================================

    pub fn iter_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn iter_paths(&self) -> impl Iterator<Item = &PathRecord> {
        self.paths.values()
    }

    pub fn iter_trips(&self) -> impl Iterator<Item = &TripRecord> {
        self.trips.values()
    }

    pub fn iter_reports(&self) -> impl Iterator<Item = &Report> {
        self.reports.values()
    }

    /// All segments as a JSON array, sorted by id.
    pub fn get_segments_json(&self) -> String {
        let mut segments: Vec<&Segment> = self.segments.iter().collect();
        segments.sort_by(|a, b| a.id.cmp(&b.id));
        serde_json::to_string(&segments).unwrap_or_else(|_| "[]".to_string())
    }

    /// All paths as a JSON array, sorted by id.
    pub fn get_paths_json(&self) -> String {
        let mut paths: Vec<&PathRecord> = self.paths.values().collect();
        paths.sort_by(|a, b| a.id.cmp(&b.id));
        serde_json::to_string(&paths).unwrap_or_else(|_| "[]".to_string())
    }

    /// Reports as a JSON array, optionally restricted to one segment.
    pub fn get_reports_json(&self, segment_id: Option<&str>) -> String {
        let mut reports: Vec<&Report> = match segment_id {
            Some(segment_id) => self.reports_for_segment(segment_id),
            None => self.reports.values().collect(),
        };
        reports.sort_by(|a, b| a.id.cmp(&b.id));
        serde_json::to_string(&reports).unwrap_or_else(|_| "[]".to_string())
    }

    /// Engine statistics for monitoring.
    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            segment_count: self.segments.len() as u32,
            path_count: self.paths.len() as u32,
            trip_count: self.trips.len() as u32,
            report_count: self.reports.len() as u32,
            active_report_count: self.active_report_count() as u32,
        }
    }

    pub fn get_stats_json(&self) -> String {
        serde_json::to_string(&self.stats()).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for PathNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts of everything the engine holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub segment_count: u32,
    pub path_count: u32,
    pub trip_count: u32,
    pub report_count: u32,
    pub active_report_count: u32,
}

/// A report together with the vote weight it carried at query time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedReport {
    pub report: Report,
    pub effective_weight: f64,
}

/// Everything a rider sees when inspecting a path: the status its
/// active reports add up to, and those reports oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathReportView {
    pub path_id: String,
    pub published_status: PathStatus,
    pub reports: Vec<WeightedReport>,
}

fn id_suffix(id: &str, prefix: &str) -> u64 {
    id.strip_prefix(prefix)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0)
}

fn ceil_minutes(duration: Duration) -> i64 {
    ((duration.num_seconds() + 59) / 60).max(1)
}

// ============================================================================
// Global Singleton
// ============================================================================

/// Global engine instance for embedders that want shared state without
/// threading an engine handle through their call sites.
pub static NETWORK: Lazy<Mutex<PathNetwork>> = Lazy::new(|| Mutex::new(PathNetwork::new()));

/// Get a lock on the global engine.
pub fn with_network<F, R>(f: F) -> R
where
    F: FnOnce(&mut PathNetwork) -> R,
{
    let mut network = NETWORK.lock().unwrap();
    f(&mut network)
}

// ============================================================================
// Tests
// ============================================================================
