//! # path-network
//!
//! A crowd-sourced path network engine for cycling and walking routes.
//!
//! Paths drawn by users (or recorded as trips) are decomposed into
//! directed segments that are deduplicated across the whole network, so
//! overlapping routes share geometry. On top of the shared segments sit
//! obstacle reports whose influence decays over time and is steered by
//! community confirmation, and a two-tier proximity search that ranks
//! exact hits above near misses.
//!
//! ## Features
//!
//! - `parallel` - Parallel scoring refresh via rayon
//! - `http` - Nominatim geocoding and OSRM road snapping clients
//! - `persistence` - SQLite-backed storage for segments, paths and reports
//! - `full` - All of the above
//!
//! ## Quick Start
//!
//! ```
//! use path_network::{Coordinate, NewPath, PathMode, PathNetwork, PathStatus};
//!
//! # fn main() -> path_network::Result<()> {
//! let mut network = PathNetwork::new();
//!
//! let path = network.create_path(NewPath {
//!     title: "Canal towpath".to_string(),
//!     description: None,
//!     session_id: "session-1".to_string(),
//!     visibility: true,
//!     mode: PathMode::Manual,
//!     baseline_status: PathStatus::Optimal,
//!     points: vec![
//!         Coordinate::new(51.5007, -0.1246),
//!         Coordinate::new(51.5010, -0.1240),
//!         Coordinate::new(51.5013, -0.1234),
//!     ],
//! })?;
//!
//! // Two points per segment, shared with any other path that overlaps.
//! assert_eq!(path.segment_ids.len(), 2);
//! # Ok(())
//! # }
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod chain;
pub mod error;
pub mod external;
pub mod geo_utils;
pub mod network;
pub mod reliability;
pub mod search;
pub mod segments;
pub mod status;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "persistence")]
pub mod persistence;

pub use error::{NetworkError, Result};
pub use network::{with_network, NetworkStats, PathNetwork, PathReportView, WeightedReport};
pub use search::{MatchTier, PathMatch};

// =============================================================================
// Core Types
// =============================================================================

/// A WGS84 coordinate.
///
/// # Example
/// ```
/// use path_network::Coordinate;
///
/// let point = Coordinate::new(51.5074, -0.1278);
/// assert!(point.is_valid());
/// assert!(!Coordinate::new(91.0, 0.0).is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both components are finite and within WGS84 range.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// A directed edge between two coordinates, shared across paths.
///
/// Segments are the unit of deduplication: any path or trip whose
/// consecutive points land within the match tolerance of an existing
/// segment's endpoints reuses that segment instead of minting a new one.
/// Direction matters, so A->B and B->A are distinct segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub start: Coordinate,
    pub end: Coordinate,
}

impl Segment {
    /// Great-circle length in meters.
    pub fn length_m(&self) -> f64 {
        geo_utils::haversine_distance(&self.start, &self.end)
    }

    /// Geometric midpoint, used as the segment's anchor for reports.
    pub fn midpoint(&self) -> Coordinate {
        Coordinate::new(
            (self.start.lat + self.end.lat) / 2.0,
            (self.start.lng + self.end.lng) / 2.0,
        )
    }
}

/// Surface condition of a path, ordered from best to worst.
///
/// The ordering is load-bearing: status aggregation treats these as
/// ordinal values and ties round toward the more severe end.
///
/// # Example
/// ```
/// use path_network::PathStatus;
///
/// assert!(PathStatus::Optimal < PathStatus::Closed);
/// assert_eq!(PathStatus::Sufficient.ordinal(), 2);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    #[default]
    Optimal,
    Medium,
    Sufficient,
    RequiresMaintenance,
    Closed,
}

impl PathStatus {
    pub const ALL: [PathStatus; 5] = [
        PathStatus::Optimal,
        PathStatus::Medium,
        PathStatus::Sufficient,
        PathStatus::RequiresMaintenance,
        PathStatus::Closed,
    ];

    /// Position on the severity scale, 0 = best.
    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    pub fn from_ordinal(value: u8) -> Option<PathStatus> {
        PathStatus::ALL.get(value as usize).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PathStatus::Optimal => "optimal",
            PathStatus::Medium => "medium",
            PathStatus::Sufficient => "sufficient",
            PathStatus::RequiresMaintenance => "requires_maintenance",
            PathStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for PathStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a report claims to be on the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleType {
    Pothole,
    Flooding,
    Closure,
    Other,
}

impl ObstacleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObstacleType::Pothole => "pothole",
            ObstacleType::Flooding => "flooding",
            ObstacleType::Closure => "closure",
            ObstacleType::Other => "other",
        }
    }
}

impl fmt::Display for ObstacleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a report. Only `Active` reports influence scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportState {
    Active,
    Expired,
    Retracted,
}

impl ReportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportState::Active => "active",
            ReportState::Expired => "expired",
            ReportState::Retracted => "retracted",
        }
    }
}

/// Community verdict on an existing report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmDecision {
    Confirm,
    Reject,
}

/// How a path's geometry was authored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathMode {
    /// Drawn point by point in an editor.
    Manual,
    /// Derived from a recorded trip.
    Automatic,
}

impl PathMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathMode::Manual => "manual",
            PathMode::Automatic => "automatic",
        }
    }
}

/// Where to search: an explicit point or a free-text address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocationQuery {
    Point { coord: Coordinate },
    Address { query: String },
}

// =============================================================================
// Records
// =============================================================================

/// A named route assembled from an ordered chain of segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRecord {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub session_id: String,
    /// Hidden paths are only returned to their owner.
    pub visibility: bool,
    pub mode: PathMode,
    /// Condition assigned by the author when the path was created.
    pub baseline_status: PathStatus,
    /// Condition currently shown to users, blended from reports.
    pub published_status: PathStatus,
    /// Quality score in `[0, 100]`, 100 = pristine.
    pub score: f64,
    /// Segment ids in traversal order.
    pub segment_ids: Vec<String>,
    /// First point of the chain.
    pub origin: Coordinate,
    /// Last point of the chain.
    pub destination: Coordinate,
    pub length_m: f64,
    pub created_at: DateTime<Utc>,
}

/// A recorded ride, kept as the ordered segments it traversed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub id: String,
    pub session_id: String,
    pub segment_ids: Vec<String>,
    pub length_m: f64,
    pub recorded_at: DateTime<Utc>,
}

/// An obstacle report pinned to one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub segment_id: String,
    pub session_id: String,
    /// Account id when the reporter was signed in, for cross-device
    /// attribution. Anonymous sessions leave it unset.
    pub user_id: Option<String>,
    pub obstacle: ObstacleType,
    /// The path condition this report votes for during aggregation.
    pub condition: PathStatus,
    /// Where on the map the reporter placed the obstacle.
    pub position: Coordinate,
    pub note: Option<String>,
    pub state: ReportState,
    /// Trust accumulated through confirmations, clamped to the
    /// configured `[min_reliability, max_reliability]` band.
    pub reliability: f64,
    pub confirm_count: u32,
    pub reject_count: u32,
    pub created_at: DateTime<Utc>,
    /// Set every time the community confirms the report.
    pub last_confirmed_at: Option<DateTime<Utc>>,
}

impl Report {
    /// The instant freshness decay is measured from. A confirmation
    /// restarts the clock, so a freshly confirmed report is as fresh as
    /// a new one.
    pub fn decay_anchor(&self) -> DateTime<Utc> {
        self.last_confirmed_at.unwrap_or(self.created_at)
    }
}

// =============================================================================
// Creation Parameters
// =============================================================================

/// Parameters for [`PathNetwork::create_path`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPath {
    pub title: String,
    pub description: Option<String>,
    pub session_id: String,
    pub visibility: bool,
    pub mode: PathMode,
    pub baseline_status: PathStatus,
    /// At least two points. Consecutive duplicates (within the match
    /// tolerance) are rejected as degenerate segments.
    pub points: Vec<Coordinate>,
}

/// Parameters for [`PathNetwork::record_trip`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrip {
    pub session_id: String,
    pub points: Vec<Coordinate>,
}

/// Parameters for [`PathNetwork::create_report`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReport {
    pub session_id: String,
    /// Account id when the reporter is signed in.
    pub user_id: Option<String>,
    pub segment_id: String,
    pub obstacle: ObstacleType,
    /// Condition the reporter claims the path is in.
    pub condition: PathStatus,
    /// Where on the map the reporter placed the obstacle.
    pub position: Coordinate,
    pub note: Option<String>,
}

// =============================================================================
// Configuration
// =============================================================================

/// Segment matching parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Endpoint match tolerance in raw degrees (about 5 m). Two
    /// candidate endpoints within this distance are the same node.
    pub match_tolerance_deg: f64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            match_tolerance_deg: 0.00005,
        }
    }
}

/// Proximity search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Tier-one radius in meters. Paths with an endpoint inside this
    /// count as direct matches.
    pub max_distance_m: f64,
    /// Extra meters beyond `max_distance_m` for tier-two near matches.
    pub near_buffer_m: f64,
    /// Half-width in degrees of the coarse index window scanned before
    /// precise distances are computed.
    pub coarse_window_deg: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_distance_m: 200.0,
            near_buffer_m: 50.0,
            coarse_window_deg: 0.005,
        }
    }
}

/// Report reliability and rate limiting parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Minutes for freshness to halve. Default is one day.
    pub half_life_min: f64,
    /// Reliability assigned to a brand-new report.
    pub initial_reliability: f64,
    /// Confirmation gain factor. The older the report, the more a
    /// confirmation is worth.
    pub confirm_alpha: f64,
    /// Rejection penalty factor, scaled by current freshness.
    pub reject_beta: f64,
    pub min_reliability: f64,
    pub max_reliability: f64,
    /// Reports whose freshness falls below this are expired.
    pub active_freshness_min: f64,
    /// Minutes a session must wait between reports on the same segment.
    pub cooldown_min: i64,
    /// Sliding window for the per-session rate limit, in minutes.
    pub rate_window_min: i64,
    /// Reports a session may file inside one window.
    pub rate_max_per_window: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            half_life_min: 1440.0,
            initial_reliability: 1.0,
            confirm_alpha: 0.2,
            reject_beta: 0.3,
            min_reliability: 0.1,
            max_reliability: 2.0,
            active_freshness_min: 0.05,
            cooldown_min: 10,
            rate_window_min: 60,
            rate_max_per_window: 5,
        }
    }
}

/// Status blending and scoring parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Weight of the report-derived status in the published blend.
    pub reported_weight: f64,
    /// Weight of the author's baseline status in the published blend.
    pub baseline_weight: f64,
    /// Score points lost per severity step of the published status.
    pub status_penalty: f64,
    /// Score points lost per unit of effective report weight.
    pub report_penalty_scale: f64,
    /// Cap on the total report-driven score penalty.
    pub report_penalty_cap: f64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            reported_weight: 0.7,
            baseline_weight: 0.3,
            status_penalty: 25.0,
            report_penalty_scale: 2.0,
            report_penalty_cap: 20.0,
        }
    }
}

/// Top-level engine configuration.
///
/// # Example
/// ```
/// use path_network::NetworkConfig;
///
/// let mut config = NetworkConfig::default();
/// config.search.max_distance_m = 150.0;
/// assert_eq!(config.report.rate_max_per_window, 5);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub segment: SegmentConfig,
    pub search: SearchConfig,
    pub report: ReportConfig,
    pub status: StatusConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_validity() {
        assert!(Coordinate::new(51.5, -0.12).is_valid());
        assert!(Coordinate::new(-90.0, 180.0).is_valid());
        assert!(!Coordinate::new(90.1, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, -180.5).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_status_ordering() {
        assert!(PathStatus::Optimal < PathStatus::Medium);
        assert!(PathStatus::RequiresMaintenance < PathStatus::Closed);
        assert_eq!(
            PathStatus::Closed.max(PathStatus::Optimal),
            PathStatus::Closed
        );
    }

    #[test]
    fn test_status_ordinal_roundtrip() {
        for status in PathStatus::ALL {
            assert_eq!(PathStatus::from_ordinal(status.ordinal()), Some(status));
        }
        assert_eq!(PathStatus::from_ordinal(5), None);
    }

    #[test]
    fn test_segment_length_and_midpoint() {
        let seg = Segment {
            id: "seg-1".to_string(),
            start: Coordinate::new(51.5000, -0.1200),
            end: Coordinate::new(51.5010, -0.1200),
        };
        // 0.001 degrees of latitude is about 111m
        assert!((seg.length_m() - 111.0).abs() < 2.0);
        assert!((seg.midpoint().lat - 51.5005).abs() < 1e-9);
    }

    #[test]
    fn test_report_decay_anchor_prefers_confirmation() {
        let created = Utc::now();
        let confirmed = created + chrono::Duration::minutes(30);
        let mut report = Report {
            id: "rep-1".to_string(),
            segment_id: "seg-1".to_string(),
            session_id: "session-1".to_string(),
            user_id: None,
            obstacle: ObstacleType::Pothole,
            condition: PathStatus::RequiresMaintenance,
            position: Coordinate::new(51.5, -0.12),
            note: None,
            state: ReportState::Active,
            reliability: 1.0,
            confirm_count: 0,
            reject_count: 0,
            created_at: created,
            last_confirmed_at: None,
        };
        assert_eq!(report.decay_anchor(), created);
        report.last_confirmed_at = Some(confirmed);
        assert_eq!(report.decay_anchor(), confirmed);
    }

    #[test]
    fn test_default_config_is_consistent() {
        let config = NetworkConfig::default();
        assert!(config.segment.match_tolerance_deg > 0.0);
        assert!(config.search.near_buffer_m > 0.0);
        assert!(config.report.min_reliability < config.report.max_reliability);
        let blend = config.status.reported_weight + config.status.baseline_weight;
        assert!((blend - 1.0).abs() < 1e-9);
    }
}
