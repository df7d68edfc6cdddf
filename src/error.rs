//! Unified error handling for the path-network library.
//!
//! This module provides one error type for all network operations, with
//! variants carrying enough context to map onto an HTTP status at the
//! routing layer (400 for malformed input, 404 for unknown ids, 429 for
//! throttled submissions, 5xx for collaborator/storage trouble).

use std::fmt;

/// Unified error type for path-network operations.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkError {
    /// Coordinate outside WGS84 ranges or non-finite
    InvalidCoordinate { lat: f64, lng: f64 },
    /// Segment endpoints collapse to a single location within tolerance
    InvalidSegment {
        separation_deg: f64,
        tolerance_deg: f64,
    },
    /// Polyline has too few usable points
    InsufficientPoints {
        point_count: usize,
        minimum_required: usize,
    },
    /// Segment bag splits into disconnected pieces
    DisjointSegments { reachable: usize, total: usize },
    /// A junction fans out into more than one onward segment
    BranchingPath { lat: f64, lng: f64, fan_out: usize },
    /// Every node is balanced; the bag closes on itself with no free end
    CyclicPath { segment_count: usize },
    /// Session exceeded its submission budget for the trailing window
    RateLimited { retry_after_min: i64 },
    /// Session reported the same segment too recently
    Cooldown { retry_after_min: i64 },
    /// Unknown entity id
    NotFound { kind: &'static str, id: String },
    /// Caller does not own the entity it is trying to change
    Forbidden { kind: &'static str, id: String },
    /// Geocoding collaborator failure
    Geocoding { message: String },
    /// Road-snapping collaborator failure
    Snapping { message: String },
    /// Persistence/storage error
    Persistence { message: String },
    /// The entity is not in a state that allows the operation
    Conflict { message: String },
    /// Generic internal error
    Internal { message: String },
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::InvalidCoordinate { lat, lng } => {
                write!(f, "Invalid coordinate ({}, {})", lat, lng)
            }
            NetworkError::InvalidSegment {
                separation_deg,
                tolerance_deg,
            } => {
                write!(
                    f,
                    "Degenerate segment: endpoints {:.7} deg apart, tolerance {:.7} deg",
                    separation_deg, tolerance_deg
                )
            }
            NetworkError::InsufficientPoints {
                point_count,
                minimum_required,
            } => {
                write!(
                    f,
                    "Polyline has {} points, minimum {} required",
                    point_count, minimum_required
                )
            }
            NetworkError::DisjointSegments { reachable, total } => {
                write!(
                    f,
                    "Disjoint segments: only {} of {} reachable from the chain start",
                    reachable, total
                )
            }
            NetworkError::BranchingPath { lat, lng, fan_out } => {
                write!(
                    f,
                    "Branching path: node ({:.6}, {:.6}) has {} outgoing segments",
                    lat, lng, fan_out
                )
            }
            NetworkError::CyclicPath { segment_count } => {
                write!(
                    f,
                    "Cyclic path: {} segments form a loop with no free endpoint",
                    segment_count
                )
            }
            NetworkError::RateLimited { retry_after_min } => {
                write!(f, "Rate limited: retry after {} minutes", retry_after_min)
            }
            NetworkError::Cooldown { retry_after_min } => {
                write!(
                    f,
                    "Segment cooldown active: retry after {} minutes",
                    retry_after_min
                )
            }
            NetworkError::NotFound { kind, id } => {
                write!(f, "Unknown {} '{}'", kind, id)
            }
            NetworkError::Forbidden { kind, id } => {
                write!(f, "Not the owner of {} '{}'", kind, id)
            }
            NetworkError::Geocoding { message } => {
                write!(f, "Geocoding error: {}", message)
            }
            NetworkError::Snapping { message } => {
                write!(f, "Road snapping error: {}", message)
            }
            NetworkError::Persistence { message } => {
                write!(f, "Persistence error: {}", message)
            }
            NetworkError::Conflict { message } => {
                write!(f, "Write conflict: {}", message)
            }
            NetworkError::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for NetworkError {}

/// Result type alias for path-network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Extension trait for converting Option to NetworkError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a not-found error.
    fn ok_or_not_found(self, kind: &'static str, id: &str) -> Result<T>;

    /// Convert Option to Result with a generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, kind: &'static str, id: &str) -> Result<T> {
        self.ok_or_else(|| NetworkError::NotFound {
            kind,
            id: id.to_string(),
        })
    }

    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| NetworkError::Internal {
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetworkError::NotFound {
            kind: "path",
            id: "path-9".to_string(),
        };
        assert!(err.to_string().contains("path"));
        assert!(err.to_string().contains("path-9"));

        let err = NetworkError::RateLimited { retry_after_min: 12 };
        assert!(err.to_string().contains("12 minutes"));
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        let result = none.ok_or_not_found("segment", "seg-1");
        assert!(matches!(result, Err(NetworkError::NotFound { .. })));

        let some = Some(5).ok_or_internal("unreachable");
        assert_eq!(some.unwrap(), 5);
    }
}
