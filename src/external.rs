//! Collaborator interfaces.
//!
//! Geocoding and road snapping are external services as far as the
//! engine is concerned. The engine talks to them through the two traits
//! here and degrades when they are absent or failing: an address that
//! cannot be geocoded produces an empty search result, and a snap
//! failure falls back to the raw recorded coordinates. HTTP-backed
//! implementations live in the `http` module behind the `http` feature;
//! the types below also ship small offline implementations for tests
//! and demos.

use std::collections::HashMap;

use crate::error::Result;
use crate::Coordinate;

/// Resolves free-text locations to coordinates.
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` means the service answered but found nothing. An
    /// `Err` is treated the same way by the search path, after logging.
    fn geocode(&self, query: &str) -> Result<Option<Coordinate>>;
}

/// Aligns noisy GPS traces to road geometry.
pub trait RoadSnapper: Send + Sync {
    /// Returns one snapped coordinate per input coordinate.
    fn snap(&self, points: &[Coordinate]) -> Result<Vec<Coordinate>>;
}

/// In-memory geocoder over a fixed table of known places.
///
/// # Example
/// ```
/// use path_network::external::{Geocoder, StaticGeocoder};
/// use path_network::Coordinate;
///
/// let geocoder = StaticGeocoder::from_entries([
///     ("trafalgar square", Coordinate::new(51.5080, -0.1281)),
/// ]);
/// let hit = geocoder.geocode("Trafalgar Square").unwrap();
/// assert!(hit.is_some());
/// assert!(geocoder.geocode("atlantis").unwrap().is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticGeocoder {
    entries: HashMap<String, Coordinate>,
}

impl StaticGeocoder {
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Coordinate)>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(name, coord)| (normalize(&name.into()), coord))
                .collect(),
        }
    }
}

impl Geocoder for StaticGeocoder {
    fn geocode(&self, query: &str) -> Result<Option<Coordinate>> {
        Ok(self.entries.get(&normalize(query)).copied())
    }
}

/// Snapper that returns coordinates unchanged. Stands in for the road
/// network service when running offline.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentitySnapper;

impl RoadSnapper for IdentitySnapper {
    fn snap(&self, points: &[Coordinate]) -> Result<Vec<Coordinate>> {
        Ok(points.to_vec())
    }
}

fn normalize(query: &str) -> String {
    query.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_geocoder_normalizes_queries() {
        let geocoder = StaticGeocoder::from_entries([
            ("Hyde Park Corner", Coordinate::new(51.5027, -0.1527)),
        ]);
        let hit = geocoder.geocode("  hyde park corner ").unwrap();
        assert_eq!(hit, Some(Coordinate::new(51.5027, -0.1527)));
    }

    #[test]
    fn test_identity_snapper_roundtrips() {
        let points = vec![
            Coordinate::new(51.5000, -0.1200),
            Coordinate::new(51.5010, -0.1190),
        ];
        assert_eq!(IdentitySnapper.snap(&points).unwrap(), points);
    }
}
