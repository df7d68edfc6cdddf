//! HTTP clients for the geocoding and road-snapping collaborators.
//!
//! This module provides production implementations of the engine's
//! external seams:
//! - Forward geocoding against a Nominatim instance, rate limited to
//!   one request per second and backed by an LRU cache of results
//! - GPS trace snapping against an OSRM instance's match service
//! - Blocking adapters that drive the async clients from the
//!   synchronous engine

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::runtime::Runtime;
use tokio::sync::Mutex;

use crate::error::{NetworkError, Result};
use crate::external::{Geocoder, RoadSnapper};
use crate::Coordinate;

const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
const DEFAULT_OSRM_URL: &str = "https://router.project-osrm.org";
const DEFAULT_OSRM_PROFILE: &str = "bike";

// Public Nominatim instances require at most one request per second
const NOMINATIM_MIN_INTERVAL_MS: u64 = 1000;
const GEOCODE_CACHE_SIZE: usize = 200;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_RETRIES: u32 = 3;
const USER_AGENT: &str = concat!("path-network/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Wire Types
// ============================================================================

/// One hit from the Nominatim search endpoint. Coordinates arrive as
/// strings.
#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

fn place_coordinate(place: &NominatimPlace) -> Result<Coordinate> {
    let lat: f64 = place.lat.parse().map_err(|_| NetworkError::Geocoding {
        message: format!("unparseable latitude '{}'", place.lat),
    })?;
    let lng: f64 = place.lon.parse().map_err(|_| NetworkError::Geocoding {
        message: format!("unparseable longitude '{}'", place.lon),
    })?;
    let coord = Coordinate::new(lat, lng);
    if !coord.is_valid() {
        return Err(NetworkError::Geocoding {
            message: format!("service returned out-of-range coordinate ({lat}, {lng})"),
        });
    }
    Ok(coord)
}

/// OSRM match service response. On errors the service still replies
/// with JSON, carrying the failure in `code`/`message`.
#[derive(Debug, Deserialize)]
struct MatchResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    tracepoints: Vec<Option<Tracepoint>>,
}

#[derive(Debug, Deserialize)]
struct Tracepoint {
    /// `[lng, lat]`, OSRM's coordinate order.
    location: [f64; 2],
}

/// Pair each input point with its matched road position. Points the
/// service could not match keep their raw position, so the output stays
/// one-to-one with the input.
fn merge_tracepoints(
    points: &[Coordinate],
    tracepoints: &[Option<Tracepoint>],
) -> Result<Vec<Coordinate>> {
    if tracepoints.len() != points.len() {
        return Err(NetworkError::Snapping {
            message: format!(
                "service returned {} tracepoints for {} input points",
                tracepoints.len(),
                points.len()
            ),
        });
    }

    let mut unmatched = 0;
    let snapped = points
        .iter()
        .zip(tracepoints)
        .map(|(raw, tracepoint)| match tracepoint {
            Some(tp) => Coordinate::new(tp.location[1], tp.location[0]),
            None => {
                unmatched += 1;
                *raw
            }
        })
        .collect();
    if unmatched > 0 {
        debug!(
            "[OsrmClient] {} of {} points had no road match",
            unmatched,
            points.len()
        );
    }
    Ok(snapped)
}

// ============================================================================
// Rate Limiting & Caching
// ============================================================================

/// Spaces requests at least one interval apart. Concurrent callers
/// queue on the lock, so the spacing holds across tasks.
struct MinInterval {
    last: Mutex<Option<Instant>>,
    interval: Duration,
}

impl MinInterval {
    fn new(interval: Duration) -> Self {
        Self {
            last: Mutex::new(None),
            interval,
        }
    }

    async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let ready = previous + self.interval;
            let now = Instant::now();
            if ready > now {
                let pause = ready - now;
                debug!("[NominatimClient] Rate limit: waiting {:?}", pause);
                tokio::time::sleep(pause).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// LRU cache of geocoded queries, misses included, so repeating an
/// unknown address does not burn another request.
///
/// Eviction scans for the oldest entry. At a couple hundred entries the
/// linear scan is cheaper than maintaining a recency list.
struct GeocodeCache {
    capacity: usize,
    entries: HashMap<String, CacheSlot>,
    ticks: u64,
}

struct CacheSlot {
    result: Option<Coordinate>,
    last_access: u64,
}

impl GeocodeCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            ticks: 0,
        }
    }

    fn get(&mut self, key: &str) -> Option<Option<Coordinate>> {
        let slot = self.entries.get_mut(key)?;
        self.ticks += 1;
        slot.last_access = self.ticks;
        Some(slot.result)
    }

    fn insert(&mut self, key: String, result: Option<Coordinate>) {
        self.ticks += 1;
        if let Some(slot) = self.entries.get_mut(&key) {
            slot.result = result;
            slot.last_access = self.ticks;
            return;
        }

        if self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, slot)| slot.last_access)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                self.entries.remove(&key);
            }
        }
        self.entries.insert(
            key,
            CacheSlot {
                result,
                last_access: self.ticks,
            },
        );
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// Nominatim Geocoding
// ============================================================================

/// Async forward-geocoding client for a Nominatim instance.
pub struct NominatimClient {
    client: Client,
    base_url: String,
    limiter: MinInterval,
    cache: Mutex<GeocodeCache>,
}

impl NominatimClient {
    /// Client against the public openstreetmap.org instance.
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_NOMINATIM_URL)
    }

    /// Client against a self-hosted instance.
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| NetworkError::Geocoding {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: MinInterval::new(Duration::from_millis(NOMINATIM_MIN_INTERVAL_MS)),
            cache: Mutex::new(GeocodeCache::new(GEOCODE_CACHE_SIZE)),
        })
    }

    /// Resolve a free-text query to a coordinate. Returns `Ok(None)`
    /// when the service knows no such place.
    pub async fn geocode(&self, query: &str) -> Result<Option<Coordinate>> {
        let key = query.trim().to_lowercase();
        if let Some(cached) = self.cache.lock().await.get(&key) {
            debug!("[NominatimClient] Cache hit for '{key}'");
            return Ok(cached);
        }

        let url = format!("{}/search", self.base_url);
        let mut retries = 0;
        let result = loop {
            self.limiter.wait().await;
            let response = self
                .client
                .get(&url)
                .query(&[("q", query), ("format", "jsonv2"), ("limit", "1")])
                .send()
                .await;

            match response {
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        return Err(NetworkError::Geocoding {
                            message: "rate limited by geocoding service".to_string(),
                        });
                    }
                    let backoff = Duration::from_millis(500 * (1 << retries));
                    warn!(
                        "[NominatimClient] 429 for '{query}', retry {retries} after {backoff:?}"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Ok(resp) => {
                    let status = resp.status();
                    if !status.is_success() {
                        return Err(NetworkError::Geocoding {
                            message: format!("HTTP {status}"),
                        });
                    }
                    let places: Vec<NominatimPlace> =
                        resp.json().await.map_err(|e| NetworkError::Geocoding {
                            message: format!("malformed response: {e}"),
                        })?;
                    break match places.first() {
                        Some(place) => Some(place_coordinate(place)?),
                        None => None,
                    };
                }
                Err(e) => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        return Err(NetworkError::Geocoding {
                            message: format!("request failed: {e}"),
                        });
                    }
                    let backoff = Duration::from_millis(500 * (1 << retries));
                    warn!(
                        "[NominatimClient] Error for '{query}': {e}, retry {retries} after {backoff:?}"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        };

        self.cache.lock().await.insert(key, result);
        Ok(result)
    }

    /// Number of cached queries, for monitoring.
    pub async fn cached_queries(&self) -> usize {
        self.cache.lock().await.len()
    }
}

// ============================================================================
// OSRM Road Snapping
// ============================================================================

/// Async client for an OSRM instance's match service.
pub struct OsrmClient {
    client: Client,
    base_url: String,
    profile: String,
}

impl OsrmClient {
    /// Client against the public project-osrm.org instance.
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_OSRM_URL)
    }

    /// Client against a self-hosted instance.
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| NetworkError::Snapping {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            profile: DEFAULT_OSRM_PROFILE.to_string(),
        })
    }

    /// Use a different routing profile (default `bike`).
    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile = profile.to_string();
        self
    }

    /// Snap a GPS trace onto the road network.
    ///
    /// The output is one-to-one with the input: points the service
    /// cannot match keep their raw position.
    pub async fn snap(&self, points: &[Coordinate]) -> Result<Vec<Coordinate>> {
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let coords: Vec<String> = points
            .iter()
            .map(|p| format!("{:.6},{:.6}", p.lng, p.lat))
            .collect();
        let url = format!(
            "{}/match/v1/{}/{}",
            self.base_url,
            self.profile,
            coords.join(";")
        );

        let response = self
            .client
            .get(&url)
            .query(&[("overview", "false")])
            .send()
            .await
            .map_err(|e| NetworkError::Snapping {
                message: format!("request failed: {e}"),
            })?;

        // OSRM reports match failures as HTTP 400 with a JSON body, so
        // fall through to the body for the real error code.
        let status = response.status();
        if !status.is_success() && status != StatusCode::BAD_REQUEST {
            return Err(NetworkError::Snapping {
                message: format!("HTTP {status}"),
            });
        }
        let parsed: MatchResponse =
            response.json().await.map_err(|e| NetworkError::Snapping {
                message: format!("malformed response: {e}"),
            })?;
        if parsed.code != "Ok" {
            let detail = parsed.message.unwrap_or_else(|| parsed.code.clone());
            return Err(NetworkError::Snapping { message: detail });
        }

        merge_tracepoints(points, &parsed.tracepoints)
    }
}

// ============================================================================
// Blocking Adapters
// ============================================================================

/// Drives a [`NominatimClient`] on a dedicated runtime so it can serve
/// the synchronous [`Geocoder`] seam. Must not be used from inside an
/// async runtime.
pub struct BlockingGeocoder {
    runtime: Runtime,
    client: NominatimClient,
}

impl BlockingGeocoder {
    pub fn new() -> Result<Self> {
        Self::with_client(NominatimClient::new()?)
    }

    pub fn with_client(client: NominatimClient) -> Result<Self> {
        let runtime = Runtime::new().map_err(|e| NetworkError::Geocoding {
            message: format!("failed to start runtime: {e}"),
        })?;
        Ok(Self { runtime, client })
    }
}

impl Geocoder for BlockingGeocoder {
    fn geocode(&self, query: &str) -> Result<Option<Coordinate>> {
        self.runtime.block_on(self.client.geocode(query))
    }
}

/// Drives an [`OsrmClient`] on a dedicated runtime so it can serve the
/// synchronous [`RoadSnapper`] seam. Must not be used from inside an
/// async runtime.
pub struct BlockingSnapper {
    runtime: Runtime,
    client: OsrmClient,
}

impl BlockingSnapper {
    pub fn new() -> Result<Self> {
        Self::with_client(OsrmClient::new()?)
    }

    pub fn with_client(client: OsrmClient) -> Result<Self> {
        let runtime = Runtime::new().map_err(|e| NetworkError::Snapping {
            message: format!("failed to start runtime: {e}"),
        })?;
        Ok(Self { runtime, client })
    }
}

impl RoadSnapper for BlockingSnapper {
    fn snap(&self, points: &[Coordinate]) -> Result<Vec<Coordinate>> {
        self.runtime.block_on(self.client.snap(points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_coordinate_parses_string_fields() {
        let places: Vec<NominatimPlace> =
            serde_json::from_str(r#"[{"lat":"51.5074","lon":"-0.1278","name":"London"}]"#)
                .unwrap();
        let coord = place_coordinate(&places[0]).unwrap();
        assert!((coord.lat - 51.5074).abs() < 1e-9);
        assert!((coord.lng - (-0.1278)).abs() < 1e-9);

        let bad = NominatimPlace {
            lat: "north".to_string(),
            lon: "-0.1278".to_string(),
        };
        assert!(matches!(
            place_coordinate(&bad),
            Err(NetworkError::Geocoding { .. })
        ));

        let out_of_range = NominatimPlace {
            lat: "123.0".to_string(),
            lon: "0.0".to_string(),
        };
        assert!(matches!(
            place_coordinate(&out_of_range),
            Err(NetworkError::Geocoding { .. })
        ));
    }

    #[test]
    fn test_merge_tracepoints_keeps_unmatched_raw() {
        let parsed: MatchResponse = serde_json::from_str(
            r#"{"code":"Ok","tracepoints":[{"location":[-0.1201,51.5001]},null]}"#,
        )
        .unwrap();
        let points = [
            Coordinate::new(51.5000, -0.1200),
            Coordinate::new(51.5010, -0.1190),
        ];

        let snapped = merge_tracepoints(&points, &parsed.tracepoints).unwrap();
        assert_eq!(snapped.len(), 2);
        // Matched point comes back in lat/lng order
        assert!((snapped[0].lat - 51.5001).abs() < 1e-9);
        assert!((snapped[0].lng - (-0.1201)).abs() < 1e-9);
        // Unmatched point keeps its raw position
        assert_eq!(snapped[1], points[1]);
    }

    #[test]
    fn test_merge_tracepoints_rejects_length_mismatch() {
        let points = [Coordinate::new(51.5, -0.12)];
        let err = merge_tracepoints(&points, &[]).unwrap_err();
        assert!(matches!(err, NetworkError::Snapping { .. }));
    }

    #[test]
    fn test_match_error_body_carries_code() {
        let parsed: MatchResponse =
            serde_json::from_str(r#"{"code":"NoMatch","message":"Could not match"}"#).unwrap();
        assert_eq!(parsed.code, "NoMatch");
        assert_eq!(parsed.message.as_deref(), Some("Could not match"));
        assert!(parsed.tracepoints.is_empty());
    }

    #[test]
    fn test_geocode_cache_evicts_oldest() {
        let mut cache = GeocodeCache::new(2);
        cache.insert("a".to_string(), Some(Coordinate::new(1.0, 1.0)));
        cache.insert("b".to_string(), Some(Coordinate::new(2.0, 2.0)));

        // Touch "a" so "b" is the eviction candidate
        cache.get("a");
        cache.insert("c".to_string(), None);

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        // A cached miss is still a hit
        assert_eq!(cache.get("c"), Some(None));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_min_interval_first_call_is_free() {
        let limiter = MinInterval::new(Duration::from_secs(1));
        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
