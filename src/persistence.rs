//! # SQLite Persistence
//!
//! Durable storage for the whole network state: segments, paths, trips,
//! reports and the engine configuration.
//!
//! The store supports two styles of use:
//!
//! - **Snapshot**: [`SqliteStore::save`] writes the complete engine
//!   state in one transaction and [`SqliteStore::load`] rebuilds a
//!   [`PathNetwork`] from it
//! - **Incremental**: `store_*`/`delete_*` mirror single records as
//!   they change, so several processes can share one database
//!
//! Segment rows carry their endpoint cells quantized at the match
//! tolerance, with a unique index over the directed cell pair. Under
//! concurrent inserts the constraint makes the first writer win:
//! [`SqliteStore::store_segment`] reports back the id that owns the
//! cell pair, which is the earlier segment's id when the insert lost
//! the race.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, types::Type, Connection, OptionalExtension, Result as SqlResult};

use crate::geo_utils::CoordKey;
use crate::network::PathNetwork;
use crate::{
    Coordinate, NetworkConfig, ObstacleType, PathMode, PathRecord, PathStatus, Report,
    ReportState, Segment, TripRecord,
};

// ============================================================================
// SQLite Store
// ============================================================================

/// SQLite-backed store for network state.
pub struct SqliteStore {
    db: Connection,
    tolerance_deg: f64,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open(db_path: &str) -> SqlResult<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        let config = Self::load_config(&db)?;
        Ok(Self {
            db,
            tolerance_deg: config.segment.match_tolerance_deg,
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> SqlResult<Self> {
        Self::open(":memory:")
    }

    fn init_schema(conn: &Connection) -> SqlResult<()> {
        conn.execute_batch(
            r#"
            -- Deduplicated segment geometry. The cell columns quantize the
            -- endpoints at the match tolerance; the unique index over the
            -- directed cell pair arbitrates concurrent inserts.
            CREATE TABLE IF NOT EXISTS segments (
                id TEXT PRIMARY KEY,
                start_lat REAL NOT NULL,
                start_lng REAL NOT NULL,
                end_lat REAL NOT NULL,
                end_lng REAL NOT NULL,
                start_cell_lat INTEGER NOT NULL,
                start_cell_lng INTEGER NOT NULL,
                end_cell_lat INTEGER NOT NULL,
                end_cell_lng INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_segments_cells
                ON segments(start_cell_lat, start_cell_lng, end_cell_lat, end_cell_lng);

            CREATE TABLE IF NOT EXISTS paths (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                session_id TEXT NOT NULL,
                visibility INTEGER NOT NULL,
                mode TEXT NOT NULL,
                baseline_status TEXT NOT NULL,
                published_status TEXT NOT NULL,
                score REAL NOT NULL,
                origin_lat REAL NOT NULL,
                origin_lng REAL NOT NULL,
                destination_lat REAL NOT NULL,
                destination_lng REAL NOT NULL,
                length_m REAL NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Chain membership in traversal order
            CREATE TABLE IF NOT EXISTS path_segments (
                path_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                segment_id TEXT NOT NULL,
                PRIMARY KEY (path_id, position),
                FOREIGN KEY (path_id) REFERENCES paths(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS trips (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                length_m REAL NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trip_segments (
                trip_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                segment_id TEXT NOT NULL,
                PRIMARY KEY (trip_id, position),
                FOREIGN KEY (trip_id) REFERENCES trips(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                segment_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                user_id TEXT,
                obstacle TEXT NOT NULL,
                condition TEXT NOT NULL,
                position_lat REAL NOT NULL,
                position_lng REAL NOT NULL,
                note TEXT,
                state TEXT NOT NULL,
                reliability REAL NOT NULL,
                confirm_count INTEGER NOT NULL,
                reject_count INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                last_confirmed_at TEXT
            );

            -- Engine configuration as a MessagePack blob
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                data BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_path_segments_segment ON path_segments(segment_id);
            CREATE INDEX IF NOT EXISTS idx_reports_segment ON reports(segment_id, state);
            CREATE INDEX IF NOT EXISTS idx_reports_session ON reports(session_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_reports_session_segment
                ON reports(session_id, segment_id, created_at);

            PRAGMA foreign_keys = ON;
        "#,
        )?;
        Ok(())
    }

    // ========================================================================
    // Snapshot Save & Load
    // ========================================================================

    /// Write the complete engine state, replacing whatever the store
    /// held before. Runs in one transaction.
    pub fn save(&mut self, network: &PathNetwork) -> SqlResult<()> {
        self.tolerance_deg = network.get_config().segment.match_tolerance_deg;
        let tolerance = self.tolerance_deg;

        let tx = self.db.transaction()?;
        tx.execute_batch(
            "DELETE FROM path_segments;
             DELETE FROM trip_segments;
             DELETE FROM reports;
             DELETE FROM trips;
             DELETE FROM paths;
             DELETE FROM segments;",
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO segments (id, start_lat, start_lng, end_lat, end_lng,
                                       start_cell_lat, start_cell_lng, end_cell_lat, end_cell_lng)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for segment in network.iter_segments() {
                let start = CoordKey::bucket(&segment.start, tolerance);
                let end = CoordKey::bucket(&segment.end, tolerance);
                stmt.execute(params![
                    segment.id,
                    segment.start.lat,
                    segment.start.lng,
                    segment.end.lat,
                    segment.end.lng,
                    start.lat_cell,
                    start.lng_cell,
                    end.lat_cell,
                    end.lng_cell,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO paths (id, title, description, session_id, visibility, mode,
                                    baseline_status, published_status, score, origin_lat,
                                    origin_lng, destination_lat, destination_lng, length_m,
                                    created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            let mut chain_stmt = tx.prepare(
                "INSERT INTO path_segments (path_id, position, segment_id) VALUES (?, ?, ?)",
            )?;
            for path in network.iter_paths() {
                stmt.execute(params![
                    path.id,
                    path.title,
                    path.description,
                    path.session_id,
                    path.visibility,
                    path.mode.as_str(),
                    path.baseline_status.as_str(),
                    path.published_status.as_str(),
                    path.score,
                    path.origin.lat,
                    path.origin.lng,
                    path.destination.lat,
                    path.destination.lng,
                    path.length_m,
                    path.created_at.to_rfc3339(),
                ])?;
                for (position, segment_id) in path.segment_ids.iter().enumerate() {
                    chain_stmt.execute(params![path.id, position as i64, segment_id])?;
                }
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO trips (id, session_id, length_m, recorded_at) VALUES (?, ?, ?, ?)",
            )?;
            let mut chain_stmt = tx.prepare(
                "INSERT INTO trip_segments (trip_id, position, segment_id) VALUES (?, ?, ?)",
            )?;
            for trip in network.iter_trips() {
                stmt.execute(params![
                    trip.id,
                    trip.session_id,
                    trip.length_m,
                    trip.recorded_at.to_rfc3339(),
                ])?;
                for (position, segment_id) in trip.segment_ids.iter().enumerate() {
                    chain_stmt.execute(params![trip.id, position as i64, segment_id])?;
                }
            }
        }

        for report in network.iter_reports() {
            insert_report(&tx, report)?;
        }

        let config_blob = rmp_serde::to_vec(network.get_config()).unwrap_or_default();
        tx.execute(
            "INSERT OR REPLACE INTO config (key, data) VALUES ('network', ?)",
            params![config_blob],
        )?;
        tx.commit()?;

        let stats = network.stats();
        info!(
            "[SqliteStore] Saved {} segments, {} paths, {} trips, {} reports",
            stats.segment_count, stats.path_count, stats.trip_count, stats.report_count
        );
        Ok(())
    }

    /// Rebuild an engine from the store.
    pub fn load(&self) -> SqlResult<PathNetwork> {
        let config = Self::load_config(&self.db)?;
        let segments = self.load_segments()?;
        let paths = self.load_paths()?;
        let trips = self.load_trips()?;
        let reports = self.load_reports()?;
        Ok(PathNetwork::restore(config, segments, paths, trips, reports))
    }

    fn load_config(conn: &Connection) -> SqlResult<NetworkConfig> {
        let config: Option<NetworkConfig> = conn
            .query_row("SELECT data FROM config WHERE key = 'network'", [], |row| {
                let blob: Vec<u8> = row.get(0)?;
                Ok(rmp_serde::from_slice(&blob).unwrap_or_default())
            })
            .optional()?;
        Ok(config.unwrap_or_default())
    }

    fn load_segments(&self) -> SqlResult<Vec<Segment>> {
        let mut stmt = self
            .db
            .prepare("SELECT id, start_lat, start_lng, end_lat, end_lng FROM segments")?;
        let rows = stmt.query_map([], |row| {
            Ok(Segment {
                id: row.get(0)?,
                start: Coordinate::new(row.get(1)?, row.get(2)?),
                end: Coordinate::new(row.get(3)?, row.get(4)?),
            })
        })?;
        rows.collect()
    }

    fn load_paths(&self) -> SqlResult<Vec<PathRecord>> {
        let mut chains = self.load_chain_refs("path_segments", "path_id")?;

        let mut stmt = self.db.prepare(
            "SELECT id, title, description, session_id, visibility, mode, baseline_status,
                    published_status, score, origin_lat, origin_lng, destination_lat,
                    destination_lng, length_m, created_at
             FROM paths",
        )?;
        let rows = stmt.query_map([], |row| {
            let mode: String = row.get(5)?;
            let baseline: String = row.get(6)?;
            let published: String = row.get(7)?;
            let created_at: String = row.get(14)?;
            Ok(PathRecord {
                id: row.get(0)?,
                title: row.get(1)?,
                description: row.get(2)?,
                session_id: row.get(3)?,
                visibility: row.get(4)?,
                mode: parse_mode(&mode).ok_or_else(|| column_error(5, &mode))?,
                baseline_status: parse_status(&baseline)
                    .ok_or_else(|| column_error(6, &baseline))?,
                published_status: parse_status(&published)
                    .ok_or_else(|| column_error(7, &published))?,
                score: row.get(8)?,
                segment_ids: Vec::new(),
                origin: Coordinate::new(row.get(9)?, row.get(10)?),
                destination: Coordinate::new(row.get(11)?, row.get(12)?),
                length_m: row.get(13)?,
                created_at: parse_timestamp(14, &created_at)?,
            })
        })?;

        let mut paths = Vec::new();
        for row in rows {
            let mut path = row?;
            path.segment_ids = chains.remove(&path.id).unwrap_or_default();
            paths.push(path);
        }
        Ok(paths)
    }

    fn load_trips(&self) -> SqlResult<Vec<TripRecord>> {
        let mut chains = self.load_chain_refs("trip_segments", "trip_id")?;

        let mut stmt = self
            .db
            .prepare("SELECT id, session_id, length_m, recorded_at FROM trips")?;
        let rows = stmt.query_map([], |row| {
            let recorded_at: String = row.get(3)?;
            Ok(TripRecord {
                id: row.get(0)?,
                session_id: row.get(1)?,
                segment_ids: Vec::new(),
                length_m: row.get(2)?,
                recorded_at: parse_timestamp(3, &recorded_at)?,
            })
        })?;

        let mut trips = Vec::new();
        for row in rows {
            let mut trip = row?;
            trip.segment_ids = chains.remove(&trip.id).unwrap_or_default();
            trips.push(trip);
        }
        Ok(trips)
    }

    fn load_reports(&self) -> SqlResult<Vec<Report>> {
        let mut stmt = self.db.prepare(
            "SELECT id, segment_id, session_id, user_id, obstacle, condition, position_lat,
                    position_lng, note, state, reliability, confirm_count, reject_count,
                    created_at, last_confirmed_at
             FROM reports",
        )?;
        let rows = stmt.query_map([], |row| {
            let obstacle: String = row.get(4)?;
            let condition: String = row.get(5)?;
            let state: String = row.get(9)?;
            let created_at: String = row.get(13)?;
            let last_confirmed_at: Option<String> = row.get(14)?;
            Ok(Report {
                id: row.get(0)?,
                segment_id: row.get(1)?,
                session_id: row.get(2)?,
                user_id: row.get(3)?,
                obstacle: parse_obstacle(&obstacle).ok_or_else(|| column_error(4, &obstacle))?,
                condition: parse_status(&condition).ok_or_else(|| column_error(5, &condition))?,
                position: Coordinate::new(row.get(6)?, row.get(7)?),
                note: row.get(8)?,
                state: parse_state(&state).ok_or_else(|| column_error(9, &state))?,
                reliability: row.get(10)?,
                confirm_count: row.get(11)?,
                reject_count: row.get(12)?,
                created_at: parse_timestamp(13, &created_at)?,
                last_confirmed_at: match last_confirmed_at {
                    Some(value) => Some(parse_timestamp(14, &value)?),
                    None => None,
                },
            })
        })?;
        rows.collect()
    }

    fn load_chain_refs(
        &self,
        table: &str,
        owner_column: &str,
    ) -> SqlResult<HashMap<String, Vec<String>>> {
        let mut stmt = self.db.prepare(&format!(
            "SELECT {owner_column}, segment_id FROM {table} ORDER BY {owner_column}, position"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut chains: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            let (owner, segment_id) = row?;
            chains.entry(owner).or_default().push(segment_id);
        }
        Ok(chains)
    }

    // ========================================================================
    // Incremental Storage
    // ========================================================================

    /// Insert a segment, first writer wins. Returns the id that owns
    /// the directed cell pair afterwards: the caller's own id when the
    /// insert landed, the earlier segment's id when it lost a race.
    pub fn store_segment(&self, segment: &Segment) -> SqlResult<String> {
        let start = CoordKey::bucket(&segment.start, self.tolerance_deg);
        let end = CoordKey::bucket(&segment.end, self.tolerance_deg);

        let inserted = self.db.execute(
            "INSERT OR IGNORE INTO segments (id, start_lat, start_lng, end_lat, end_lng,
                                             start_cell_lat, start_cell_lng, end_cell_lat,
                                             end_cell_lng)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                segment.id,
                segment.start.lat,
                segment.start.lng,
                segment.end.lat,
                segment.end.lng,
                start.lat_cell,
                start.lng_cell,
                end.lat_cell,
                end.lng_cell,
            ],
        )?;
        if inserted > 0 {
            return Ok(segment.id.clone());
        }

        self.db.query_row(
            "SELECT id FROM segments
             WHERE start_cell_lat = ? AND start_cell_lng = ?
               AND end_cell_lat = ? AND end_cell_lng = ?",
            params![start.lat_cell, start.lng_cell, end.lat_cell, end.lng_cell],
            |row| row.get(0),
        )
    }

    /// Upsert one path together with its chain membership.
    pub fn store_path(&mut self, path: &PathRecord) -> SqlResult<()> {
        let tx = self.db.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO paths (id, title, description, session_id, visibility,
                                           mode, baseline_status, published_status, score,
                                           origin_lat, origin_lng, destination_lat,
                                           destination_lng, length_m, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                path.id,
                path.title,
                path.description,
                path.session_id,
                path.visibility,
                path.mode.as_str(),
                path.baseline_status.as_str(),
                path.published_status.as_str(),
                path.score,
                path.origin.lat,
                path.origin.lng,
                path.destination.lat,
                path.destination.lng,
                path.length_m,
                path.created_at.to_rfc3339(),
            ],
        )?;
        tx.execute(
            "DELETE FROM path_segments WHERE path_id = ?",
            params![path.id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO path_segments (path_id, position, segment_id) VALUES (?, ?, ?)",
            )?;
            for (position, segment_id) in path.segment_ids.iter().enumerate() {
                stmt.execute(params![path.id, position as i64, segment_id])?;
            }
        }
        tx.commit()
    }

    /// Upsert one trip together with its chain membership.
    pub fn store_trip(&mut self, trip: &TripRecord) -> SqlResult<()> {
        let tx = self.db.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO trips (id, session_id, length_m, recorded_at)
             VALUES (?, ?, ?, ?)",
            params![
                trip.id,
                trip.session_id,
                trip.length_m,
                trip.recorded_at.to_rfc3339(),
            ],
        )?;
        tx.execute(
            "DELETE FROM trip_segments WHERE trip_id = ?",
            params![trip.id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO trip_segments (trip_id, position, segment_id) VALUES (?, ?, ?)",
            )?;
            for (position, segment_id) in trip.segment_ids.iter().enumerate() {
                stmt.execute(params![trip.id, position as i64, segment_id])?;
            }
        }
        tx.commit()
    }

    /// Upsert one report.
    pub fn store_report(&self, report: &Report) -> SqlResult<()> {
        insert_report(&self.db, report)
    }

    /// Remove a path; the junction rows cascade.
    pub fn delete_path(&self, path_id: &str) -> SqlResult<()> {
        self.db
            .execute("DELETE FROM paths WHERE id = ?", params![path_id])?;
        Ok(())
    }

    /// Remove a trip; the junction rows cascade.
    pub fn delete_trip(&self, trip_id: &str) -> SqlResult<()> {
        self.db
            .execute("DELETE FROM trips WHERE id = ?", params![trip_id])?;
        Ok(())
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Row counts, for monitoring and tests.
    pub fn stats(&self) -> SqlResult<StoreStats> {
        Ok(StoreStats {
            segment_count: self.count("segments")?,
            path_count: self.count("paths")?,
            trip_count: self.count("trips")?,
            report_count: self.count("reports")?,
        })
    }

    fn count(&self, table: &str) -> SqlResult<u32> {
        self.db
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
    }
}

/// Row counts in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub segment_count: u32,
    pub path_count: u32,
    pub trip_count: u32,
    pub report_count: u32,
}

// ============================================================================
// Row Helpers
// ============================================================================

fn insert_report(conn: &Connection, report: &Report) -> SqlResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO reports (id, segment_id, session_id, user_id, obstacle,
                                         condition, position_lat, position_lng, note, state,
                                         reliability, confirm_count, reject_count, created_at,
                                         last_confirmed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            report.id,
            report.segment_id,
            report.session_id,
            report.user_id,
            report.obstacle.as_str(),
            report.condition.as_str(),
            report.position.lat,
            report.position.lng,
            report.note,
            report.state.as_str(),
            report.reliability,
            report.confirm_count,
            report.reject_count,
            report.created_at.to_rfc3339(),
            report.last_confirmed_at.map(|at| at.to_rfc3339()),
        ],
    )?;
    Ok(())
}

fn parse_state(value: &str) -> Option<ReportState> {
    match value {
        "active" => Some(ReportState::Active),
        "expired" => Some(ReportState::Expired),
        "retracted" => Some(ReportState::Retracted),
        _ => None,
    }
}

fn parse_status(value: &str) -> Option<PathStatus> {
    PathStatus::ALL.iter().copied().find(|s| s.as_str() == value)
}

fn parse_obstacle(value: &str) -> Option<ObstacleType> {
    match value {
        "pothole" => Some(ObstacleType::Pothole),
        "flooding" => Some(ObstacleType::Flooding),
        "closure" => Some(ObstacleType::Closure),
        "other" => Some(ObstacleType::Other),
        _ => None,
    }
}

fn parse_mode(value: &str) -> Option<PathMode> {
    match value {
        "manual" => Some(PathMode::Manual),
        "automatic" => Some(PathMode::Automatic),
        _ => None,
    }
}

fn parse_timestamp(index: usize, value: &str) -> SqlResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn column_error(index: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        Type::Text,
        format!("unknown enum value '{value}'").into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConfirmDecision, NewPath, NewReport, NewTrip};

    fn sample_network() -> PathNetwork {
        let now = Utc::now();
        let mut network = PathNetwork::new();
        let path = network
            .create_path_at(
                NewPath {
                    title: "Towpath".to_string(),
                    description: Some("Flat gravel along the canal".to_string()),
                    session_id: "s1".to_string(),
                    visibility: true,
                    mode: PathMode::Manual,
                    baseline_status: PathStatus::Optimal,
                    points: vec![
                        Coordinate::new(51.5000, -0.1200),
                        Coordinate::new(51.5010, -0.1190),
                        Coordinate::new(51.5020, -0.1180),
                    ],
                },
                now,
            )
            .unwrap();
        network
            .record_trip_at(
                NewTrip {
                    session_id: "s2".to_string(),
                    points: vec![
                        Coordinate::new(51.5000, -0.1200),
                        Coordinate::new(51.5010, -0.1190),
                    ],
                },
                now,
            )
            .unwrap();
        let report = network
            .create_report_at(
                NewReport {
                    session_id: "s3".to_string(),
                    user_id: Some("acct-9".to_string()),
                    segment_id: path.segment_ids[0].clone(),
                    obstacle: ObstacleType::Flooding,
                    condition: PathStatus::Closed,
                    position: Coordinate::new(51.5005, -0.1195),
                    note: Some("Knee deep after rain".to_string()),
                },
                now,
            )
            .unwrap();
        network
            .confirm_report_at(&report.id, ConfirmDecision::Confirm, now)
            .unwrap();
        network
    }

    #[test]
    fn test_roundtrip_preserves_network() {
        let network = sample_network();
        let mut store = SqliteStore::in_memory().unwrap();
        store.save(&network).unwrap();

        let restored = store.load().unwrap();
        assert_eq!(restored.stats(), network.stats());
        assert_eq!(
            restored.get_path("path-1").unwrap(),
            network.get_path("path-1").unwrap()
        );
        assert_eq!(
            restored.get_trip("trip-1").unwrap(),
            network.get_trip("trip-1").unwrap()
        );
        let report = restored.get_report("rep-1").unwrap();
        assert_eq!(report, network.get_report("rep-1").unwrap());
        assert_eq!(report.confirm_count, 1);
        assert!(report.last_confirmed_at.is_some());
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let network = sample_network();
        let mut store = SqliteStore::in_memory().unwrap();
        store.save(&network).unwrap();
        store.save(&network).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.segment_count, 2);
        assert_eq!(stats.path_count, 1);
        assert_eq!(stats.trip_count, 1);
        assert_eq!(stats.report_count, 1);
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = NetworkConfig::default();
        config.search.max_distance_m = 150.0;
        config.report.cooldown_min = 20;
        let network = PathNetwork::with_config(config);

        let mut store = SqliteStore::in_memory().unwrap();
        store.save(&network).unwrap();

        let restored = store.load().unwrap();
        assert_eq!(restored.get_config().search.max_distance_m, 150.0);
        assert_eq!(restored.get_config().report.cooldown_min, 20);
    }

    #[test]
    fn test_load_empty_store_gives_defaults() {
        let store = SqliteStore::in_memory().unwrap();
        let network = store.load().unwrap();
        assert_eq!(network.path_count(), 0);
        assert_eq!(network.segment_count(), 0);
        assert_eq!(network.get_config().report.rate_max_per_window, 5);
    }

    #[test]
    fn test_store_segment_first_writer_wins() {
        let store = SqliteStore::in_memory().unwrap();
        let segment = Segment {
            id: "seg-1".to_string(),
            start: Coordinate::new(51.5000, -0.1200),
            end: Coordinate::new(51.5010, -0.1190),
        };
        assert_eq!(store.store_segment(&segment).unwrap(), "seg-1");

        // A second writer minting a different id for the same geometry
        // gets the original id back
        let rival = Segment {
            id: "seg-9".to_string(),
            ..segment.clone()
        };
        assert_eq!(store.store_segment(&rival).unwrap(), "seg-1");
        assert_eq!(store.stats().unwrap().segment_count, 1);

        // The reverse direction is a different cell pair
        let reversed = Segment {
            id: "seg-2".to_string(),
            start: segment.end,
            end: segment.start,
        };
        assert_eq!(store.store_segment(&reversed).unwrap(), "seg-2");
        assert_eq!(store.stats().unwrap().segment_count, 2);
    }

    #[test]
    fn test_store_path_replaces_chain() {
        let network = sample_network();
        let mut store = SqliteStore::in_memory().unwrap();
        store.save(&network).unwrap();

        let mut shortened = network.get_path("path-1").unwrap().clone();
        shortened.segment_ids.truncate(1);
        store.store_path(&shortened).unwrap();

        let restored = store.load().unwrap();
        assert_eq!(restored.get_path("path-1").unwrap().segment_ids.len(), 1);
    }

    #[test]
    fn test_delete_path_cascades_chain_rows() {
        let network = sample_network();
        let mut store = SqliteStore::in_memory().unwrap();
        store.save(&network).unwrap();

        store.delete_path("path-1").unwrap();
        assert_eq!(store.stats().unwrap().path_count, 0);

        let orphaned: u32 = store
            .db
            .query_row("SELECT COUNT(*) FROM path_segments", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphaned, 0);
    }
}
