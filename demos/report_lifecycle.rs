//! Walks a report through its whole life: filing, community votes,
//! decay and expiry, showing how the published path status follows.
//!
//! Run with: `cargo run --example report_lifecycle`
//! Set `RUST_LOG=debug` to watch the engine's internal logging.

use chrono::{Duration, Utc};
use path_network::{
    ConfirmDecision, Coordinate, LocationQuery, NewPath, NewReport, ObstacleType, PathMode,
    PathNetwork, PathStatus,
};

fn main() -> path_network::Result<()> {
    env_logger::init();

    let t0 = Utc::now();
    let mut network = PathNetwork::new();

    let points = vec![
        Coordinate::new(51.5000, -0.1200),
        Coordinate::new(51.5010, -0.1190),
        Coordinate::new(51.5020, -0.1180),
        Coordinate::new(51.5030, -0.1170),
    ];
    let origin = LocationQuery::Point { coord: points[0] };
    let destination = LocationQuery::Point {
        coord: points[points.len() - 1],
    };

    let path = network.create_path_at(
        NewPath {
            title: "Riverside greenway".to_string(),
            description: Some("Separated lane along the north bank".to_string()),
            session_id: "alice".to_string(),
            visibility: true,
            mode: PathMode::Manual,
            baseline_status: PathStatus::Optimal,
            points,
        },
        t0,
    )?;
    println!(
        "Created {} \"{}\": {} segments, {:.0} m, status {}",
        path.id,
        path.title,
        path.segment_ids.len(),
        path.length_m,
        path.published_status
    );

    let results = network.search_paths_at(&origin, &destination, None, t0)?;
    for hit in &results {
        println!(
            "  search hit: {} ({:?}, score {:.1})",
            hit.path.title, hit.tier, hit.path.score
        );
    }

    // Bob hits standing water on the second stretch
    let report = network.create_report_at(
        NewReport {
            session_id: "bob".to_string(),
            user_id: None,
            segment_id: path.segment_ids[1].clone(),
            obstacle: ObstacleType::Flooding,
            condition: PathStatus::Closed,
            position: Coordinate::new(51.5015, -0.1185),
            note: Some("Standing water across the full width".to_string()),
        },
        t0,
    )?;
    let downgraded = network.get_path(&path.id).cloned().unwrap_or(path.clone());
    println!(
        "{} filed on {}: path now {} (score {:.1})",
        report.id, report.segment_id, downgraded.published_status, downgraded.score
    );

    // A day later another rider confirms the flooding, which restores
    // the report's freshness and raises its reliability
    let t1 = t0 + Duration::minutes(1440);
    let confirmed = network.confirm_report_at(&report.id, ConfirmDecision::Confirm, t1)?;
    println!(
        "Confirmed after one day: reliability {:.2}, confirmations {}",
        confirmed.reliability, confirmed.confirm_count
    );

    let results = network.search_paths_at(&origin, &destination, None, t1)?;
    for hit in &results {
        println!(
            "  search hit: {} ({:?}, status {}, score {:.1})",
            hit.path.title, hit.tier, hit.path.published_status, hit.path.score
        );
    }

    // Nobody re-confirms; five days on the report has decayed away
    let t2 = t1 + Duration::minutes(7200);
    let expired = network.refresh_reports_at(t2);
    let restored = network
        .get_path(&path.id)
        .cloned()
        .unwrap_or(path);
    println!(
        "{} report(s) expired after five quiet days: path back to {} (score {:.1})",
        expired, restored.published_status, restored.score
    );

    let stats = network.stats();
    println!(
        "Final state: {} segments, {} paths, {} reports ({} active)",
        stats.segment_count, stats.path_count, stats.report_count, stats.active_report_count
    );

    Ok(())
}
