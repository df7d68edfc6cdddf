//! Report reliability and freshness decay.
//!
//! A report's influence is `reliability * freshness`. Reliability is the
//! community's trust, moved up by confirmations and down by rejections
//! inside a configured band. Freshness decays exponentially with age and
//! halves every `half_life_min` minutes; the clock measures from the
//! last confirmation, so confirming a report restarts its decay. All
//! functions here are pure in `now`, which is what makes the lifecycle
//! testable without sleeping.

use chrono::{DateTime, Utc};

use crate::{Report, ReportConfig};

/// Minutes elapsed since the report's decay anchor. Never negative, so
/// a clock-skewed future timestamp reads as age zero.
pub fn age_minutes(report: &Report, now: DateTime<Utc>) -> f64 {
    let elapsed = (now - report.decay_anchor()).num_milliseconds() as f64 / 60_000.0;
    elapsed.max(0.0)
}

/// Freshness in `(0, 1]`: `0.5 ^ (age / half_life)`.
///
/// # Example
/// ```
/// use chrono::{Duration, Utc};
/// use path_network::reliability::freshness;
/// use path_network::{Coordinate, ObstacleType, PathStatus, Report, ReportConfig, ReportState};
///
/// let created = Utc::now();
/// let report = Report {
///     id: "rep-1".to_string(),
///     segment_id: "seg-1".to_string(),
///     session_id: "session-1".to_string(),
///     user_id: None,
///     obstacle: ObstacleType::Pothole,
///     condition: PathStatus::RequiresMaintenance,
///     position: Coordinate::new(51.5, -0.12),
///     note: None,
///     state: ReportState::Active,
///     reliability: 1.0,
///     confirm_count: 0,
///     reject_count: 0,
///     created_at: created,
///     last_confirmed_at: None,
/// };
///
/// let config = ReportConfig::default(); // one-day half-life
/// let f = freshness(&report, &config, created + Duration::minutes(1440));
/// assert!((f - 0.5).abs() < 1e-9);
/// ```
pub fn freshness(report: &Report, config: &ReportConfig, now: DateTime<Utc>) -> f64 {
    0.5_f64.powf(age_minutes(report, now) / config.half_life_min)
}

/// The report's current pull on scoring: `reliability * freshness`.
///
/// State is not consulted here; callers only feed active reports into
/// aggregation.
pub fn effective_weight(report: &Report, config: &ReportConfig, now: DateTime<Utc>) -> f64 {
    report.reliability * freshness(report, config, now)
}

/// Whether the report has decayed below the activity floor.
pub fn is_stale(report: &Report, config: &ReportConfig, now: DateTime<Utc>) -> bool {
    freshness(report, config, now) < config.active_freshness_min
}

/// Apply a confirmation: boost reliability by `alpha * (1 - freshness)`
/// and restart the decay clock.
///
/// The gain scales with staleness. Confirming a brand-new report adds
/// nothing (everyone already believes it), confirming a nearly dead one
/// adds close to the full `confirm_alpha`, and either way the report is
/// fresh again afterwards.
pub fn apply_confirm(report: &mut Report, config: &ReportConfig, now: DateTime<Utc>) {
    let gain = config.confirm_alpha * (1.0 - freshness(report, config, now));
    report.reliability = clamp(report.reliability + gain, config);
    report.confirm_count += 1;
    report.last_confirmed_at = Some(now);
}

/// Apply a rejection: drop reliability by `beta * freshness`, leaving
/// the decay clock alone.
///
/// The penalty scales with freshness. Rejecting a fresh report hits
/// hard, rejecting one that has already faded barely moves it, and the
/// report keeps aging from its previous anchor.
pub fn apply_reject(report: &mut Report, config: &ReportConfig, now: DateTime<Utc>) {
    let penalty = config.reject_beta * freshness(report, config, now);
    report.reliability = clamp(report.reliability - penalty, config);
    report.reject_count += 1;
}

fn clamp(value: f64, config: &ReportConfig) -> f64 {
    value.clamp(config.min_reliability, config.max_reliability)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Coordinate, ObstacleType, PathStatus, ReportState};
    use chrono::Duration;

    fn report_at(created: DateTime<Utc>) -> Report {
        Report {
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
        }
    }

    fn config() -> ReportConfig {
        ReportConfig::default()
    }

    #[test]
    fn test_freshness_starts_at_one() {
        let now = Utc::now();
        let report = report_at(now);
        assert!((freshness(&report, &config(), now) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_freshness_halves_per_half_life() {
        let created = Utc::now();
        let report = report_at(created);
        let cfg = config();

        let one = freshness(&report, &cfg, created + Duration::minutes(1440));
        let two = freshness(&report, &cfg, created + Duration::minutes(2880));
        assert!((one - 0.5).abs() < 1e-9);
        assert!((two - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_freshness_is_monotone_in_age() {
        let created = Utc::now();
        let report = report_at(created);
        let cfg = config();

        let mut previous = f64::INFINITY;
        for minutes in [0, 10, 60, 360, 1440, 4000, 10_000] {
            let f = freshness(&report, &cfg, created + Duration::minutes(minutes));
            assert!(f > 0.0);
            assert!(f <= 1.0);
            assert!(f < previous || minutes == 0);
            previous = f;
        }
    }

    #[test]
    fn test_future_anchor_reads_as_fresh() {
        let created = Utc::now();
        let report = report_at(created);
        let f = freshness(&report, &config(), created - Duration::minutes(5));
        assert_eq!(f, 1.0);
    }

    #[test]
    fn test_effective_weight_tracks_both_factors() {
        let created = Utc::now();
        let mut report = report_at(created);
        report.reliability = 1.6;
        let cfg = config();

        let at_half_life = created + Duration::minutes(1440);
        let weight = effective_weight(&report, &cfg, at_half_life);
        assert!((weight - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_confirm_resets_decay_clock() {
        let created = Utc::now();
        let mut report = report_at(created);
        let cfg = config();

        let confirm_time = created + Duration::minutes(1440);
        apply_confirm(&mut report, &cfg, confirm_time);
        assert_eq!(report.last_confirmed_at, Some(confirm_time));
        assert_eq!(report.confirm_count, 1);

        // Right after confirmation the report is fully fresh again
        assert!((freshness(&report, &cfg, confirm_time) - 1.0).abs() < 1e-12);

        // And one half-life later its weight has halved from the
        // post-confirmation reliability, not from the creation time.
        let later = confirm_time + Duration::minutes(1440);
        let weight = effective_weight(&report, &cfg, later);
        assert!((weight - report.reliability * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_confirm_gain_scales_with_staleness() {
        let created = Utc::now();
        let cfg = config();

        // Confirming immediately adds nothing
        let mut fresh = report_at(created);
        apply_confirm(&mut fresh, &cfg, created);
        assert!((fresh.reliability - 1.0).abs() < 1e-12);

        // Confirming at one half-life adds alpha * 0.5
        let mut aged = report_at(created);
        apply_confirm(&mut aged, &cfg, created + Duration::minutes(1440));
        assert!((aged.reliability - (1.0 + cfg.confirm_alpha * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_reject_penalty_scales_with_freshness() {
        let created = Utc::now();
        let cfg = config();

        let mut fresh = report_at(created);
        apply_reject(&mut fresh, &cfg, created);
        assert!((fresh.reliability - (1.0 - cfg.reject_beta)).abs() < 1e-9);

        let mut aged = report_at(created);
        apply_reject(&mut aged, &cfg, created + Duration::minutes(1440));
        assert!((aged.reliability - (1.0 - cfg.reject_beta * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_reject_does_not_touch_clock() {
        let created = Utc::now();
        let mut report = report_at(created);
        apply_reject(&mut report, &config(), created + Duration::minutes(100));
        assert_eq!(report.last_confirmed_at, None);
        assert_eq!(report.decay_anchor(), created);
        assert_eq!(report.reject_count, 1);
    }

    #[test]
    fn test_reliability_stays_in_band() {
        let created = Utc::now();
        let cfg = config();

        let mut report = report_at(created);
        for _ in 0..20 {
            apply_reject(&mut report, &cfg, created);
        }
        assert_eq!(report.reliability, cfg.min_reliability);

        let mut report = report_at(created);
        for i in 0..50 {
            // Confirmations at one half-life intervals
            apply_confirm(&mut report, &cfg, created + Duration::minutes(1440 * (i + 1)));
        }
        assert!(report.reliability <= cfg.max_reliability);
        assert_eq!(report.reliability, cfg.max_reliability);
    }

    #[test]
    fn test_staleness_threshold() {
        let created = Utc::now();
        let report = report_at(created);
        let cfg = config();

        // 0.5^(age/1440) crosses 0.05 a little past 6223 minutes
        assert!(!is_stale(&report, &cfg, created + Duration::minutes(6000)));
        assert!(is_stale(&report, &cfg, created + Duration::minutes(7000)));
    }
}
