//! Path status aggregation.
//!
//! Active reports vote for the condition they claim, weighted by their
//! effective weight. The winning condition is blended with the path's
//! baseline on the ordinal scale and rounded back to an enum value;
//! every ambiguity resolves toward the more severe condition, on the
//! grounds that warning a rider too much beats warning too little.

use crate::{PathStatus, StatusConfig};

/// Weighted vote over conditions. Highest total weight wins, ties go to
/// the more severe condition. `None` when there are no votes.
///
/// # Example
/// ```
/// use path_network::status::weighted_vote;
/// use path_network::PathStatus;
///
/// let winner = weighted_vote([
///     (PathStatus::Optimal, 0.4),
///     (PathStatus::Closed, 0.3),
///     (PathStatus::Closed, 0.3),
/// ]);
/// // 0.6 for closed beats 0.4 for optimal
/// assert_eq!(winner, Some(PathStatus::Closed));
/// ```
pub fn weighted_vote<I>(votes: I) -> Option<PathStatus>
where
    I: IntoIterator<Item = (PathStatus, f64)>,
{
    let mut totals = [0.0_f64; PathStatus::ALL.len()];
    let mut any = false;
    for (status, weight) in votes {
        totals[status.ordinal() as usize] += weight;
        any = true;
    }
    if !any {
        return None;
    }

    let mut best = PathStatus::Optimal;
    let mut best_weight = f64::NEG_INFINITY;
    for status in PathStatus::ALL {
        let weight = totals[status.ordinal() as usize];
        // >= so that an exact tie lands on the later, more severe value
        if weight >= best_weight {
            best = status;
            best_weight = weight;
        }
    }
    Some(best)
}

/// Mix the reported condition with the baseline on the ordinal scale.
///
/// With no reported condition the baseline passes through untouched.
/// Otherwise the result is `reported_weight * reported + baseline_weight
/// * baseline`, rounded to the nearest condition with midpoints rounding
/// up (toward severe).
pub fn blend(reported: Option<PathStatus>, baseline: PathStatus, config: &StatusConfig) -> PathStatus {
    let Some(reported) = reported else {
        return baseline;
    };

    let mixed = config.reported_weight * f64::from(reported.ordinal())
        + config.baseline_weight * f64::from(baseline.ordinal());
    let last = (PathStatus::ALL.len() - 1) as f64;
    let ordinal = mixed.round().clamp(0.0, last) as u8;
    PathStatus::from_ordinal(ordinal).unwrap_or(baseline)
}

/// Quality score in `[0, 100]` for ranking search results.
///
/// Starts at 100 and loses `status_penalty` points per severity step of
/// the published condition, plus a capped penalty proportional to the
/// total effective weight of active reports on the path.
pub fn quality_score(published: PathStatus, active_report_weight: f64, config: &StatusConfig) -> f64 {
    let status_penalty = config.status_penalty * f64::from(published.ordinal());
    let report_penalty =
        (config.report_penalty_scale * active_report_weight).min(config.report_penalty_cap);
    (100.0 - status_penalty - report_penalty).clamp(0.0, 100.0)
}
