//! Cohort analysis — weekly retention grids and acquisition matrices.
//!
//! Row sources only report weeks in which a cohort had active users. The
//! builders here turn those sparse rows into dense, chart-ready grids: one
//! bucket per week of the horizon, zero-filled where nothing was reported.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use insights_core::{HORIZON_WEEKS, WEEK_MS};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Activity of one cohort during one week of its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortWeekBucket {
    #[serde(alias = "firstConnexionWeek")]
    pub cohort_start_week: Option<i64>,
    pub week: u32,
    pub users_count: u64,
    #[serde(default)]
    pub connected_users: BTreeSet<String>,
    #[serde(default)]
    pub percentage: f64,
}

impl CohortWeekBucket {
    /// Zero-activity placeholder for a week with no reported users.
    pub fn neutral(cohort_start_week: i64, week: u32) -> Self {
        Self {
            cohort_start_week: Some(cohort_start_week),
            week,
            users_count: 0,
            connected_users: BTreeSet::new(),
            percentage: 0.0,
        }
    }
}

/// Number of weeks of a cohort starting at `start_week` that begin before
/// `end_week`, capped at the horizon.
pub fn horizon_weeks(start_week: i64, end_week: Option<i64>) -> u32 {
    (0..HORIZON_WEEKS)
        .take_while(|i| end_week.map_or(true, |end| start_week + i * WEEK_MS < end))
        .count() as u32
}

// ─── Percentages ────────────────────────────────────────────────────────────

/// Express every bucket of a single cohort as a fraction of its week-0 size.
///
/// A cohort without a week-0 bucket, or whose week 0 is empty, cannot be
/// normalized: its percentages are set to 0.
pub fn compute_weekly_percentage(buckets: &mut [CohortWeekBucket]) {
    if buckets.is_empty() {
        return;
    }

    let week_zero = buckets
        .iter()
        .find(|b| b.week == 0)
        .map(|b| b.users_count)
        .filter(|&count| count > 0);

    match week_zero {
        Some(total) => {
            for bucket in buckets.iter_mut() {
                bucket.percentage = bucket.users_count as f64 / total as f64;
            }
        }
        None => {
            warn!(
                cohort = ?buckets[0].cohort_start_week,
                buckets = buckets.len(),
                "Cohort has no week-0 users, percentages set to 0"
            );
            for bucket in buckets.iter_mut() {
                bucket.percentage = 0.0;
            }
        }
    }
}

/// Apply [`compute_weekly_percentage`] to each run of consecutive buckets
/// sharing a `cohort_start_week`.
pub fn compute_cohort_percentages(buckets: &mut [CohortWeekBucket]) {
    let mut start = 0;
    while start < buckets.len() {
        let cohort = buckets[start].cohort_start_week;
        let len = buckets[start..]
            .iter()
            .take_while(|b| b.cohort_start_week == cohort)
            .count();
        compute_weekly_percentage(&mut buckets[start..start + len]);
        start += len;
    }
}

// ─── Retention Grid ─────────────────────────────────────────────────────────

/// Densify a single cohort's weekly series.
///
/// The result holds exactly one bucket per week `0..horizon_weeks(start_week,
/// end_week)`, in order. Reported buckets are kept as-is; missing weeks get a
/// neutral bucket. Buckets past the horizon or repeating a week are dropped.
pub fn complete_retention(
    rows: Vec<CohortWeekBucket>,
    start_week: i64,
    end_week: Option<i64>,
) -> Vec<CohortWeekBucket> {
    if rows.is_empty() {
        return rows;
    }

    let weeks = horizon_weeks(start_week, end_week);
    let received = rows.len();
    let mut by_week: BTreeMap<u32, CohortWeekBucket> = BTreeMap::new();
    for bucket in rows {
        if bucket.week >= weeks {
            continue;
        }
        if let Entry::Vacant(slot) = by_week.entry(bucket.week) {
            slot.insert(bucket);
        }
    }

    let kept = by_week.len();
    if kept < received {
        debug!(dropped = received - kept, "Discarded retention rows outside the grid");
    }

    let grid: Vec<CohortWeekBucket> = (0..weeks)
        .map(|week| {
            by_week
                .remove(&week)
                .unwrap_or_else(|| CohortWeekBucket::neutral(start_week, week))
        })
        .collect();

    record_neutral(grid.len() - kept);
    grid
}

// ─── Acquisition Matrix ─────────────────────────────────────────────────────

/// Densify a flattened multi-cohort series.
///
/// Cohorts start at `start_week` and every following week, up to the
/// horizon, stopping at the first one that starts at or after `end_week`.
/// Each cohort gets its own retention grid (see [`complete_retention`]);
/// cohorts missing from `rows` become all-neutral grids. The output is
/// grouped by ascending cohort, then ascending week.
pub fn complete_acquisition(
    rows: Vec<CohortWeekBucket>,
    start_week: i64,
    end_week: Option<i64>,
) -> Vec<CohortWeekBucket> {
    if rows.is_empty() {
        return rows;
    }

    let received = rows.len();
    let mut cells: BTreeMap<(i64, u32), CohortWeekBucket> = BTreeMap::new();
    let mut unassigned = 0usize;
    for bucket in rows {
        let Some(cohort) = bucket.cohort_start_week else {
            unassigned += 1;
            continue;
        };
        if let Entry::Vacant(slot) = cells.entry((cohort, bucket.week)) {
            slot.insert(bucket);
        }
    }

    let mut matrix = Vec::new();
    let mut kept = 0usize;
    for k in 0..HORIZON_WEEKS {
        let cohort = start_week + k * WEEK_MS;
        if end_week.is_some_and(|end| cohort >= end) {
            break;
        }
        for week in 0..horizon_weeks(cohort, end_week) {
            match cells.remove(&(cohort, week)) {
                Some(bucket) => {
                    kept += 1;
                    matrix.push(bucket);
                }
                None => matrix.push(CohortWeekBucket::neutral(cohort, week)),
            }
        }
    }

    if kept < received {
        debug!(
            dropped = received - kept,
            without_cohort = unassigned,
            "Discarded acquisition rows outside the matrix"
        );
    }

    record_neutral(matrix.len() - kept);
    matrix
}

fn record_neutral(count: usize) {
    if count > 0 {
        metrics::counter!("insights.cohort.neutral_buckets").increment(count as u64);
    }
}
