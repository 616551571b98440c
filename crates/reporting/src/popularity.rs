//! Feature adoption — how many users touched each feature (popularity) and
//! how much of all feature usage each one accounts for (frequency).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A feature label with an aggregated count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureCountRow {
    pub value: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePopularity {
    pub value: String,
    /// Share of all identified users who used the feature.
    pub popularity: f64,
    /// Share of all feature usages attributable to the feature.
    pub frequency: f64,
}

/// Join distinct-user counts with usage counts.
///
/// Keeps the `limit` features with the most distinct users. A feature
/// absent from `usage_counts` gets a frequency of 0. Returns nothing when
/// the project has no identified users.
pub fn build_feature_popularity(
    all_user_count: u64,
    mut user_counts: Vec<FeatureCountRow>,
    usage_counts: &[FeatureCountRow],
    limit: usize,
) -> Vec<FeaturePopularity> {
    if all_user_count == 0 {
        return Vec::new();
    }

    let mut usage: HashMap<&str, u64> = HashMap::with_capacity(usage_counts.len());
    for row in usage_counts {
        *usage.entry(row.value.as_str()).or_default() += row.count;
    }
    let total_usage: u64 = usage_counts.iter().map(|r| r.count).sum();

    user_counts.sort_by(|a, b| b.count.cmp(&a.count));
    user_counts.truncate(limit);

    user_counts
        .into_iter()
        .map(|row| {
            let used = usage.get(row.value.as_str()).copied().unwrap_or(0);
            let frequency = if total_usage > 0 {
                used as f64 / total_usage as f64
            } else {
                0.0
            };
            FeaturePopularity {
                popularity: row.count as f64 / all_user_count as f64,
                frequency,
                value: row.value,
            }
        })
        .collect()
}
