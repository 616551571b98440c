//! Row source boundary — the queries the insights engine issues and the row
//! shapes it expects back. Query execution lives outside this crate.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::Context;
use insights_core::{EventSourceDescriptor, EventType, InsightsResult, TimeWindow};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cohort::CohortWeekBucket;
use crate::journey::EventTransitionRow;
use crate::popularity::FeatureCountRow;

// ─── Queries ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JourneyQuery {
    pub project_id: u64,
    pub window: TimeWindow,
    pub event_type: EventType,
    pub source: EventSourceDescriptor,
    /// Events before the first occurrence of this label are ignored.
    pub start_point: Option<String>,
    pub user_id: Option<String>,
    /// Maximum rank of an event within its session.
    pub depth: u32,
    /// Number of transitions to return, heaviest first.
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortQuery {
    pub project_id: u64,
    /// Week-aligned window; `start_ms` is the first cohort's week.
    pub window: TimeWindow,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureQuery {
    pub project_id: u64,
    pub window: TimeWindow,
    pub event_type: EventType,
    pub source: EventSourceDescriptor,
    pub user_id: Option<String>,
    /// Feature label, when the query is restricted to one feature.
    pub feature: Option<String>,
}

// ─── Rows ───────────────────────────────────────────────────────────────────

/// Active users of the requested cohort during one week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionRow {
    pub week: u32,
    #[serde(alias = "users_count")]
    pub users_count: u64,
    #[serde(default, alias = "connected_users")]
    pub connected_users: BTreeSet<String>,
}

impl RetentionRow {
    pub fn into_bucket(self, cohort_start_week: i64) -> CohortWeekBucket {
        CohortWeekBucket {
            cohort_start_week: Some(cohort_start_week),
            week: self.week,
            users_count: self.users_count,
            connected_users: self.connected_users,
            percentage: 0.0,
        }
    }
}

/// Active users of one first-touch cohort during one week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionRow {
    #[serde(alias = "first_connexion_week")]
    pub first_connexion_week: i64,
    pub week: u32,
    #[serde(alias = "users_count")]
    pub users_count: u64,
    #[serde(default, alias = "connected_users")]
    pub connected_users: BTreeSet<String>,
}

impl From<AcquisitionRow> for CohortWeekBucket {
    fn from(row: AcquisitionRow) -> Self {
        CohortWeekBucket {
            cohort_start_week: Some(row.first_connexion_week),
            week: row.week,
            users_count: row.users_count,
            connected_users: row.connected_users,
            percentage: 0.0,
        }
    }
}

// ─── Source Trait ───────────────────────────────────────────────────────────

/// Executes the analytical queries behind each insight.
///
/// Implementations honor the ordering contracts documented on each method;
/// the builders rely on them.
pub trait RowSource: Send + Sync {
    /// Transitions ordered by descending weight, at most `query.limit`.
    fn journey_transitions(&self, query: &JourneyQuery) -> InsightsResult<Vec<EventTransitionRow>>;

    /// Weekly activity of users first seen in the window's first week,
    /// ascending by week.
    fn retention_rows(&self, query: &CohortQuery) -> InsightsResult<Vec<RetentionRow>>;

    /// Weekly activity per first-touch cohort, ascending by cohort then week.
    fn acquisition_rows(&self, query: &CohortQuery) -> InsightsResult<Vec<AcquisitionRow>>;

    /// Feature label used by the most users, ignoring labels of two
    /// characters or fewer.
    fn most_used_feature(&self, query: &FeatureQuery) -> InsightsResult<Option<String>>;

    /// Like [`RowSource::acquisition_rows`], restricted to users of
    /// `query.feature`.
    fn feature_acquisition_rows(&self, query: &FeatureQuery)
        -> InsightsResult<Vec<AcquisitionRow>>;

    /// Identified users active in the window.
    fn distinct_user_count(&self, query: &FeatureQuery) -> InsightsResult<u64>;

    /// Distinct users per feature label, descending.
    fn feature_user_counts(&self, query: &FeatureQuery) -> InsightsResult<Vec<FeatureCountRow>>;

    /// Sessions per feature label.
    fn feature_usage_counts(&self, query: &FeatureQuery) -> InsightsResult<Vec<FeatureCountRow>>;
}

// ─── In-Memory Source ───────────────────────────────────────────────────────

/// A query recorded by [`MemoryRowSource`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "query")]
pub enum SourceCall {
    JourneyTransitions(JourneyQuery),
    RetentionRows(CohortQuery),
    AcquisitionRows(CohortQuery),
    MostUsedFeature(FeatureQuery),
    FeatureAcquisitionRows(FeatureQuery),
    DistinctUserCount(FeatureQuery),
    FeatureUserCounts(FeatureQuery),
    FeatureUsageCounts(FeatureQuery),
}

/// Fixture-backed row source. Returns the same rows for every query and
/// records each call for inspection.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MemoryRowSource {
    pub journey: Vec<EventTransitionRow>,
    pub retention: Vec<RetentionRow>,
    pub acquisition: Vec<AcquisitionRow>,
    /// Feature acquisition rows keyed by feature label.
    pub feature_acquisition: HashMap<String, Vec<AcquisitionRow>>,
    pub most_used_feature: Option<String>,
    pub distinct_users: u64,
    pub feature_users: Vec<FeatureCountRow>,
    pub feature_usage: Vec<FeatureCountRow>,
    #[serde(skip)]
    calls: Mutex<Vec<SourceCall>>,
}

impl MemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load fixtures from a JSON document whose keys match the field names.
    pub fn from_json(json: &str) -> InsightsResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load fixtures from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> InsightsResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn calls(&self) -> Vec<SourceCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: SourceCall) {
        self.calls.lock().push(call);
    }
}

impl RowSource for MemoryRowSource {
    fn journey_transitions(&self, query: &JourneyQuery) -> InsightsResult<Vec<EventTransitionRow>> {
        self.record(SourceCall::JourneyTransitions(query.clone()));
        Ok(self
            .journey
            .iter()
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    fn retention_rows(&self, query: &CohortQuery) -> InsightsResult<Vec<RetentionRow>> {
        self.record(SourceCall::RetentionRows(query.clone()));
        Ok(self.retention.clone())
    }

    fn acquisition_rows(&self, query: &CohortQuery) -> InsightsResult<Vec<AcquisitionRow>> {
        self.record(SourceCall::AcquisitionRows(query.clone()));
        Ok(self.acquisition.clone())
    }

    fn most_used_feature(&self, query: &FeatureQuery) -> InsightsResult<Option<String>> {
        self.record(SourceCall::MostUsedFeature(query.clone()));
        Ok(self
            .most_used_feature
            .clone()
            .filter(|feature| feature.chars().count() > 2))
    }

    fn feature_acquisition_rows(
        &self,
        query: &FeatureQuery,
    ) -> InsightsResult<Vec<AcquisitionRow>> {
        self.record(SourceCall::FeatureAcquisitionRows(query.clone()));
        Ok(query
            .feature
            .as_ref()
            .and_then(|feature| self.feature_acquisition.get(feature))
            .cloned()
            .unwrap_or_default())
    }

    fn distinct_user_count(&self, query: &FeatureQuery) -> InsightsResult<u64> {
        self.record(SourceCall::DistinctUserCount(query.clone()));
        Ok(self.distinct_users)
    }

    fn feature_user_counts(&self, query: &FeatureQuery) -> InsightsResult<Vec<FeatureCountRow>> {
        self.record(SourceCall::FeatureUserCounts(query.clone()));
        Ok(self.feature_users.clone())
    }

    fn feature_usage_counts(&self, query: &FeatureQuery) -> InsightsResult<Vec<FeatureCountRow>> {
        self.record(SourceCall::FeatureUsageCounts(query.clone()));
        Ok(self.feature_usage.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insights_core::InsightsError;

    #[test]
    fn test_from_json_fixture() {
        let source = MemoryRowSource::from_json(
            r#"{
                "retention": [{"week": 0, "users_count": 3, "connected_users": ["a", "b", "c"]}],
                "acquisition": [{"firstConnexionWeek": 1710115200000, "week": 0, "usersCount": 1}],
                "distinct_users": 12
            }"#,
        )
        .unwrap();
        assert_eq!(source.retention[0].users_count, 3);
        assert_eq!(source.acquisition[0].first_connexion_week, 1_710_115_200_000);
        assert!(source.acquisition[0].connected_users.is_empty());
        assert_eq!(source.distinct_users, 12);
        assert!(source.journey.is_empty());
        assert!(source.calls().is_empty());
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        assert!(MemoryRowSource::from_json("{\"retention\": 4}").is_err());
    }

    #[test]
    fn test_from_path_loads_file() {
        let path = std::env::temp_dir()
            .join(format!("insights-fixture-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"most_used_feature": "Checkout", "distinct_users": 4}"#).unwrap();
        let source = MemoryRowSource::from_path(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(source.most_used_feature.as_deref(), Some("Checkout"));
        assert_eq!(source.distinct_users, 4);
    }

    #[test]
    fn test_from_path_missing_file_names_the_path() {
        let path = std::env::temp_dir().join("insights-fixture-does-not-exist.json");
        match MemoryRowSource::from_path(&path) {
            Err(InsightsError::Internal(err)) => {
                assert!(err.to_string().contains("insights-fixture-does-not-exist.json"));
            }
            other => panic!("expected internal error, got {other:?}"),
        }
    }

    #[test]
    fn test_journey_respects_limit_and_records_call() {
        let source = MemoryRowSource {
            journey: (0..30)
                .map(|i| EventTransitionRow {
                    source_event: Some(format!("1_{i}")),
                    target_event: format!("2_{i}"),
                    weight: 30 - i,
                })
                .collect(),
            ..Default::default()
        };
        let query = JourneyQuery {
            project_id: 1,
            window: TimeWindow { start_ms: 0, end_ms: 1 },
            event_type: EventType::Pages,
            source: EventType::Pages.descriptor(),
            start_point: None,
            user_id: None,
            depth: 5,
            limit: 20,
        };
        assert_eq!(source.journey_transitions(&query).unwrap().len(), 20);
        assert_eq!(source.calls(), vec![SourceCall::JourneyTransitions(query)]);
    }

    #[test]
    fn test_most_used_feature_ignores_short_labels() {
        let query = FeatureQuery {
            project_id: 1,
            window: TimeWindow { start_ms: 0, end_ms: 1 },
            event_type: EventType::Click,
            source: EventType::Click.descriptor(),
            user_id: None,
            feature: None,
        };
        let short = MemoryRowSource {
            most_used_feature: Some("ok".into()),
            ..Default::default()
        };
        assert_eq!(short.most_used_feature(&query).unwrap(), None);

        let long = MemoryRowSource {
            most_used_feature: Some("Buy now".into()),
            ..Default::default()
        };
        assert_eq!(long.most_used_feature(&query).unwrap().as_deref(), Some("Buy now"));
    }

    #[test]
    fn test_row_conversions() {
        let retention = RetentionRow {
            week: 2,
            users_count: 1,
            connected_users: ["x".to_string()].into_iter().collect(),
        };
        let bucket = retention.into_bucket(42);
        assert_eq!(bucket.cohort_start_week, Some(42));
        assert_eq!(bucket.week, 2);

        let acquisition = AcquisitionRow {
            first_connexion_week: 7,
            week: 1,
            users_count: 0,
            connected_users: BTreeSet::new(),
        };
        let bucket: CohortWeekBucket = acquisition.into();
        assert_eq!(bucket.cohort_start_week, Some(7));
    }
}
