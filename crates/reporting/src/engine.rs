//! Insights engine — resolves a request into row-source queries and turns
//! the returned rows into journey graphs, cohort grids, and feature tables.

use std::sync::Arc;

use insights_core::{
    AppConfig, EventType, InsightsConfig, InsightsRequest, InsightsResult, TimeWindow,
};
use tracing::info;

use crate::cohort::{
    complete_acquisition, complete_retention, compute_cohort_percentages,
    compute_weekly_percentage, CohortWeekBucket,
};
use crate::journey::{JourneyGraph, JourneyGraphBuilder};
use crate::popularity::{build_feature_popularity, FeaturePopularity};
use crate::source::{CohortQuery, FeatureQuery, JourneyQuery, RowSource};

pub struct InsightsEngine {
    source: Arc<dyn RowSource>,
    config: InsightsConfig,
}

impl InsightsEngine {
    pub fn new(source: Arc<dyn RowSource>, config: InsightsConfig) -> Self {
        Self { source, config }
    }

    /// Create an engine configured from `REPLAY_INSIGHTS__*` environment
    /// variables.
    pub fn from_env(source: Arc<dyn RowSource>) -> InsightsResult<Self> {
        let config = AppConfig::load()?;
        Ok(Self::new(source, config.insights))
    }

    pub fn config(&self) -> &InsightsConfig {
        &self.config
    }

    /// Most common event-to-event transitions within sessions.
    pub fn journey(&self, request: &InsightsRequest) -> InsightsResult<JourneyGraph> {
        metrics::counter!("insights.journey.requests").increment(1);
        request.validate()?;

        let event_type = request.event_type(EventType::Pages);
        let query = JourneyQuery {
            project_id: request.project_id,
            window: request.window(self.config.journey_lookback_days),
            event_type,
            source: event_type.descriptor(),
            start_point: request.start_point().map(str::to_string),
            user_id: request.user_id().map(str::to_string),
            depth: self.config.journey_depth,
            limit: self.config.journey_limit,
        };

        let rows = self.source.journey_transitions(&query)?;
        let graph = JourneyGraphBuilder::from_rows(&rows);

        info!(
            project_id = request.project_id,
            ?event_type,
            transitions = rows.len(),
            nodes = graph.nodes.len(),
            "Journey computed"
        );
        Ok(graph)
    }

    /// Weekly retention of users first seen in the request's start week.
    pub fn users_retention(
        &self,
        request: &InsightsRequest,
    ) -> InsightsResult<Vec<CohortWeekBucket>> {
        metrics::counter!("insights.retention.requests").increment(1);
        request.validate()?;

        let window = self.cohort_window(request);
        let query = CohortQuery {
            project_id: request.project_id,
            window,
            user_id: request.user_id().map(str::to_string),
        };

        let rows = self.source.retention_rows(&query)?;
        let received = rows.len();
        let mut buckets: Vec<CohortWeekBucket> = rows
            .into_iter()
            .map(|row| row.into_bucket(window.start_ms))
            .collect();
        compute_weekly_percentage(&mut buckets);
        let grid = complete_retention(buckets, window.start_ms, Some(request.now_ms));

        info!(
            project_id = request.project_id,
            start_week = window.start_ms,
            rows = received,
            weeks = grid.len(),
            "Retention computed"
        );
        Ok(grid)
    }

    /// Weekly retention of every first-touch cohort in the horizon.
    pub fn users_acquisition(
        &self,
        request: &InsightsRequest,
    ) -> InsightsResult<Vec<CohortWeekBucket>> {
        metrics::counter!("insights.acquisition.requests").increment(1);
        request.validate()?;

        let window = self.cohort_window(request);
        let query = CohortQuery {
            project_id: request.project_id,
            window,
            user_id: request.user_id().map(str::to_string),
        };

        let rows = self.source.acquisition_rows(&query)?;
        let received = rows.len();
        let matrix = self.acquisition_matrix(rows, window, request.now_ms);

        info!(
            project_id = request.project_id,
            start_week = window.start_ms,
            rows = received,
            buckets = matrix.len(),
            "Acquisition computed"
        );
        Ok(matrix)
    }

    /// Acquisition restricted to users of one feature. Without a feature
    /// filter, the feature used by the most users is picked.
    pub fn feature_acquisition(
        &self,
        request: &InsightsRequest,
    ) -> InsightsResult<Vec<CohortWeekBucket>> {
        metrics::counter!("insights.feature_acquisition.requests").increment(1);
        request.validate()?;

        let window = self.cohort_window(request);
        let event_type = request.event_type(EventType::Pages);
        let mut query = FeatureQuery {
            project_id: request.project_id,
            window,
            event_type,
            source: event_type.descriptor(),
            user_id: request.user_id().map(str::to_string),
            feature: request.feature().map(str::to_string),
        };

        if query.feature.is_none() {
            let feature = self
                .source
                .most_used_feature(&query)?
                .unwrap_or_else(|| self.config.default_feature.clone());
            query.feature = Some(feature);
        }

        let rows = self.source.feature_acquisition_rows(&query)?;
        let received = rows.len();
        let matrix = self.acquisition_matrix(rows, window, request.now_ms);

        info!(
            project_id = request.project_id,
            ?event_type,
            feature = query.feature.as_deref().unwrap_or_default(),
            rows = received,
            buckets = matrix.len(),
            "Feature acquisition computed"
        );
        Ok(matrix)
    }

    /// Share of users and of usages captured by the most popular features.
    pub fn feature_popularity_frequency(
        &self,
        request: &InsightsRequest,
    ) -> InsightsResult<Vec<FeaturePopularity>> {
        metrics::counter!("insights.feature_popularity.requests").increment(1);
        request.validate()?;

        let event_type = request.event_type(EventType::Click);
        let query = FeatureQuery {
            project_id: request.project_id,
            window: self.cohort_window(request),
            event_type,
            source: event_type.descriptor(),
            user_id: request.user_id().map(str::to_string),
            feature: None,
        };

        let all_user_count = self.source.distinct_user_count(&query)?;
        if all_user_count == 0 {
            info!(
                project_id = request.project_id,
                "No identified users, skipping feature popularity"
            );
            return Ok(Vec::new());
        }

        let user_counts = self.source.feature_user_counts(&query)?;
        let usage_counts = self.source.feature_usage_counts(&query)?;
        let features = build_feature_popularity(
            all_user_count,
            user_counts,
            &usage_counts,
            self.config.popularity_limit,
        );

        info!(
            project_id = request.project_id,
            ?event_type,
            users = all_user_count,
            features = features.len(),
            "Feature popularity computed"
        );
        Ok(features)
    }

    fn cohort_window(&self, request: &InsightsRequest) -> TimeWindow {
        TimeWindow::cohort_horizon(request.window(self.config.cohort_lookback_days).start_ms)
    }

    fn acquisition_matrix<R>(
        &self,
        rows: Vec<R>,
        window: TimeWindow,
        now_ms: i64,
    ) -> Vec<CohortWeekBucket>
    where
        R: Into<CohortWeekBucket>,
    {
        let mut buckets: Vec<CohortWeekBucket> = rows.into_iter().map(Into::into).collect();
        compute_cohort_percentages(&mut buckets);
        complete_acquisition(buckets, window.start_ms, Some(now_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemoryRowSource, SourceCall};
    use insights_core::{trunc_week, InsightFilter, InsightsError, WEEK_MS};

    const NOW: i64 = 1_712_000_000_000;

    fn engine(source: &Arc<MemoryRowSource>) -> InsightsEngine {
        InsightsEngine::new(source.clone(), InsightsConfig::default())
    }

    #[test]
    fn test_journey_query_defaults() {
        let source = Arc::new(MemoryRowSource::new());
        let request = InsightsRequest::new(3).with_now(NOW);
        let graph = engine(&source).journey(&request).unwrap();
        assert!(graph.nodes.is_empty());

        let calls = source.calls();
        let SourceCall::JourneyTransitions(query) = &calls[0] else {
            panic!("unexpected call {:?}", calls[0]);
        };
        assert_eq!(query.project_id, 3);
        assert_eq!(query.event_type, EventType::Pages);
        assert_eq!(query.source.table, "events.pages");
        assert_eq!(query.window.end_ms, NOW);
        assert_eq!(query.window.start_ms, NOW - 24 * 60 * 60 * 1000);
        assert_eq!(query.depth, 5);
        assert_eq!(query.limit, 20);
    }

    #[test]
    fn test_journey_filters_resolve_once() {
        let source = Arc::new(MemoryRowSource::new());
        let request = InsightsRequest::new(3)
            .with_now(NOW)
            .with_filter(InsightFilter::EventType(EventType::View))
            .with_filter(InsightFilter::StartPoint("Login".into()))
            .with_filter(InsightFilter::UserId("u-9".into()));
        engine(&source).journey(&request).unwrap();

        let SourceCall::JourneyTransitions(query) = &source.calls()[0] else {
            panic!("expected journey call");
        };
        assert_eq!(query.source, EventType::View.descriptor());
        assert_eq!(query.start_point.as_deref(), Some("Login"));
        assert_eq!(query.user_id.as_deref(), Some("u-9"));
    }

    #[test]
    fn test_blank_filter_is_rejected_before_querying() {
        let source = Arc::new(MemoryRowSource::new());
        let request = InsightsRequest::new(1)
            .with_now(NOW)
            .with_filter(InsightFilter::Feature(String::new()));
        let err = engine(&source).feature_acquisition(&request).unwrap_err();
        assert!(matches!(err, InsightsError::InvalidFilter(_)));
        assert!(source.calls().is_empty());

        let request = InsightsRequest::new(1)
            .with_now(NOW)
            .with_filter(InsightFilter::StartPoint(" ".into()));
        assert!(engine(&source).journey(&request).is_err());
        assert!(source.calls().is_empty());
    }

    #[test]
    fn test_cohort_window_is_week_aligned_horizon() {
        let source = Arc::new(MemoryRowSource::new());
        let start = NOW - 30 * 24 * 60 * 60 * 1000;
        let request = InsightsRequest::new(1).with_now(NOW).with_range(start, NOW);
        let grid = engine(&source).users_retention(&request).unwrap();
        assert!(grid.is_empty());

        let SourceCall::RetentionRows(query) = &source.calls()[0] else {
            panic!("expected retention call");
        };
        assert_eq!(query.window.start_ms, trunc_week(start));
        assert_eq!(query.window.end_ms, trunc_week(start) + 10 * WEEK_MS);
    }

    #[test]
    fn test_feature_acquisition_uses_filter_without_lookup() {
        let source = Arc::new(MemoryRowSource::new());
        let request = InsightsRequest::new(1)
            .with_now(NOW)
            .with_filter(InsightFilter::Feature("Buy".into()));
        engine(&source).feature_acquisition(&request).unwrap();

        let calls = source.calls();
        assert_eq!(calls.len(), 1);
        let SourceCall::FeatureAcquisitionRows(query) = &calls[0] else {
            panic!("expected feature acquisition call");
        };
        assert_eq!(query.feature.as_deref(), Some("Buy"));
        assert_eq!(query.event_type, EventType::Pages);
    }

    #[test]
    fn test_feature_acquisition_falls_back_to_default_feature() {
        let source = Arc::new(MemoryRowSource::new());
        let request = InsightsRequest::new(1).with_now(NOW);
        engine(&source).feature_acquisition(&request).unwrap();

        let calls = source.calls();
        assert!(matches!(calls[0], SourceCall::MostUsedFeature(_)));
        let SourceCall::FeatureAcquisitionRows(query) = &calls[1] else {
            panic!("expected feature acquisition call");
        };
        assert_eq!(query.feature.as_deref(), Some("/"));
    }

    #[test]
    fn test_feature_popularity_short_circuits_without_users() {
        let source = Arc::new(MemoryRowSource::new());
        let request = InsightsRequest::new(1).with_now(NOW);
        let result = engine(&source).feature_popularity_frequency(&request).unwrap();
        assert!(result.is_empty());

        let calls = source.calls();
        assert_eq!(calls.len(), 1);
        let SourceCall::DistinctUserCount(query) = &calls[0] else {
            panic!("expected distinct user count call");
        };
        assert_eq!(query.event_type, EventType::Click);
    }
}
