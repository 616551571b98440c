//! Session replay insights — user journeys, weekly retention and
//! acquisition cohorts, and feature popularity.

pub mod cohort;
pub mod engine;
pub mod journey;
pub mod popularity;
pub mod source;

pub use cohort::{
    complete_acquisition, complete_retention, compute_cohort_percentages,
    compute_weekly_percentage, CohortWeekBucket,
};
pub use engine::InsightsEngine;
pub use journey::{EventTransitionRow, JourneyEdge, JourneyGraph, JourneyGraphBuilder};
pub use popularity::{build_feature_popularity, FeatureCountRow, FeaturePopularity};
pub use source::{
    AcquisitionRow, CohortQuery, FeatureQuery, JourneyQuery, MemoryRowSource, RetentionRow,
    RowSource, SourceCall,
};
