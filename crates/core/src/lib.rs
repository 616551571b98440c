//! Shared building blocks for session-replay insights — configuration,
//! errors, event-type descriptors, request filters, and week arithmetic.

pub mod config;
pub mod error;
pub mod types;

pub use crate::config::{AppConfig, InsightsConfig};
pub use crate::error::{InsightsError, InsightsResult};
pub use crate::types::{
    trunc_week, EventSourceDescriptor, EventType, InsightFilter, InsightsRequest, TimeWindow,
    DAY_MS, HORIZON_WEEKS, WEEK_MS,
};
