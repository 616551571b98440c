use chrono::{Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{InsightsError, InsightsResult};

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;
pub const WEEK_MS: i64 = 7 * DAY_MS;

/// Maximum number of weeks tracked per cohort, and of cohorts per matrix.
pub const HORIZON_WEEKS: i64 = 10;

/// Truncate a millisecond timestamp to the start of its ISO week
/// (Monday 00:00 UTC). Timestamps outside chrono's range are returned as is.
pub fn trunc_week(timestamp_ms: i64) -> i64 {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .and_then(|dt| {
            let days_from_monday = dt.weekday().num_days_from_monday();
            dt.date_naive()
                .checked_sub_signed(Duration::days(days_from_monday as i64))
        })
        .map(|monday| monday.and_time(NaiveTime::MIN).and_utc().timestamp_millis())
        .unwrap_or(timestamp_ms)
}

// ─── Event Types ────────────────────────────────────────────────────────────

/// Kind of recorded event an insight is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Pages,
    Click,
    View,
    Event,
}

/// Where an event type's rows live in the event store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventSourceDescriptor {
    pub table: &'static str,
    /// Column holding the human-readable event label.
    pub label_column: &'static str,
    /// Column ordering events within a session.
    pub ordering_column: &'static str,
}

impl EventType {
    pub fn descriptor(self) -> EventSourceDescriptor {
        match self {
            EventType::Pages => EventSourceDescriptor {
                table: "events.pages",
                label_column: "base_path",
                ordering_column: "message_id",
            },
            EventType::Click => EventSourceDescriptor {
                table: "events.clicks",
                label_column: "label",
                ordering_column: "message_id",
            },
            EventType::View => EventSourceDescriptor {
                table: "events_ios.views",
                label_column: "name",
                ordering_column: "seq_index",
            },
            EventType::Event => EventSourceDescriptor {
                table: "events_common.customs",
                label_column: "name",
                ordering_column: "seq_index",
            },
        }
    }
}

// ─── Filters ────────────────────────────────────────────────────────────────

/// A request filter. Serialized as `{"type": "...", "value": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InsightFilter {
    /// Journeys only start counting at the first occurrence of this label.
    StartPoint(String),
    EventType(EventType),
    #[serde(alias = "USERID", alias = "USERID_IOS")]
    UserId(String),
    /// Feature label restricting feature acquisition.
    Feature(String),
}

// ─── Requests ───────────────────────────────────────────────────────────────

/// Half-open `[start_ms, end_ms)` interval in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeWindow {
    /// Week-aligned window covering the full cohort horizon from `start_ms`.
    pub fn cohort_horizon(start_ms: i64) -> Self {
        let start_ms = trunc_week(start_ms);
        Self {
            start_ms,
            end_ms: start_ms + HORIZON_WEEKS * WEEK_MS,
        }
    }
}

/// Parameters of one insights call. Timestamps left unset are derived
/// from `now_ms`, which is read from the clock when the request is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightsRequest {
    pub project_id: u64,
    #[serde(default)]
    pub start_ms: Option<i64>,
    #[serde(default)]
    pub end_ms: Option<i64>,
    #[serde(default = "now_ms")]
    pub now_ms: i64,
    #[serde(default)]
    pub filters: Vec<InsightFilter>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl InsightsRequest {
    pub fn new(project_id: u64) -> Self {
        Self {
            project_id,
            start_ms: None,
            end_ms: None,
            now_ms: now_ms(),
            filters: Vec::new(),
        }
    }

    pub fn with_range(mut self, start_ms: i64, end_ms: i64) -> Self {
        self.start_ms = Some(start_ms);
        self.end_ms = Some(end_ms);
        self
    }

    pub fn with_now(mut self, now_ms: i64) -> Self {
        self.now_ms = now_ms;
        self
    }

    pub fn with_filter(mut self, filter: InsightFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Resolve the requested window, looking back `lookback_days` from
    /// `now_ms` when no start was given.
    pub fn window(&self, lookback_days: i64) -> TimeWindow {
        let end_ms = self.end_ms.unwrap_or(self.now_ms);
        let start_ms = self
            .start_ms
            .unwrap_or(self.now_ms - Duration::days(lookback_days).num_milliseconds());
        TimeWindow { start_ms, end_ms }
    }

    /// Last event type filter wins.
    pub fn event_type(&self, default: EventType) -> EventType {
        self.filters
            .iter()
            .rev()
            .find_map(|f| match f {
                InsightFilter::EventType(t) => Some(*t),
                _ => None,
            })
            .unwrap_or(default)
    }

    pub fn start_point(&self) -> Option<&str> {
        self.last_value(|f| match f {
            InsightFilter::StartPoint(v) => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn user_id(&self) -> Option<&str> {
        self.last_value(|f| match f {
            InsightFilter::UserId(v) => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn feature(&self) -> Option<&str> {
        self.last_value(|f| match f {
            InsightFilter::Feature(v) => Some(v.as_str()),
            _ => None,
        })
    }

    /// Reject filters whose value is blank. They would otherwise reach the
    /// row source as an empty predicate.
    pub fn validate(&self) -> InsightsResult<()> {
        for filter in &self.filters {
            let (kind, value) = match filter {
                InsightFilter::StartPoint(v) => ("START_POINT", v),
                InsightFilter::UserId(v) => ("USER_ID", v),
                InsightFilter::Feature(v) => ("FEATURE", v),
                InsightFilter::EventType(_) => continue,
            };
            if value.trim().is_empty() {
                return Err(InsightsError::InvalidFilter(format!(
                    "{kind} filter requires a non-empty value"
                )));
            }
        }
        Ok(())
    }

    fn last_value<'a>(
        &'a self,
        pick: impl Fn(&'a InsightFilter) -> Option<&'a str>,
    ) -> Option<&'a str> {
        self.filters.iter().rev().find_map(pick)
    }
}
