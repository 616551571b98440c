//! User journeys — the most common event-to-event transitions within
//! sessions, shaped as a node/link graph for Sankey-style charts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One aggregated transition between two consecutive session events.
///
/// Raw event keys look like `"<rank>_<label>"`, where rank is the event's
/// position in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTransitionRow {
    /// `None` for the first event of a session.
    pub source_event: Option<String>,
    pub target_event: String,
    #[serde(rename = "value", alias = "weight")]
    pub weight: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneyEdge {
    pub source: usize,
    pub target: usize,
    pub value: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneyGraph {
    pub nodes: Vec<String>,
    pub links: Vec<JourneyEdge>,
}

/// Strip the rank prefix of a raw event key, keeping the separator:
/// `"3_/checkout"` becomes `"_/checkout"`. Keys without a separator are
/// returned unchanged.
pub fn node_label(raw_event: &str) -> &str {
    raw_event.find('_').map_or(raw_event, |idx| &raw_event[idx..])
}

/// Accumulates transitions into a graph. Node indices follow first-seen
/// order and never change once assigned.
#[derive(Debug, Default)]
pub struct JourneyGraphBuilder {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    links: Vec<JourneyEdge>,
}

impl JourneyGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from transitions already ordered by weight.
    pub fn from_rows<'a, I>(rows: I) -> JourneyGraph
    where
        I: IntoIterator<Item = &'a EventTransitionRow>,
    {
        let mut builder = Self::new();
        for row in rows {
            builder.push(row);
        }
        builder.build()
    }

    /// Add a transition. Returns `false` when the row has no source event
    /// and was skipped.
    pub fn push(&mut self, row: &EventTransitionRow) -> bool {
        let Some(source_event) = row.source_event.as_deref() else {
            return false;
        };
        let source = self.intern(node_label(source_event));
        let target = self.intern(node_label(&row.target_event));
        self.links.push(JourneyEdge {
            source,
            target,
            value: row.weight,
        });
        true
    }

    fn intern(&mut self, label: &str) -> usize {
        if let Some(&idx) = self.index.get(label) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(label.to_string());
        self.index.insert(label.to_string(), idx);
        idx
    }

    /// Finish the graph. Links are ordered by descending value; ties keep
    /// insertion order.
    pub fn build(mut self) -> JourneyGraph {
        self.links.sort_by(|a, b| b.value.cmp(&a.value));
        JourneyGraph {
            nodes: self.nodes,
            links: self.links,
        }
    }
}
