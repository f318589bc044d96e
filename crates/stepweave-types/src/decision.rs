//! Decision routing types: criteria sources, outcomes, and audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the sentinel destination that ends a graph walk.
pub const END_NODE: &str = "__end__";

/// Result of asking one criteria source for a destination key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// The source produced a key. It still has to exist in the destination map.
    Matched(String),
    /// The source had no opinion.
    Unmatched,
}

impl DecisionOutcome {
    pub fn matched(key: impl Into<String>) -> Self {
        Self::Matched(key.into())
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Matched(k) => Some(k.as_str()),
            Self::Unmatched => None,
        }
    }
}

impl From<Option<String>> for DecisionOutcome {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(k) => Self::Matched(k),
            None => Self::Unmatched,
        }
    }
}

/// Where a decision node looks for its routing key. Sources are tried in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CriteriaSource {
    /// A criteria function registered on the router by name.
    Function(String),
    /// A dot path into the workflow state (`variables.x`, `steps.id.field`, ...).
    StatePath(String),
    /// A JEXL expression evaluated against the workflow state.
    Expression(String),
    /// An external query registered on the router by name.
    Cognitive(String),
}

impl CriteriaSource {
    pub fn function(name: impl Into<String>) -> Self {
        Self::Function(name.into())
    }

    pub fn path(path: impl Into<String>) -> Self {
        Self::StatePath(path.into())
    }

    pub fn expression(expr: impl Into<String>) -> Self {
        Self::Expression(expr.into())
    }

    pub fn cognitive(name: impl Into<String>) -> Self {
        Self::Cognitive(name.into())
    }

    /// Short label used in decision records, e.g. `path:steps.triage.label`.
    pub fn label(&self) -> String {
        match self {
            Self::Function(n) => format!("function:{n}"),
            Self::StatePath(p) => format!("path:{p}"),
            Self::Expression(e) => format!("expression:{e}"),
            Self::Cognitive(n) => format!("cognitive:{n}"),
        }
    }
}

/// Immutable audit record produced by every decision evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: Uuid,
    pub workflow_id: String,
    /// Decision node that produced the record.
    pub source_node: String,
    pub timestamp: DateTime<Utc>,
    /// Keys of the destination map, in evaluation order.
    pub considered_options: Vec<String>,
    /// The winning key, or the fallback destination when no source matched.
    pub selected_option: String,
    /// Node the workflow moves to.
    pub destination: String,
    /// Raw value produced by the winning source, or `"fallback"`.
    pub criterion_value: String,
    /// Label of the winning source, absent when the fallback was used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub used_fallback: bool,
    /// Workflow state at evaluation time.
    pub context_snapshot: serde_json::Value,
}
