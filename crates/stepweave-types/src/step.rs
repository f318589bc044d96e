//! Step definitions and per-step runtime state.
//!
//! A `Step` is the immutable unit of work submitted by a caller. The
//! orchestrator pairs every step with a `StepExecutionContext` that tracks its
//! progress for exactly one workflow run.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of retries for a non-critical step.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single step in a workflow submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Caller-defined id. Unique within one plan.
    pub id: String,
    /// Opaque command payload handed to the command executor after variable
    /// resolution. Conventionally carries a `"type"` field naming the handler.
    #[serde(default)]
    pub action: serde_json::Value,
    /// Ids of steps that must complete before this one is dispatched.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// A failing critical step fails the whole workflow and is never retried.
    #[serde(default)]
    pub critical: bool,
    /// Variables to extract from this step's result into the workflow's
    /// global variables, as `name -> "result.<field.path>"`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, String>,
    /// Retries allowed after the first attempt (non-critical steps only).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Free-form description for humans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Per-attempt timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Step {
    /// Create a non-critical step with no dependencies.
    pub fn new(id: impl Into<String>, action: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            action,
            depends_on: Vec::new(),
            critical: false,
            variables: HashMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            description: None,
            timeout_secs: None,
        }
    }

    /// Builder-style: add dependencies.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Builder-style: mark the step critical.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Builder-style: set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builder-style: declare a variable extraction.
    pub fn with_variable(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.variables.insert(name.into(), expression.into());
        self
    }

    /// Builder-style: set a per-attempt timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Runtime status of a step within one run.
///
/// `NotAttempted` is only assigned when a run finishes, to steps that were
/// still pending (blocked by a failed prerequisite, a cycle, a critical
/// failure, or cancellation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    NotAttempted,
}

impl StepStatus {
    /// Whether the step has reached a final state for this run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::NotAttempted)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::NotAttempted => "not_attempted",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of an execution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Initialized,
    Executing,
    Success,
    CompletedWithWarnings,
    Failed,
    Cancelled,
}

impl PlanStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Initialized | Self::Executing)
    }
}

// ---------------------------------------------------------------------------
// StepExecutionContext
// ---------------------------------------------------------------------------

/// Mutable per-step run state, owned by the plan for a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionContext {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Retries performed (0 when the first attempt settled the step).
    pub retry_count: u32,
    /// Total executor invocations, including the first.
    pub attempts: u32,
    /// Backoff sleeps taken between attempts, in milliseconds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backoffs_ms: Vec<u64>,
    /// 1-based wave the step was dispatched in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave: Option<u32>,
}

impl Default for StepExecutionContext {
    fn default() -> Self {
        Self {
            status: StepStatus::Pending,
            result: None,
            error: None,
            start_time: None,
            end_time: None,
            retry_count: 0,
            attempts: 0,
            backoffs_ms: Vec::new(),
            wave: None,
        }
    }
}

impl StepExecutionContext {
    /// Wall-clock duration between start and end, when both are known.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}
