//! Workflow execution context: global variables, step results, caller context.
//!
//! `WorkflowContext` is the shared state of one run. The coordinator owns it
//! and mutates it only on the control task, between step completions; step
//! tasks receive resolved actions built from a snapshot.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use stepweave_types::step::Step;
use uuid::Uuid;

use super::definition::WorkflowError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum size of a single stored step result (1 MB).
pub const MAX_STEP_RESULT_SIZE: usize = 1_048_576;

// ---------------------------------------------------------------------------
// WorkflowContext
// ---------------------------------------------------------------------------

/// Mutable state shared by the steps of a single run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    /// Values extracted from step results via `Step::variables`.
    pub global_variables: HashMap<String, Value>,
    /// Results of completed steps keyed by step id.
    pub step_results: HashMap<String, Value>,
    /// Values supplied by the caller at submission.
    pub caller_context: HashMap<String, Value>,
    pub workflow_id: String,
    pub run_id: Uuid,
}

impl WorkflowContext {
    pub fn new(
        workflow_id: impl Into<String>,
        run_id: Uuid,
        caller_context: HashMap<String, Value>,
    ) -> Self {
        Self {
            global_variables: HashMap::new(),
            step_results: HashMap::new(),
            caller_context,
            workflow_id: workflow_id.into(),
            run_id,
        }
    }

    /// Store the result of a completed step.
    ///
    /// Results larger than `MAX_STEP_RESULT_SIZE` once serialized are replaced
    /// by a truncation marker.
    pub fn record_step_result(&mut self, step_id: &str, result: Value) {
        let size = serde_json::to_vec(&result).map(|b| b.len()).unwrap_or(0);

        if size > MAX_STEP_RESULT_SIZE {
            tracing::warn!(
                step_id,
                size,
                max = MAX_STEP_RESULT_SIZE,
                "step result exceeds size limit, truncating"
            );
            let truncated = json!({
                "_truncated": true,
                "_original_size": size,
                "_message": format!(
                    "result exceeded {MAX_STEP_RESULT_SIZE} byte limit and was truncated"
                )
            });
            self.step_results.insert(step_id.to_string(), truncated);
        } else {
            self.step_results.insert(step_id.to_string(), result);
        }
    }

    /// Evaluate the step's variable extraction expressions against `result`
    /// and store them as global variables.
    pub fn extract_variables(&mut self, step: &Step, result: &Value) {
        for (name, expression) in &step.variables {
            let value = extract(expression, result);
            if value.is_null() {
                tracing::debug!(
                    step_id = step.id.as_str(),
                    variable = name.as_str(),
                    expression = expression.as_str(),
                    "variable extraction found no value"
                );
            }
            self.global_variables.insert(name.clone(), value);
        }
    }

    /// JSON view of the run used by decision criteria and expressions:
    /// `{workflow: {id, run_id}, variables, steps, context}`.
    pub fn to_state(&self) -> Value {
        json!({
            "workflow": { "id": self.workflow_id, "run_id": self.run_id.to_string() },
            "variables": self.global_variables,
            "steps": self.step_results,
            "context": self.caller_context,
        })
    }

    /// Serialize for checkpointing.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Restore from a checkpoint written by `to_json`.
    pub fn from_json(value: Value) -> Result<Self, WorkflowError> {
        serde_json::from_value(value).map_err(|e| WorkflowError::ParseError(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Evaluate a variable extraction expression against a step result.
///
/// `result` yields the whole result, `result.a.b` navigates into it, and any
/// other expression is read as a path into the result. Misses yield `null`.
pub fn extract(expression: &str, result: &Value) -> Value {
    let path = match expression.trim() {
        "result" => return result.clone(),
        expr => expr.strip_prefix("result.").unwrap_or(expr),
    };
    lookup_path(result, path).cloned().unwrap_or(Value::Null)
}

/// Navigate a dot path through objects (by key) and arrays (by index).
///
/// An empty path returns `value` itself.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> WorkflowContext {
        WorkflowContext::new(
            "etl",
            Uuid::now_v7(),
            HashMap::from([("region".to_string(), json!("eu"))]),
        )
    }

    #[test]
    fn test_record_step_result_stores_value() {
        let mut ctx = ctx();
        ctx.record_step_result("fetch", json!({"rows": 3}));
        assert_eq!(ctx.step_results["fetch"]["rows"], json!(3));
    }

    #[test]
    fn test_oversized_result_is_truncated() {
        let mut ctx = ctx();
        let big = "x".repeat(MAX_STEP_RESULT_SIZE + 10);
        ctx.record_step_result("big", json!(big));

        let stored = &ctx.step_results["big"];
        assert_eq!(stored["_truncated"], json!(true));
        assert!(stored["_original_size"].as_u64().unwrap() > MAX_STEP_RESULT_SIZE as u64);
    }

    #[test]
    fn test_extract_whole_result_and_paths() {
        let result = json!({"user": {"name": "ada", "tags": ["a", "b"]}});
        assert_eq!(extract("result", &result), result);
        assert_eq!(extract("result.user.name", &result), json!("ada"));
        assert_eq!(extract("result.user.tags.1", &result), json!("b"));
        // Bare path without the `result.` prefix
        assert_eq!(extract("user.name", &result), json!("ada"));
        assert_eq!(extract("result.user.missing", &result), Value::Null);
    }

    #[test]
    fn test_extract_variables_into_globals() {
        let mut ctx = ctx();
        let step = Step::new("fetch", json!({}))
            .with_variable("count", "result.rows")
            .with_variable("absent", "result.nope");
        ctx.extract_variables(&step, &json!({"rows": 7}));

        assert_eq!(ctx.global_variables["count"], json!(7));
        assert_eq!(ctx.global_variables["absent"], Value::Null);
    }

    #[test]
    fn test_state_view_shape() {
        let mut ctx = ctx();
        ctx.global_variables.insert("label".to_string(), json!("urgent"));
        ctx.record_step_result("triage", json!({"score": 9}));

        let state = ctx.to_state();
        assert_eq!(lookup_path(&state, "variables.label"), Some(&json!("urgent")));
        assert_eq!(lookup_path(&state, "steps.triage.score"), Some(&json!(9)));
        assert_eq!(lookup_path(&state, "context.region"), Some(&json!("eu")));
        assert_eq!(lookup_path(&state, "workflow.id"), Some(&json!("etl")));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut ctx = ctx();
        ctx.record_step_result("a", json!([1, 2]));
        ctx.global_variables.insert("v".to_string(), json!(true));

        let restored = WorkflowContext::from_json(ctx.to_json()).unwrap();
        assert_eq!(restored, ctx);

        let err = WorkflowContext::from_json(json!("not a context")).unwrap_err();
        assert!(matches!(err, WorkflowError::ParseError(_)));
    }

    #[test]
    fn test_lookup_path_edge_cases() {
        let value = json!({"a": {"b": null}, "list": [10]});
        assert_eq!(lookup_path(&value, ""), Some(&value));
        assert_eq!(lookup_path(&value, "a.b"), Some(&Value::Null));
        assert_eq!(lookup_path(&value, "list.0"), Some(&json!(10)));
        assert_eq!(lookup_path(&value, "list.x"), None);
        assert_eq!(lookup_path(&value, "a.b.c"), None);
    }
}
