//! JEXL expression evaluator for decision criteria.
//!
//! Wraps `jexl_eval::Evaluator` with a few string transforms. Expressions are
//! evaluated against the workflow state view (`variables`, `steps`,
//! `context`, `workflow`); state is always passed as context and never
//! interpolated into expression strings.

use serde_json::{json, Value};

use super::context::WorkflowContext;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// WorkflowEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator with standard transforms pre-registered.
///
/// Used by expression criteria sources, e.g.
/// `(steps.triage.score > 7) ? 'urgent' : 'normal'` or `variables.kind|lower`.
pub struct WorkflowEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl WorkflowEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("string", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(match val {
                    Value::String(s) => json!(s),
                    Value::Null => json!(""),
                    other => json!(other.to_string()),
                })
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate an expression and return the raw JSON value.
    ///
    /// The `context` must be a JSON object.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }

    /// Evaluate an expression against a run's state view.
    pub fn evaluate_in_workflow_context(
        &self,
        expression: &str,
        workflow_context: &WorkflowContext,
    ) -> Result<Value, ExpressionError> {
        self.evaluate_value(expression, &workflow_context.to_state())
    }
}

impl Default for WorkflowEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    #[test]
    fn test_ternary_yields_string() {
        let eval = WorkflowEvaluator::new();
        let ctx = json!({"steps": {"triage": {"score": 9}}});
        let value = eval
            .evaluate_value("(steps.triage.score > 7) ? 'urgent' : 'normal'", &ctx)
            .unwrap();
        assert_eq!(value, json!("urgent"));
    }

    #[test]
    fn test_transforms() {
        let eval = WorkflowEvaluator::new();
        let ctx = json!({"variables": {"kind": "  Bug "}});
        assert_eq!(
            eval.evaluate_value("variables.kind|trim|lower", &ctx).unwrap(),
            json!("bug")
        );
        assert_eq!(eval.evaluate_value("variables.kind|length", &ctx).unwrap(), json!(6.0));
    }

    #[test]
    fn test_non_object_context_rejected() {
        let eval = WorkflowEvaluator::new();
        let err = eval.evaluate_value("1 + 1", &json!([1])).unwrap_err();
        assert!(matches!(err, ExpressionError::InvalidContext(_)));
    }

    #[test]
    fn test_syntax_error() {
        let eval = WorkflowEvaluator::new();
        let err = eval.evaluate_value("1 +", &json!({})).unwrap_err();
        assert!(matches!(err, ExpressionError::EvalFailed(_)));
    }

    #[test]
    fn test_evaluate_against_workflow_context() {
        let eval = WorkflowEvaluator::new();
        let mut ctx = WorkflowContext::new("wf", Uuid::now_v7(), HashMap::new());
        ctx.global_variables.insert("tier".to_string(), json!("gold"));
        let value = eval
            .evaluate_in_workflow_context("variables.tier|upper", &ctx)
            .unwrap();
        assert_eq!(value, json!("GOLD"));
    }
}
