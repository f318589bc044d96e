//! Variable resolver for `${name}` placeholders in step actions.
//!
//! Only a string that is exactly one placeholder is substituted; there is no
//! partial interpolation. Lookup order:
//!
//! 1. `global_variables[name]`
//! 2. `step_results[step_id]` navigated by the rest of a dotted name
//!    (a missing path yields `null`, an unknown step id falls through)
//! 3. `caller_context[name]`
//!
//! Unresolved placeholders are left as literal text.

use serde_json::Value;

use super::context::{lookup_path, WorkflowContext};

/// Stateless resolver over a `WorkflowContext`.
pub struct VariableResolver;

impl VariableResolver {
    /// Resolve placeholders recursively through objects and arrays.
    pub fn resolve(value: &Value, context: &WorkflowContext) -> Value {
        match value {
            Value::String(s) => match placeholder_name(s) {
                Some(name) => Self::lookup(name, context).unwrap_or_else(|| {
                    tracing::warn!(
                        workflow_id = context.workflow_id.as_str(),
                        placeholder = s.as_str(),
                        "unresolved variable, leaving placeholder unchanged"
                    );
                    value.clone()
                }),
                None => value.clone(),
            },
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| Self::resolve(v, context)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::resolve(v, context)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Look a variable name up in the three scopes.
    pub fn lookup(name: &str, context: &WorkflowContext) -> Option<Value> {
        if let Some(value) = context.global_variables.get(name) {
            return Some(value.clone());
        }

        if let Some((step_id, path)) = name.split_once('.') {
            if let Some(result) = context.step_results.get(step_id) {
                return Some(lookup_path(result, path).cloned().unwrap_or(Value::Null));
            }
        }

        context.caller_context.get(name).cloned()
    }
}

/// Returns the name inside an exact `${name}` string.
fn placeholder_name(s: &str) -> Option<&str> {
    let name = s.strip_prefix("${")?.strip_suffix('}')?;
    if name.is_empty() || name.contains(['{', '}']) {
        return None;
    }
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn context() -> WorkflowContext {
        let mut ctx = WorkflowContext::new(
            "wf",
            Uuid::now_v7(),
            HashMap::from([
                ("user".to_string(), json!("ada")),
                ("fetch.rows".to_string(), json!("from caller")),
            ]),
        );
        ctx.global_variables.insert("count".to_string(), json!(3));
        ctx.global_variables.insert("user".to_string(), json!("global wins"));
        ctx.record_step_result("fetch", json!({"rows": [1, 2], "meta": {"page": 1}}));
        ctx
    }

    #[test]
    fn test_global_variables_take_precedence() {
        let ctx = context();
        assert_eq!(VariableResolver::resolve(&json!("${user}"), &ctx), json!("global wins"));
        assert_eq!(VariableResolver::resolve(&json!("${count}"), &ctx), json!(3));
    }

    #[test]
    fn test_step_result_paths() {
        let ctx = context();
        assert_eq!(VariableResolver::resolve(&json!("${fetch.rows}"), &ctx), json!([1, 2]));
        assert_eq!(VariableResolver::resolve(&json!("${fetch.meta.page}"), &ctx), json!(1));
        // Known step, missing path: null rather than falling through
        assert_eq!(VariableResolver::resolve(&json!("${fetch.nothing}"), &ctx), Value::Null);
    }

    #[test]
    fn test_unknown_step_falls_through_to_caller_context() {
        let mut ctx = context();
        ctx.caller_context.insert("other.key".to_string(), json!("caller"));
        assert_eq!(VariableResolver::resolve(&json!("${other.key}"), &ctx), json!("caller"));
    }

    #[test]
    fn test_unresolved_placeholder_is_literal() {
        let ctx = context();
        assert_eq!(
            VariableResolver::resolve(&json!("${missing.var}"), &ctx),
            json!("${missing.var}")
        );
        assert_eq!(VariableResolver::resolve(&json!("${nope}"), &ctx), json!("${nope}"));
    }

    #[test]
    fn test_no_partial_interpolation() {
        let ctx = context();
        for s in ["hello ${user}", "${user} world", "${user}${count}", "${}", "$user", "{user}"] {
            assert_eq!(VariableResolver::resolve(&json!(s), &ctx), json!(s));
        }
    }

    #[test]
    fn test_recursive_resolution() {
        let ctx = context();
        let action = json!({
            "type": "echo",
            "payload": {"who": "${user}", "items": ["${count}", "plain", 5, null]}
        });
        let resolved = VariableResolver::resolve(&action, &ctx);
        assert_eq!(
            resolved,
            json!({
                "type": "echo",
                "payload": {"who": "global wins", "items": [3, "plain", 5, null]}
            })
        );
    }

    #[test]
    fn test_payload_without_placeholders_is_unchanged() {
        let ctx = context();
        let payload = json!({
            "a": [1, 2.5, true, null, {"b": "text $ { } not a token"}],
            "nested": {"deep": {"deeper": ["x", "y"]}},
            "unicode": "héllo"
        });
        let resolved = VariableResolver::resolve(&payload, &ctx);
        assert_eq!(resolved, payload);
        assert_eq!(
            serde_json::to_string(&resolved).unwrap(),
            serde_json::to_string(&payload).unwrap()
        );
    }

    #[test]
    fn test_resolution_is_idempotent_once_resolved() {
        let ctx = context();
        let once = VariableResolver::resolve(&json!({"x": "${count}", "y": "${missing}"}), &ctx);
        let twice = VariableResolver::resolve(&once, &ctx);
        assert_eq!(once, twice);
    }
}
