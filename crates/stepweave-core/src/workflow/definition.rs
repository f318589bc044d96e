//! Workflow definition parsing and filesystem loading.
//!
//! Two document shapes are accepted, each as YAML or JSON:
//! - `WorkflowSubmission`: a flat step list with `depends_on` edges, run by
//!   `Coordinator::execute_workflow`.
//! - `GraphDefinition`: task and decision nodes joined by `next` edges and
//!   decision destinations, run by `Coordinator::execute_graph`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepweave_types::decision::CriteriaSource;
use stepweave_types::step::Step;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while parsing or validating workflow definitions.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Dependency graph contains a cycle.
    #[error("cycle detected among steps: {}", steps.join(", "))]
    CycleDetected { steps: Vec<String> },

    /// A step references an unknown dependency.
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    /// Two steps or nodes share an id.
    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),

    /// A graph edge or the entry point names a node that does not exist.
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    /// A decision destination is not a node of the graph.
    #[error("decision node '{node}' routes to unknown node '{destination}'")]
    InvalidDestination { node: String, destination: String },

    /// A decision fallback is not one of the node's destinations.
    #[error("decision node '{node}' has fallback '{fallback}' outside its destinations")]
    InvalidFallback { node: String, fallback: String },

    /// A decision source names a criteria function or cognitive handler that
    /// was never registered.
    #[error("decision node '{node}' uses unregistered criteria '{name}'")]
    UnknownCriteria { node: String, name: String },
}

// ---------------------------------------------------------------------------
// Step-list submissions
// ---------------------------------------------------------------------------

/// A flat workflow submission: steps with dependencies plus caller context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSubmission {
    pub workflow_id: String,
    pub steps: Vec<Step>,
    /// Caller-supplied values, consulted last by the variable resolver.
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

/// Parse a YAML or JSON submission.
///
/// Steps that omit `max_retries` receive `default_max_retries`.
pub fn parse_submission(text: &str, default_max_retries: u32) -> Result<WorkflowSubmission, WorkflowError> {
    let mut raw = parse_document(text)?;

    if let Some(steps) = raw.get_mut("steps").and_then(Value::as_array_mut) {
        for step in steps.iter_mut().filter_map(Value::as_object_mut) {
            step.entry("max_retries")
                .or_insert_with(|| Value::from(default_max_retries));
        }
    }

    let submission: WorkflowSubmission =
        serde_json::from_value(raw).map_err(|e| WorkflowError::ParseError(e.to_string()))?;

    if submission.workflow_id.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow_id must not be empty".to_string(),
        ));
    }

    Ok(submission)
}

/// Read and parse a submission file.
pub fn load_submission_file(path: &Path, default_max_retries: u32) -> Result<WorkflowSubmission, WorkflowError> {
    let text = std::fs::read_to_string(path)?;
    parse_submission(&text, default_max_retries)
}

// ---------------------------------------------------------------------------
// Graph definitions
// ---------------------------------------------------------------------------

/// A node graph workflow: task nodes, decision nodes, and an entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub workflow_id: String,
    /// Node the walk starts at.
    pub entry: String,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    pub nodes: Vec<NodeDefinition>,
}

/// One node of a `GraphDefinition`, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeDefinition {
    /// Runs a command, then follows `next` (or ends the walk when absent).
    Task {
        id: String,
        #[serde(default)]
        action: Value,
        /// Not allowed on graph nodes; parsed so the builder can reject it.
        #[serde(default)]
        depends_on: Vec<String>,
        #[serde(default)]
        critical: bool,
        #[serde(default)]
        variables: HashMap<String, String>,
        #[serde(default)]
        max_retries: Option<u32>,
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        next: Option<String>,
    },
    /// Routes to one of `destinations` based on runtime state.
    Decision {
        id: String,
        sources: Vec<CriteriaSource>,
        /// Routing key -> destination node id.
        destinations: BTreeMap<String, String>,
        fallback: String,
    },
}

impl NodeDefinition {
    pub fn id(&self) -> &str {
        match self {
            NodeDefinition::Task { id, .. } | NodeDefinition::Decision { id, .. } => id,
        }
    }

    /// Build the `Step` a task node runs. Returns `None` for decision nodes.
    pub fn to_step(&self, default_max_retries: u32) -> Option<Step> {
        match self {
            NodeDefinition::Task {
                id,
                action,
                depends_on,
                critical,
                variables,
                max_retries,
                timeout_secs,
                description,
                ..
            } => Some(Step {
                id: id.clone(),
                action: action.clone(),
                depends_on: depends_on.clone(),
                critical: *critical,
                variables: variables.clone(),
                max_retries: max_retries.unwrap_or(default_max_retries),
                description: description.clone(),
                timeout_secs: *timeout_secs,
            }),
            NodeDefinition::Decision { .. } => None,
        }
    }
}

/// Parse a YAML or JSON graph definition.
pub fn parse_graph(text: &str) -> Result<GraphDefinition, WorkflowError> {
    let raw = parse_document(text)?;
    let def: GraphDefinition =
        serde_json::from_value(raw).map_err(|e| WorkflowError::ParseError(e.to_string()))?;

    if def.nodes.is_empty() {
        return Err(WorkflowError::ValidationError(
            "graph must contain at least one node".to_string(),
        ));
    }

    Ok(def)
}

/// Read and parse a graph definition file.
pub fn load_graph_file(path: &Path) -> Result<GraphDefinition, WorkflowError> {
    let text = std::fs::read_to_string(path)?;
    parse_graph(&text)
}

/// JSON documents go through `serde_json` directly; everything else is YAML.
fn parse_document(text: &str) -> Result<Value, WorkflowError> {
    if text.trim_start().starts_with('{') {
        serde_json::from_str(text).map_err(|e| WorkflowError::ParseError(e.to_string()))
    } else {
        serde_yaml_ng::from_str(text).map_err(|e| WorkflowError::ParseError(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SUBMISSION_YAML: &str = r#"
workflow_id: nightly-report
context:
  region: eu-west
steps:
  - id: fetch
    action:
      type: echo
      payload: { rows: 3 }
    variables:
      row_count: result.rows
  - id: publish
    action:
      type: echo
      payload: "${row_count}"
    depends_on: [fetch]
    critical: true
    max_retries: 0
"#;

    #[test]
    fn test_parse_yaml_submission() {
        let sub = parse_submission(SUBMISSION_YAML, 3).unwrap();
        assert_eq!(sub.workflow_id, "nightly-report");
        assert_eq!(sub.steps.len(), 2);
        assert_eq!(sub.steps[1].depends_on, vec!["fetch"]);
        assert!(sub.steps[1].critical);
        assert_eq!(sub.context["region"], Value::from("eu-west"));
    }

    #[test]
    fn test_default_max_retries_applied_only_when_omitted() {
        let sub = parse_submission(SUBMISSION_YAML, 5).unwrap();
        assert_eq!(sub.steps[0].max_retries, 5);
        assert_eq!(sub.steps[1].max_retries, 0);
    }

    #[test]
    fn test_parse_json_submission() {
        let json = r#"{
            "workflow_id": "wf",
            "steps": [{"id": "a", "action": {"type": "echo"}}]
        }"#;
        let sub = parse_submission(json, 3).unwrap();
        assert_eq!(sub.steps[0].id, "a");
        assert!(sub.context.is_empty());
    }

    #[test]
    fn test_empty_workflow_id_rejected() {
        let err = parse_submission("workflow_id: ''\nsteps: []\n", 3).unwrap_err();
        assert!(matches!(err, WorkflowError::ValidationError(_)));
    }

    #[test]
    fn test_malformed_document_is_parse_error() {
        let err = parse_submission("workflow_id: [unclosed", 3).unwrap_err();
        assert!(matches!(err, WorkflowError::ParseError(_)));
    }

    #[test]
    fn test_load_submission_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SUBMISSION_YAML.as_bytes()).unwrap();
        let sub = load_submission_file(file.path(), 3).unwrap();
        assert_eq!(sub.steps.len(), 2);

        let missing = load_submission_file(Path::new("/nonexistent/wf.yaml"), 3).unwrap_err();
        assert!(matches!(missing, WorkflowError::IoError(_)));
    }

    #[test]
    fn test_parse_graph_definition() {
        let yaml = r#"
workflow_id: triage
entry: classify
nodes:
  - id: classify
    kind: task
    action: { type: echo, payload: { label: urgent } }
    variables:
      label: result.label
    next: route
  - id: route
    kind: decision
    sources:
      - type: state_path
        value: variables.label
    destinations:
      urgent: page
      normal: ticket
    fallback: ticket
  - id: page
    kind: task
    action: { type: echo }
  - id: ticket
    kind: task
    action: { type: echo }
"#;
        let def = parse_graph(yaml).unwrap();
        assert_eq!(def.entry, "classify");
        assert_eq!(def.nodes.len(), 4);
        match &def.nodes[1] {
            NodeDefinition::Decision { sources, destinations, fallback, .. } => {
                assert_eq!(sources[0], CriteriaSource::path("variables.label"));
                assert_eq!(destinations["urgent"], "page");
                assert_eq!(fallback, "ticket");
            }
            other => panic!("expected decision node, got {other:?}"),
        }

        let step = def.nodes[0].to_step(2).unwrap();
        assert_eq!(step.id, "classify");
        assert_eq!(step.max_retries, 2);
        assert!(def.nodes[1].to_step(2).is_none());
    }

    #[test]
    fn test_graph_without_nodes_rejected() {
        let err = parse_graph("workflow_id: g\nentry: a\nnodes: []\n").unwrap_err();
        assert!(matches!(err, WorkflowError::ValidationError(_)));
    }

    #[test]
    fn test_error_messages_name_steps() {
        let err = WorkflowError::CycleDetected {
            steps: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "cycle detected among steps: a, b");

        let err = WorkflowError::UnknownDependency {
            step: "b".to_string(),
            dependency: "zzz".to_string(),
        };
        assert!(err.to_string().contains("zzz"));
    }
}
