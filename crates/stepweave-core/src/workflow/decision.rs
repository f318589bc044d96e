//! Decision router: picks the next graph node from runtime state.
//!
//! A decision node tries its criteria sources in order. The first source whose
//! value is a key of the node's destination map wins; a source producing any
//! other value is skipped. When no source matches, the node's fallback
//! destination is used. Every evaluation yields exactly one `DecisionRecord`,
//! appended to the execution history and published on the event bus before
//! the destination is returned.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use stepweave_types::decision::{CriteriaSource, DecisionOutcome, DecisionRecord, END_NODE};
use stepweave_types::event::WorkflowEvent;
use uuid::Uuid;

use crate::event::EventBus;

use super::command::BoxFuture;
use super::context::lookup_path;
use super::definition::WorkflowError;
use super::expression::WorkflowEvaluator;
use super::history::ExecutionHistory;

/// Criteria function over the workflow state view.
pub type CriteriaFn = Arc<dyn Fn(&Value) -> DecisionOutcome + Send + Sync>;

// ---------------------------------------------------------------------------
// Cognitive criteria
// ---------------------------------------------------------------------------

/// An asynchronous external query (a model, a rules service, a human queue)
/// that proposes a routing key.
pub trait CognitiveCriteria: Send + Sync {
    fn evaluate(&self, state: &Value) -> impl Future<Output = DecisionOutcome> + Send;
}

/// Object-safe version of [`CognitiveCriteria`].
pub trait CognitiveCriteriaDyn: Send + Sync {
    fn evaluate_boxed<'a>(&'a self, state: &'a Value) -> BoxFuture<'a, DecisionOutcome>;
}

impl<T: CognitiveCriteria> CognitiveCriteriaDyn for T {
    fn evaluate_boxed<'a>(&'a self, state: &'a Value) -> BoxFuture<'a, DecisionOutcome> {
        Box::pin(self.evaluate(state))
    }
}

// ---------------------------------------------------------------------------
// DecisionNode
// ---------------------------------------------------------------------------

/// A routing node of a workflow graph.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionNode {
    pub name: String,
    pub sources: Vec<CriteriaSource>,
    /// Routing key -> destination node id.
    pub destinations: BTreeMap<String, String>,
    /// Destination used when no source yields a key. One of the map's values.
    pub fallback: String,
}

// ---------------------------------------------------------------------------
// DecisionRouter
// ---------------------------------------------------------------------------

/// Evaluates decision nodes and keeps the audit trail.
pub struct DecisionRouter {
    criteria: DashMap<String, CriteriaFn>,
    cognitive: DashMap<String, Arc<dyn CognitiveCriteriaDyn>>,
    evaluator: WorkflowEvaluator,
    history: Arc<ExecutionHistory>,
    event_bus: EventBus,
}

impl DecisionRouter {
    pub fn new(history: Arc<ExecutionHistory>, event_bus: EventBus) -> Self {
        Self {
            criteria: DashMap::new(),
            cognitive: DashMap::new(),
            evaluator: WorkflowEvaluator::new(),
            history,
            event_bus,
        }
    }

    /// Register a named criteria function.
    pub fn register_criteria<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&Value) -> DecisionOutcome + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(criteria = name.as_str(), "registered criteria function");
        self.criteria.insert(name, Arc::new(f));
    }

    /// Register a named cognitive criteria handler.
    pub fn register_cognitive<C: CognitiveCriteria + 'static>(&self, name: impl Into<String>, handler: C) {
        let name = name.into();
        tracing::debug!(criteria = name.as_str(), "registered cognitive criteria");
        self.cognitive.insert(name, Arc::new(handler));
    }

    pub fn has_criteria(&self, name: &str) -> bool {
        self.criteria.contains_key(name)
    }

    pub fn has_cognitive(&self, name: &str) -> bool {
        self.cognitive.contains_key(name)
    }

    pub fn history(&self) -> &Arc<ExecutionHistory> {
        &self.history
    }

    /// Check a decision node against the graph it belongs to.
    ///
    /// Every destination must be a known node or the end sentinel, the
    /// fallback must be one of the destinations, and every function or
    /// cognitive source must already be registered.
    pub fn validate_node(&self, node: &DecisionNode, known_nodes: &HashSet<String>) -> Result<(), WorkflowError> {
        for destination in node.destinations.values() {
            if destination != END_NODE && !known_nodes.contains(destination) {
                return Err(WorkflowError::InvalidDestination {
                    node: node.name.clone(),
                    destination: destination.clone(),
                });
            }
        }

        if !node.destinations.values().any(|d| *d == node.fallback) {
            return Err(WorkflowError::InvalidFallback {
                node: node.name.clone(),
                fallback: node.fallback.clone(),
            });
        }

        for source in &node.sources {
            let missing = match source {
                CriteriaSource::Function(name) if !self.has_criteria(name) => Some(name),
                CriteriaSource::Cognitive(name) if !self.has_cognitive(name) => Some(name),
                _ => None,
            };
            if let Some(name) = missing {
                return Err(WorkflowError::UnknownCriteria {
                    node: node.name.clone(),
                    name: name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Evaluate a decision and return the selected destination with its record.
    pub async fn evaluate_decision(
        &self,
        workflow_id: &str,
        node_name: &str,
        sources: &[CriteriaSource],
        destinations: &BTreeMap<String, String>,
        fallback: &str,
        state: &Value,
    ) -> (String, DecisionRecord) {
        let mut winner: Option<(String, &CriteriaSource)> = None;

        for source in sources {
            let outcome = self.evaluate_source(source, state).await;
            match outcome {
                DecisionOutcome::Matched(key) if destinations.contains_key(&key) => {
                    winner = Some((key, source));
                    break;
                }
                DecisionOutcome::Matched(key) => {
                    tracing::debug!(
                        node = node_name,
                        source = %source.label(),
                        key = key.as_str(),
                        "criteria value is not a destination key, trying next source"
                    );
                }
                DecisionOutcome::Unmatched => {}
            }
        }

        let (selected_option, destination, criterion_value, source, used_fallback) = match winner {
            Some((key, source)) => {
                let destination = destinations[&key].clone();
                (key.clone(), destination, key, Some(source.label()), false)
            }
            None => (
                fallback.to_string(),
                fallback.to_string(),
                "fallback".to_string(),
                None,
                true,
            ),
        };

        let record = DecisionRecord {
            decision_id: Uuid::now_v7(),
            workflow_id: workflow_id.to_string(),
            source_node: node_name.to_string(),
            timestamp: Utc::now(),
            considered_options: destinations.keys().cloned().collect(),
            selected_option,
            destination: destination.clone(),
            criterion_value,
            source,
            used_fallback,
            context_snapshot: state.clone(),
        };

        self.history.record_decision(record.clone());
        self.event_bus.publish(WorkflowEvent::DecisionMade {
            decision_id: record.decision_id,
            workflow_id: record.workflow_id.clone(),
            node: record.source_node.clone(),
            destination: destination.clone(),
            used_fallback,
        });

        tracing::info!(
            workflow_id,
            node = node_name,
            destination = destination.as_str(),
            used_fallback,
            "decision made"
        );

        (destination, record)
    }

    /// Evaluate a `DecisionNode`.
    pub async fn evaluate_node(
        &self,
        workflow_id: &str,
        node: &DecisionNode,
        state: &Value,
    ) -> (String, DecisionRecord) {
        self.evaluate_decision(
            workflow_id,
            &node.name,
            &node.sources,
            &node.destinations,
            &node.fallback,
            state,
        )
        .await
    }

    async fn evaluate_source(&self, source: &CriteriaSource, state: &Value) -> DecisionOutcome {
        match source {
            CriteriaSource::Function(name) => {
                let f = self.criteria.get(name).map(|entry| Arc::clone(entry.value()));
                match f {
                    Some(f) => f(state),
                    None => {
                        tracing::warn!(criteria = name.as_str(), "criteria function not registered");
                        DecisionOutcome::Unmatched
                    }
                }
            }
            CriteriaSource::StatePath(path) => string_outcome(lookup_path(state, path)),
            CriteriaSource::Expression(expr) => match self.evaluator.evaluate_value(expr, state) {
                Ok(value) => string_outcome(Some(&value)),
                Err(e) => {
                    tracing::warn!(expression = expr.as_str(), error = %e, "criteria expression failed");
                    DecisionOutcome::Unmatched
                }
            },
            CriteriaSource::Cognitive(name) => {
                let handler = self.cognitive.get(name).map(|entry| Arc::clone(entry.value()));
                match handler {
                    Some(handler) => handler.evaluate_boxed(state).await,
                    None => {
                        tracing::warn!(criteria = name.as_str(), "cognitive criteria not registered");
                        DecisionOutcome::Unmatched
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for DecisionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionRouter")
            .field("criteria", &self.criteria.len())
            .field("cognitive", &self.cognitive.len())
            .finish()
    }
}

/// Only JSON strings become routing keys.
fn string_outcome(value: Option<&Value>) -> DecisionOutcome {
    match value {
        Some(Value::String(s)) => DecisionOutcome::matched(s.as_str()),
        _ => DecisionOutcome::Unmatched,
    }
}

// ---------------------------------------------------------------------------
// DecisionInstance
// ---------------------------------------------------------------------------

/// Evaluation state of one decision node invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionState {
    NotEvaluated,
    Evaluated { destination: String, decision_id: Uuid },
}

/// A single-shot invocation of a decision node.
///
/// The first `resolve` evaluates the node and records a decision; later calls
/// return the recorded destination without evaluating again.
#[derive(Debug, Clone)]
pub struct DecisionInstance {
    node: DecisionNode,
    state: DecisionState,
}

impl DecisionInstance {
    pub fn new(node: DecisionNode) -> Self {
        Self {
            node,
            state: DecisionState::NotEvaluated,
        }
    }

    pub fn state(&self) -> &DecisionState {
        &self.state
    }

    /// Returns the destination, and the record when this call evaluated.
    pub async fn resolve(
        &mut self,
        router: &DecisionRouter,
        workflow_id: &str,
        state: &Value,
    ) -> (String, Option<DecisionRecord>) {
        if let DecisionState::Evaluated { destination, .. } = &self.state {
            return (destination.clone(), None);
        }

        let (destination, record) = router.evaluate_node(workflow_id, &self.node, state).await;
        self.state = DecisionState::Evaluated {
            destination: destination.clone(),
            decision_id: record.decision_id,
        };
        (destination, Some(record))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn router() -> DecisionRouter {
        DecisionRouter::new(Arc::new(ExecutionHistory::new(100)), EventBus::new(16))
    }

    fn destinations() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("y".to_string(), "node_y".to_string()),
            ("z".to_string(), "node_z".to_string()),
        ])
    }

    struct FixedCognitive(&'static str);

    impl CognitiveCriteria for FixedCognitive {
        async fn evaluate(&self, _state: &Value) -> DecisionOutcome {
            DecisionOutcome::matched(self.0)
        }
    }

    #[tokio::test]
    async fn test_first_valid_source_wins_over_invalid_key() {
        let router = router();
        router.register_criteria("funcA", |_| DecisionOutcome::matched("x"));
        let state = json!({"variables": {"route": "y"}});

        let (destination, record) = router
            .evaluate_decision(
                "wf",
                "route",
                &[CriteriaSource::function("funcA"), CriteriaSource::path("variables.route")],
                &destinations(),
                "node_z",
                &state,
            )
            .await;

        assert_eq!(destination, "node_y");
        assert_eq!(record.selected_option, "y");
        assert_eq!(record.criterion_value, "y");
        assert_eq!(record.source.as_deref(), Some("path:variables.route"));
        assert!(!record.used_fallback);
        assert_eq!(record.considered_options, vec!["y", "z"]);
        assert_eq!(router.history().decisions(Some("wf")).len(), 1);
    }

    #[tokio::test]
    async fn test_mismatch_everywhere_falls_back() {
        let router = router();
        router.register_criteria("bogus", |_| DecisionOutcome::matched("not-a-key"));

        let (destination, record) = router
            .evaluate_decision(
                "wf",
                "route",
                &[CriteriaSource::function("bogus")],
                &destinations(),
                "node_z",
                &json!({}),
            )
            .await;

        assert_eq!(destination, "node_z");
        assert!(record.used_fallback);
        assert_eq!(record.selected_option, "node_z");
        assert_eq!(record.criterion_value, "fallback");
        assert!(record.source.is_none());
    }

    #[tokio::test]
    async fn test_non_string_state_values_do_not_match() {
        let router = router();
        let dest = BTreeMap::from([
            ("true".to_string(), "yes".to_string()),
            ("1".to_string(), "one".to_string()),
        ]);
        let state = json!({"flag": true, "n": 1});

        let (destination, record) = router
            .evaluate_decision(
                "wf",
                "route",
                &[CriteriaSource::path("flag"), CriteriaSource::path("n")],
                &dest,
                "one",
                &state,
            )
            .await;

        assert_eq!(destination, "one");
        assert!(record.used_fallback);
    }

    #[tokio::test]
    async fn test_expression_source() {
        let router = router();
        let state = json!({"steps": {"triage": {"score": 2}}});
        let (destination, record) = router
            .evaluate_decision(
                "wf",
                "route",
                &[CriteriaSource::expression("(steps.triage.score > 5) ? 'y' : 'z'")],
                &destinations(),
                "node_y",
                &state,
            )
            .await;

        assert_eq!(destination, "node_z");
        assert_eq!(record.criterion_value, "z");
    }

    #[tokio::test]
    async fn test_cognitive_source() {
        let router = router();
        router.register_cognitive("oracle", FixedCognitive("z"));
        let (destination, record) = router
            .evaluate_decision(
                "wf",
                "route",
                &[CriteriaSource::cognitive("oracle")],
                &destinations(),
                "node_y",
                &json!({}),
            )
            .await;

        assert_eq!(destination, "node_z");
        assert_eq!(record.source.as_deref(), Some("cognitive:oracle"));
    }

    #[tokio::test]
    async fn test_unregistered_function_is_skipped() {
        let router = router();
        let (destination, _) = router
            .evaluate_decision(
                "wf",
                "route",
                &[CriteriaSource::function("ghost"), CriteriaSource::path("k")],
                &destinations(),
                "node_y",
                &json!({"k": "z"}),
            )
            .await;
        assert_eq!(destination, "node_z");
    }

    #[tokio::test]
    async fn test_decision_event_published() {
        let router = router();
        let mut rx = router.event_bus.subscribe();
        let (_, record) = router
            .evaluate_decision("wf", "route", &[], &destinations(), "node_y", &json!({}))
            .await;

        match rx.try_recv().unwrap() {
            WorkflowEvent::DecisionMade { decision_id, destination, used_fallback, .. } => {
                assert_eq!(decision_id, record.decision_id);
                assert_eq!(destination, "node_y");
                assert!(used_fallback);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_every_evaluation_records_exactly_one_decision() {
        let router = router();
        router.register_criteria("parity", |state| {
            match state.get("n").and_then(Value::as_u64) {
                Some(n) if n % 3 == 0 => DecisionOutcome::matched("y"),
                Some(n) if n % 3 == 1 => DecisionOutcome::matched("bogus"),
                _ => DecisionOutcome::Unmatched,
            }
        });
        let dest = destinations();

        for n in 0..30u64 {
            let (_, record) = router
                .evaluate_decision(
                    "audit",
                    "route",
                    &[CriteriaSource::function("parity")],
                    &dest,
                    "node_z",
                    &json!({"n": n}),
                )
                .await;
            assert!(dest.contains_key(&record.selected_option) || record.selected_option == "node_z");
        }

        let records = router.history().decisions(Some("audit"));
        assert_eq!(records.len(), 30);
        assert_eq!(records.iter().filter(|r| r.used_fallback).count(), 20);
    }

    #[test]
    fn test_validate_node() {
        let router = router();
        router.register_criteria("known", |_| DecisionOutcome::Unmatched);
        let known: HashSet<String> = ["node_y", "node_z"].iter().map(|s| s.to_string()).collect();

        let node = DecisionNode {
            name: "route".to_string(),
            sources: vec![CriteriaSource::function("known"), CriteriaSource::path("a.b")],
            destinations: destinations(),
            fallback: "node_z".to_string(),
        };
        assert!(router.validate_node(&node, &known).is_ok());

        let mut to_end = node.clone();
        to_end.destinations.insert("done".to_string(), END_NODE.to_string());
        to_end.fallback = END_NODE.to_string();
        assert!(router.validate_node(&to_end, &known).is_ok());

        let mut bad_dest = node.clone();
        bad_dest.destinations.insert("w".to_string(), "nowhere".to_string());
        assert!(matches!(
            router.validate_node(&bad_dest, &known),
            Err(WorkflowError::InvalidDestination { destination, .. }) if destination == "nowhere"
        ));

        let mut bad_fallback = node.clone();
        // A key is not a destination
        bad_fallback.fallback = "y".to_string();
        assert!(matches!(
            router.validate_node(&bad_fallback, &known),
            Err(WorkflowError::InvalidFallback { .. })
        ));

        let mut bad_criteria = node.clone();
        bad_criteria.sources.push(CriteriaSource::cognitive("missing"));
        assert!(matches!(
            router.validate_node(&bad_criteria, &known),
            Err(WorkflowError::UnknownCriteria { name, .. }) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn test_decision_instance_is_single_shot() {
        let router = router();
        let node = DecisionNode {
            name: "route".to_string(),
            sources: vec![CriteriaSource::path("k")],
            destinations: destinations(),
            fallback: "node_y".to_string(),
        };
        let mut instance = DecisionInstance::new(node);
        assert_eq!(instance.state(), &DecisionState::NotEvaluated);

        let (first, record) = instance.resolve(&router, "wf", &json!({"k": "z"})).await;
        assert_eq!(first, "node_z");
        assert!(record.is_some());

        // State changed, but the instance keeps its recorded destination
        let (second, record) = instance.resolve(&router, "wf", &json!({"k": "y"})).await;
        assert_eq!(second, "node_z");
        assert!(record.is_none());
        assert_eq!(router.history().decisions(Some("wf")).len(), 1);
        assert!(matches!(instance.state(), DecisionState::Evaluated { destination, .. } if destination == "node_z"));
    }
}
