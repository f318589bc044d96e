//! Node graphs: task nodes joined by static edges and decision nodes.
//!
//! Unlike a step DAG, a graph is walked one node at a time from its entry.
//! Task nodes follow their static edge; decision nodes pick the next node at
//! runtime through the `DecisionRouter`. Graphs may contain loops, so the
//! coordinator bounds every walk.

use std::collections::{BTreeMap, HashMap, HashSet};

use stepweave_types::decision::{CriteriaSource, DecisionRecord, END_NODE};
use stepweave_types::result::WorkflowResult;
use stepweave_types::step::Step;

use super::decision::{DecisionNode, DecisionRouter};
use super::definition::{GraphDefinition, NodeDefinition, WorkflowError};

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// A node of a workflow graph.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphNode {
    /// Runs a step, then moves to `next` (the end of the walk when `None`).
    Task { step: Step, next: Option<String> },
    Decision(DecisionNode),
}

impl GraphNode {
    pub fn id(&self) -> &str {
        match self {
            GraphNode::Task { step, .. } => &step.id,
            GraphNode::Decision(node) => &node.name,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

/// A validated graph, ready to be walked by the coordinator.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    workflow_id: String,
    entry: String,
    nodes: HashMap<String, GraphNode>,
    order: Vec<String>,
}

impl WorkflowGraph {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Steps of all task nodes, in insertion order.
    pub fn task_steps(&self) -> Vec<Step> {
        self.order
            .iter()
            .filter_map(|id| match self.nodes.get(id) {
                Some(GraphNode::Task { step, .. }) => Some(step.clone()),
                _ => None,
            })
            .collect()
    }

    /// Build a graph from a parsed definition.
    ///
    /// Task nodes are added first. Decision nodes are then added once every
    /// destination they name exists, so decisions may route to each other in
    /// any declaration order.
    pub fn from_definition(
        def: &GraphDefinition,
        router: &DecisionRouter,
        default_max_retries: u32,
    ) -> Result<Self, WorkflowError> {
        let mut builder = GraphBuilder::new(def.workflow_id.as_str(), router);
        let mut decisions = Vec::new();

        for node in &def.nodes {
            match node {
                NodeDefinition::Task { next, .. } => {
                    if let Some(step) = node.to_step(default_max_retries) {
                        let id = step.id.clone();
                        builder.add_step_node(step)?;
                        if let Some(next) = next {
                            builder.add_edge(&id, next)?;
                        }
                    }
                }
                NodeDefinition::Decision {
                    id,
                    sources,
                    destinations,
                    fallback,
                } => decisions.push((id, sources, destinations, fallback)),
            }
        }

        let declared: HashSet<&str> = def.nodes.iter().map(NodeDefinition::id).collect();
        while !decisions.is_empty() {
            let position = decisions.iter().position(|(_, _, destinations, _)| {
                destinations.values().all(|d| {
                    d == END_NODE || builder.contains(d) || !declared.contains(d.as_str())
                })
            });
            // Remaining decisions route to each other in a ring: add the first
            // with the rest declared pending.
            let index = position.unwrap_or(0);
            let (id, sources, destinations, fallback) = decisions.remove(index);
            if position.is_none() {
                builder.declare_pending(decisions.iter().map(|(id, ..)| id.as_str()));
            }
            builder.add_decision_node(
                id.as_str(),
                sources.clone(),
                destinations.clone(),
                fallback.as_str(),
            )?;
        }

        builder.set_entry(def.entry.as_str());
        builder.build()
    }
}

// ---------------------------------------------------------------------------
// GraphBuilder
// ---------------------------------------------------------------------------

/// Incremental graph construction.
///
/// Decision nodes are validated as they are added: every destination must
/// already be a node of the graph (or the end sentinel), and function or
/// cognitive sources must be registered with the router. Edges and the entry
/// point may refer forward and are checked by `build`.
pub struct GraphBuilder<'r> {
    workflow_id: String,
    router: &'r DecisionRouter,
    nodes: HashMap<String, GraphNode>,
    order: Vec<String>,
    pending: HashSet<String>,
    entry: Option<String>,
}

impl<'r> GraphBuilder<'r> {
    pub fn new(workflow_id: impl Into<String>, router: &'r DecisionRouter) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            router,
            nodes: HashMap::new(),
            order: Vec::new(),
            pending: HashSet::new(),
            entry: None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Add a task node. It ends the walk unless an edge is added from it.
    ///
    /// Task nodes are ordered by edges and decisions, so `depends_on` must be
    /// empty.
    pub fn add_step_node(&mut self, step: Step) -> Result<(), WorkflowError> {
        if !step.depends_on.is_empty() {
            return Err(WorkflowError::ValidationError(format!(
                "task node '{}' declares depends_on; graph nodes are ordered by edges and decisions",
                step.id
            )));
        }
        let id = step.id.clone();
        self.check_new_id(&id)?;
        self.order.push(id.clone());
        self.nodes.insert(id, GraphNode::Task { step, next: None });
        Ok(())
    }

    /// Add a static edge from a task node.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), WorkflowError> {
        match self.nodes.get_mut(from) {
            Some(GraphNode::Task { next, .. }) => {
                if let Some(existing) = next.as_deref() {
                    if existing != to {
                        return Err(WorkflowError::ValidationError(format!(
                            "task node '{from}' already has an edge to '{existing}'"
                        )));
                    }
                }
                *next = Some(to.to_string());
                Ok(())
            }
            Some(GraphNode::Decision(_)) => Err(WorkflowError::ValidationError(format!(
                "decision node '{from}' routes through its destinations, not edges"
            ))),
            None => Err(WorkflowError::UnknownNode(from.to_string())),
        }
    }

    /// Add a decision node, validating it against the nodes added so far.
    pub fn add_decision_node(
        &mut self,
        name: &str,
        sources: Vec<CriteriaSource>,
        destinations: BTreeMap<String, String>,
        fallback: &str,
    ) -> Result<(), WorkflowError> {
        self.check_new_id(name)?;

        let node = DecisionNode {
            name: name.to_string(),
            sources,
            destinations,
            fallback: fallback.to_string(),
        };

        let mut known: HashSet<String> = self.nodes.keys().cloned().collect();
        known.extend(self.pending.iter().cloned());
        self.router.validate_node(&node, &known)?;

        self.pending.remove(name);
        self.order.push(name.to_string());
        self.nodes.insert(name.to_string(), GraphNode::Decision(node));
        Ok(())
    }

    /// Set the node the walk starts at. Defaults to the first node added.
    pub fn set_entry(&mut self, id: &str) {
        self.entry = Some(id.to_string());
    }

    /// Validate edges and the entry point and produce the graph.
    pub fn build(self) -> Result<WorkflowGraph, WorkflowError> {
        let has_task = self
            .nodes
            .values()
            .any(|node| matches!(node, GraphNode::Task { .. }));
        if !has_task {
            return Err(WorkflowError::ValidationError(format!(
                "graph '{}' has no task nodes",
                self.workflow_id
            )));
        }

        if let Some(missing) = self.pending.iter().next() {
            return Err(WorkflowError::UnknownNode(missing.clone()));
        }

        for node in self.nodes.values() {
            if let GraphNode::Task { next: Some(next), .. } = node {
                if next != END_NODE && !self.nodes.contains_key(next) {
                    return Err(WorkflowError::UnknownNode(next.clone()));
                }
            }
        }

        let entry = match self.entry {
            Some(entry) => entry,
            None => self.order.first().cloned().unwrap_or_default(),
        };
        if !self.nodes.contains_key(&entry) {
            return Err(WorkflowError::UnknownNode(entry));
        }

        tracing::debug!(
            workflow_id = self.workflow_id.as_str(),
            nodes = self.order.len(),
            entry = entry.as_str(),
            "built workflow graph"
        );

        Ok(WorkflowGraph {
            workflow_id: self.workflow_id,
            entry,
            nodes: self.nodes,
            order: self.order,
        })
    }

    /// Names of decision nodes that will be added later and may already be
    /// used as destinations.
    fn declare_pending<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        self.pending.extend(ids.into_iter().map(str::to_string));
    }

    fn check_new_id(&self, id: &str) -> Result<(), WorkflowError> {
        if id.is_empty() || id == END_NODE {
            return Err(WorkflowError::ValidationError(format!(
                "'{id}' is not a valid node id"
            )));
        }
        if self.nodes.contains_key(id) {
            return Err(WorkflowError::DuplicateStep(id.to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GraphRunResult
// ---------------------------------------------------------------------------

/// Outcome of one graph walk.
#[derive(Debug, Clone)]
pub struct GraphRunResult {
    /// Step-level result over the graph's task nodes. Task nodes the walk
    /// never reached are `not_attempted`.
    pub result: WorkflowResult,
    /// Node ids in visit order.
    pub path: Vec<String>,
    /// Decisions taken during the walk, in order.
    pub decisions: Vec<DecisionRecord>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBus;
    use crate::workflow::definition::parse_graph;
    use crate::workflow::history::ExecutionHistory;
    use serde_json::json;
    use std::sync::Arc;

    fn router() -> DecisionRouter {
        DecisionRouter::new(Arc::new(ExecutionHistory::new(10)), EventBus::new(8))
    }

    fn routes(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_build_simple_graph() {
        let router = router();
        let mut builder = GraphBuilder::new("wf", &router);
        builder.add_step_node(Step::new("classify", json!({}))).unwrap();
        builder.add_step_node(Step::new("page", json!({}))).unwrap();
        builder.add_step_node(Step::new("ticket", json!({}))).unwrap();
        builder.add_edge("classify", "route").unwrap();
        builder
            .add_decision_node(
                "route",
                vec![CriteriaSource::path("variables.label")],
                routes(&[("urgent", "page"), ("normal", "ticket")]),
                "ticket",
            )
            .unwrap();

        let graph = builder.build().unwrap();
        assert_eq!(graph.entry(), "classify");
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.task_steps().len(), 3);
        assert!(matches!(graph.node("route"), Some(GraphNode::Decision(_))));
        assert!(matches!(
            graph.node("classify"),
            Some(GraphNode::Task { next: Some(n), .. }) if n == "route"
        ));
    }

    #[test]
    fn test_decision_destination_must_exist_when_added() {
        let router = router();
        let mut builder = GraphBuilder::new("wf", &router);
        builder.add_step_node(Step::new("a", json!({}))).unwrap();
        let err = builder
            .add_decision_node(
                "route",
                vec![CriteriaSource::path("variables.x")],
                routes(&[("x", "later")]),
                "later",
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidDestination { .. }));
        assert!(!builder.contains("route"));
    }

    #[test]
    fn test_decision_may_route_to_end() {
        let router = router();
        let mut builder = GraphBuilder::new("wf", &router);
        builder.add_step_node(Step::new("a", json!({}))).unwrap();
        builder
            .add_decision_node(
                "route",
                vec![CriteriaSource::path("variables.x")],
                routes(&[("again", "a"), ("done", END_NODE)]),
                END_NODE,
            )
            .unwrap();
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_unregistered_function_rejected() {
        let router = router();
        let mut builder = GraphBuilder::new("wf", &router);
        builder.add_step_node(Step::new("a", json!({}))).unwrap();
        let err = builder
            .add_decision_node(
                "route",
                vec![CriteriaSource::function("missing")],
                routes(&[("x", "a")]),
                "a",
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownCriteria { .. }));
    }

    #[test]
    fn test_edge_target_checked_on_build() {
        let router = router();
        let mut builder = GraphBuilder::new("wf", &router);
        builder.add_step_node(Step::new("a", json!({}))).unwrap();
        builder.add_edge("a", "ghost").unwrap();
        let err = builder.build().unwrap_err();
        assert_eq!(err.to_string(), WorkflowError::UnknownNode("ghost".into()).to_string());
    }

    #[test]
    fn test_edge_errors() {
        let router = router();
        let mut builder = GraphBuilder::new("wf", &router);
        builder.add_step_node(Step::new("a", json!({}))).unwrap();
        builder.add_step_node(Step::new("b", json!({}))).unwrap();
        assert!(matches!(
            builder.add_edge("ghost", "a"),
            Err(WorkflowError::UnknownNode(_))
        ));
        builder.add_edge("a", "b").unwrap();
        assert!(builder.add_edge("a", "b").is_ok());
        assert!(matches!(
            builder.add_edge("a", END_NODE),
            Err(WorkflowError::ValidationError(_))
        ));
    }

    #[test]
    fn test_duplicate_and_reserved_ids() {
        let router = router();
        let mut builder = GraphBuilder::new("wf", &router);
        builder.add_step_node(Step::new("a", json!({}))).unwrap();
        assert!(matches!(
            builder.add_step_node(Step::new("a", json!({}))),
            Err(WorkflowError::DuplicateStep(_))
        ));
        assert!(matches!(
            builder.add_step_node(Step::new(END_NODE, json!({}))),
            Err(WorkflowError::ValidationError(_))
        ));
    }

    #[test]
    fn test_unknown_entry_and_empty_graph() {
        let router = router();
        let mut builder = GraphBuilder::new("wf", &router);
        builder.add_step_node(Step::new("a", json!({}))).unwrap();
        builder.set_entry("nope");
        assert!(matches!(builder.build(), Err(WorkflowError::UnknownNode(_))));

        let builder = GraphBuilder::new("wf", &router);
        assert!(matches!(builder.build(), Err(WorkflowError::ValidationError(_))));
    }

    #[test]
    fn test_from_definition_orders_decisions() {
        let yaml = r#"
workflow_id: triage
entry: classify
nodes:
  - kind: task
    id: classify
    action: { type: echo }
    next: first
  - kind: decision
    id: first
    sources: [{ type: state_path, value: variables.a }]
    destinations: { go: second, stop: __end__ }
    fallback: __end__
  - kind: decision
    id: second
    sources: [{ type: state_path, value: variables.b }]
    destinations: { go: work }
    fallback: work
  - kind: task
    id: work
    action: { type: echo }
"#;
        let def = parse_graph(yaml).unwrap();
        let graph = WorkflowGraph::from_definition(&def, &router(), 2).unwrap();
        assert_eq!(graph.entry(), "classify");
        assert_eq!(graph.len(), 4);
        match graph.node("work") {
            Some(GraphNode::Task { step, next }) => {
                assert_eq!(step.max_retries, 2);
                assert!(next.is_none());
            }
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn test_from_definition_decision_ring() {
        let yaml = r#"
workflow_id: ring
entry: start
nodes:
  - kind: task
    id: start
    next: left
  - kind: decision
    id: left
    sources: [{ type: state_path, value: variables.x }]
    destinations: { x: right }
    fallback: right
  - kind: decision
    id: right
    sources: [{ type: state_path, value: variables.x }]
    destinations: { x: left, done: __end__ }
    fallback: __end__
"#;
        let def = parse_graph(yaml).unwrap();
        let graph = WorkflowGraph::from_definition(&def, &router(), 0).unwrap();
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_from_definition_unknown_destination() {
        let yaml = r#"
workflow_id: bad
entry: start
nodes:
  - kind: task
    id: start
    next: route
  - kind: decision
    id: route
    sources: [{ type: state_path, value: variables.x }]
    destinations: { x: nowhere }
    fallback: nowhere
"#;
        let def = parse_graph(yaml).unwrap();
        let err = WorkflowGraph::from_definition(&def, &router(), 0).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidDestination { .. }));
    }

    #[test]
    fn test_task_node_dependencies_rejected() {
        let router = router();
        let mut builder = GraphBuilder::new("wf", &router);
        builder.add_step_node(Step::new("fetch", json!({}))).unwrap();
        let err = builder
            .add_step_node(Step::new("store", json!({})).depends_on(["route"]))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ValidationError(msg) if msg.contains("depends_on")));
        assert!(!builder.contains("store"));

        let yaml = r#"
workflow_id: looped
entry: a
nodes:
  - { kind: task, id: a, depends_on: [b] }
  - { kind: task, id: b, depends_on: [a] }
"#;
        let def = parse_graph(yaml).unwrap();
        let err = WorkflowGraph::from_definition(&def, &router, 0).unwrap_err();
        assert!(matches!(err, WorkflowError::ValidationError(_)));
    }
}
