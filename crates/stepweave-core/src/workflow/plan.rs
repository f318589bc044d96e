//! Execution plan: dependency graph, topological order, and per-step run state.
//!
//! `ExecutionPlan::build` validates a step list and computes a Kahn
//! topological order (ties broken by input order) over a `petgraph` graph.
//! The order is advisory: the coordinator dispatches by ready set, and uses
//! the order only to confirm the graph is acyclic before anything runs.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::Utc;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde_json::Value;
use stepweave_types::result::StepResult;
use stepweave_types::step::{PlanStatus, Step, StepExecutionContext, StepStatus};

use super::definition::WorkflowError;

/// Derived plan for one workflow invocation. Discarded after the run.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    steps: Vec<Step>,
    index: HashMap<String, usize>,
    dependency_graph: HashMap<String, BTreeSet<String>>,
    topological_order: Vec<String>,
    cycle: Option<Vec<String>>,
    contexts: Vec<StepExecutionContext>,
    completed: HashSet<String>,
    failed: HashSet<String>,
    status: PlanStatus,
}

impl ExecutionPlan {
    /// Validate `steps` and build the plan.
    ///
    /// Rejects empty lists, duplicate ids, and unknown dependencies. A cycle is
    /// not an error here: the plan is built and `cycle()` names the steps on
    /// it, so the caller can report a failed run.
    pub fn build(steps: Vec<Step>) -> Result<Self, WorkflowError> {
        if steps.is_empty() {
            return Err(WorkflowError::ValidationError(
                "workflow must contain at least one step".to_string(),
            ));
        }

        let mut index = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.id.clone(), i).is_some() {
                return Err(WorkflowError::DuplicateStep(step.id.clone()));
            }
        }

        // Edge dependency -> dependent.
        let mut graph = DiGraph::<usize, ()>::with_capacity(steps.len(), steps.len());
        let nodes: Vec<NodeIndex> = (0..steps.len()).map(|i| graph.add_node(i)).collect();
        let mut dependency_graph = HashMap::with_capacity(steps.len());

        for (i, step) in steps.iter().enumerate() {
            let mut deps = BTreeSet::new();
            for dep in &step.depends_on {
                let from = index.get(dep).ok_or_else(|| WorkflowError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                })?;
                if deps.insert(dep.clone()) {
                    graph.add_edge(nodes[*from], nodes[i], ());
                }
            }
            dependency_graph.insert(step.id.clone(), deps);
        }

        let topological_order: Vec<String> = kahn_order(&graph)
            .into_iter()
            .map(|i| steps[i].id.clone())
            .collect();

        let cycle = if topological_order.len() < steps.len() {
            Some(cycle_members(&graph, &steps))
        } else {
            None
        };

        let contexts = vec![StepExecutionContext::default(); steps.len()];

        Ok(Self {
            steps,
            index,
            dependency_graph,
            topological_order,
            cycle,
            contexts,
            completed: HashSet::new(),
            failed: HashSet::new(),
            status: PlanStatus::Initialized,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    pub fn context(&self, id: &str) -> Option<&StepExecutionContext> {
        self.index.get(id).map(|&i| &self.contexts[i])
    }

    pub fn context_mut(&mut self, id: &str) -> Option<&mut StepExecutionContext> {
        self.index.get(id).map(|&i| &mut self.contexts[i])
    }

    /// Dependencies of every step, keyed by step id.
    pub fn dependency_graph(&self) -> &HashMap<String, BTreeSet<String>> {
        &self.dependency_graph
    }

    /// Kahn order. Shorter than the step list when the graph has a cycle.
    pub fn topological_order(&self) -> &[String] {
        &self.topological_order
    }

    /// Steps lying on a dependency cycle, in input order.
    pub fn cycle(&self) -> Option<&[String]> {
        self.cycle.as_deref()
    }

    pub fn completed(&self) -> &HashSet<String> {
        &self.completed
    }

    pub fn failed(&self) -> &HashSet<String> {
        &self.failed
    }

    pub fn status(&self) -> PlanStatus {
        self.status
    }

    pub fn set_status(&mut self, status: PlanStatus) {
        self.status = status;
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    // -----------------------------------------------------------------------
    // Progress
    // -----------------------------------------------------------------------

    /// Pending steps whose dependencies have all completed, in input order.
    pub fn ready_set(&self) -> Vec<String> {
        self.steps
            .iter()
            .zip(&self.contexts)
            .filter(|(step, ctx)| {
                ctx.status == StepStatus::Pending
                    && self.dependency_graph[&step.id]
                        .iter()
                        .all(|dep| self.completed.contains(dep))
            })
            .map(|(step, _)| step.id.clone())
            .collect()
    }

    /// `completed ∪ failed` covers every step.
    pub fn is_finished(&self) -> bool {
        self.completed.len() + self.failed.len() == self.steps.len()
    }

    /// First critical step, in input order, that has failed.
    pub fn critical_failure(&self) -> Option<&Step> {
        self.steps
            .iter()
            .find(|step| step.critical && self.failed.contains(&step.id))
    }

    pub fn mark_executing(&mut self, id: &str, wave: u32) {
        if let Some(ctx) = self.context_mut(id) {
            ctx.status = StepStatus::Executing;
            ctx.wave = Some(wave);
        }
    }

    pub fn mark_completed(&mut self, id: &str, result: Value) {
        let Some(&i) = self.index.get(id) else { return };
        let ctx = &mut self.contexts[i];
        ctx.status = StepStatus::Completed;
        ctx.result = Some(result);
        ctx.error = None;
        ctx.end_time = Some(Utc::now());
        self.completed.insert(id.to_string());
    }

    pub fn mark_failed(&mut self, id: &str, error: String) {
        let Some(&i) = self.index.get(id) else { return };
        let ctx = &mut self.contexts[i];
        ctx.status = StepStatus::Failed;
        ctx.error = Some(error);
        ctx.end_time = Some(Utc::now());
        self.failed.insert(id.to_string());
    }

    /// Mark steps restored from a checkpoint as completed without running them.
    ///
    /// Everything else is reset to pending, so earlier failures are retried.
    pub fn restore_completed(&mut self, completed: &[String], results: &HashMap<String, Value>) {
        self.completed.clear();
        self.failed.clear();
        for ctx in &mut self.contexts {
            *ctx = StepExecutionContext::default();
        }
        for id in completed {
            let Some(&i) = self.index.get(id) else { continue };
            let ctx = &mut self.contexts[i];
            ctx.status = StepStatus::Completed;
            ctx.result = results.get(id).cloned();
            self.completed.insert(id.clone());
        }
    }

    /// Return one step to pending so it can run again (graph walks that
    /// revisit a task node).
    pub fn reset_step(&mut self, id: &str) {
        let Some(&i) = self.index.get(id) else { return };
        self.contexts[i] = StepExecutionContext::default();
        self.completed.remove(id);
        self.failed.remove(id);
    }

    /// Close the run: every step still pending or executing becomes
    /// `not_attempted`, and the plan takes its final status.
    pub fn finalize(&mut self, status: PlanStatus) {
        for ctx in &mut self.contexts {
            if matches!(ctx.status, StepStatus::Pending | StepStatus::Executing) {
                ctx.status = StepStatus::NotAttempted;
            }
        }
        self.status = status;
    }

    /// Per-step outcomes in input order.
    pub fn step_results(&self) -> Vec<StepResult> {
        self.steps
            .iter()
            .zip(&self.contexts)
            .map(|(step, ctx)| StepResult {
                step_id: step.id.clone(),
                status: ctx.status,
                result: ctx.result.clone(),
                error: ctx.error.clone(),
                attempts: ctx.attempts,
                wave: ctx.wave,
                duration_ms: ctx.duration_ms(),
            })
            .collect()
    }

    /// Number of steps currently in `status`.
    pub fn count(&self, status: StepStatus) -> usize {
        self.contexts.iter().filter(|c| c.status == status).count()
    }
}

// ---------------------------------------------------------------------------
// Graph helpers
// ---------------------------------------------------------------------------

/// Kahn's algorithm by in-degree counting. Among nodes with in-degree zero the
/// lowest input index goes first.
fn kahn_order(graph: &DiGraph<usize, ()>) -> Vec<usize> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.edges_directed(n, Direction::Incoming).count())
        .collect();

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(i) = ready.pop_first() {
        order.push(graph[NodeIndex::new(i)]);
        for succ in graph.neighbors_directed(NodeIndex::new(i), Direction::Outgoing) {
            let d = &mut in_degree[succ.index()];
            *d -= 1;
            if *d == 0 {
                ready.insert(succ.index());
            }
        }
    }
    order
}

/// Steps on a cycle: members of non-trivial strongly connected components,
/// plus self-dependent steps. Reported in input order.
fn cycle_members(graph: &DiGraph<usize, ()>, steps: &[Step]) -> Vec<String> {
    let mut members: Vec<usize> = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .flatten()
        .map(|n| graph[n])
        .collect();
    members.sort_unstable();
    members.into_iter().map(|i| steps[i].id.clone()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
