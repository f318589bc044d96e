//! Execution coordinator: wave-based parallel execution of step plans and
//! bounded walks of node graphs.
//!
//! The control task owns the `ExecutionPlan` and the `WorkflowContext`. Every
//! wave dispatches all ready steps as their own tasks on a `JoinSet`; results
//! are merged one at a time, in completion order, and a checkpoint is written
//! after each merge. Retries and per-attempt timeouts run inside the step task.
//!
//! # Execution flow
//!
//! 1. Build the plan (validation errors are returned before anything runs).
//! 2. A cyclic plan ends immediately as `failed`.
//! 3. Loop: check cancellation -> compute the ready set -> dispatch the wave ->
//!    merge results. A critical failure stops after the in-flight wave.
//! 4. Finalize: remaining steps become `not_attempted`, the summary is
//!    archived, and `RunFinished` is published.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::FutureExt;
use serde_json::Value;
use stepweave_types::config::OrchestratorConfig;
use stepweave_types::decision::{DecisionRecord, END_NODE};
use stepweave_types::event::WorkflowEvent;
use stepweave_types::history::{RunCheckpoint, WorkflowRunSummary};
use stepweave_types::result::{WorkflowResult, WorkflowStatus};
use stepweave_types::step::{PlanStatus, Step, StepStatus};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::workflow::WorkflowRunRepository;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::command::{CommandError, CommandExecutor};
use super::context::WorkflowContext;
use super::decision::{DecisionInstance, DecisionRouter};
use super::definition::WorkflowError;
use super::graph::{GraphNode, GraphRunResult, WorkflowGraph};
use super::history::ExecutionHistory;
use super::plan::ExecutionPlan;
use super::resolver::VariableResolver;
use super::retry::RetryHandler;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that prevent a run from starting or from being recorded.
///
/// Step failures are never reported here; they are part of the
/// `WorkflowResult`.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("invalid workflow: {0}")]
    Validation(#[from] WorkflowError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("workflow run not found: {0}")]
    RunNotFound(String),

    #[error("internal coordinator error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// Step task
// ---------------------------------------------------------------------------

/// What a step task hands back to the control task.
#[derive(Debug)]
struct StepOutcome {
    step_id: String,
    result: Result<Value, CommandError>,
    /// When the first attempt began, after any wait for a parallelism permit.
    started_at: DateTime<Utc>,
    attempts: u32,
    retry_count: u32,
    backoffs_ms: Vec<u64>,
}

/// Runs the attempts of one step: timeout per attempt, linear backoff between
/// attempts, panics contained as failures.
#[derive(Clone)]
struct StepRunner {
    executor: Arc<dyn CommandExecutor>,
    event_bus: EventBus,
    default_timeout: Duration,
    backoff_unit: Duration,
}

impl StepRunner {
    async fn run(&self, run_id: Uuid, step: &Step, action: Value) -> StepOutcome {
        let timeout = step
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let started_at = Utc::now();
        let mut attempts = 0u32;
        let mut retry_count = 0u32;
        let mut backoffs_ms = Vec::new();

        loop {
            attempts += 1;
            self.event_bus.publish(WorkflowEvent::StepStarted {
                run_id,
                step_id: step.id.clone(),
                attempt: attempts,
            });
            tracing::debug!(
                run_id = %run_id,
                step_id = step.id.as_str(),
                attempt = attempts,
                "executing step"
            );

            let error = match self.attempt(action.clone(), timeout).await {
                Ok(value) => {
                    return StepOutcome {
                        step_id: step.id.clone(),
                        result: Ok(value),
                        started_at,
                        attempts,
                        retry_count,
                        backoffs_ms,
                    };
                }
                Err(e) => e,
            };

            if !RetryHandler::should_retry(step, retry_count) {
                return StepOutcome {
                    step_id: step.id.clone(),
                    result: Err(error),
                    started_at,
                    attempts,
                    retry_count,
                    backoffs_ms,
                };
            }

            retry_count += 1;
            let delay = RetryHandler::backoff_delay(self.backoff_unit, retry_count);
            let backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            backoffs_ms.push(backoff_ms);

            tracing::warn!(
                run_id = %run_id,
                step_id = step.id.as_str(),
                attempt = attempts,
                backoff_ms,
                error = %error,
                "step attempt failed, retrying"
            );
            self.event_bus.publish(WorkflowEvent::StepRetrying {
                run_id,
                step_id: step.id.clone(),
                attempt: attempts,
                backoff_ms,
                error: error.to_string(),
            });

            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, action: Value, timeout: Duration) -> Result<Value, CommandError> {
        let call = AssertUnwindSafe(self.executor.execute(action)).catch_unwind();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(CommandError::Failed(format!(
                "executor panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_elapsed) => Err(CommandError::TimedOut(timeout.as_secs())),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

/// Final plan status of a run and the run-level error, if any.
#[derive(Debug)]
struct RunEnd {
    status: PlanStatus,
    error: Option<String>,
}

impl RunEnd {
    fn from_failures(plan: &ExecutionPlan) -> Self {
        let status = if plan.failed().is_empty() {
            PlanStatus::Success
        } else {
            PlanStatus::CompletedWithWarnings
        };
        Self { status, error: None }
    }

    fn failed(error: String) -> Self {
        Self {
            status: PlanStatus::Failed,
            error: Some(error),
        }
    }

    fn cancelled() -> Self {
        Self {
            status: PlanStatus::Cancelled,
            error: Some("workflow cancelled".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RunClock {
    start: Instant,
    started_at: DateTime<Utc>,
}

impl RunClock {
    fn start() -> Self {
        Self {
            start: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

/// Path and decisions accumulated by a graph walk.
#[derive(Debug, Default)]
struct GraphTrail {
    path: Vec<String>,
    decisions: Vec<DecisionRecord>,
}

/// Cancellation token shared by the active runs of one workflow id.
#[derive(Debug)]
struct RunRegistration {
    token: CancellationToken,
    active: usize,
}

/// A resume must name the checkpointed workflow and submit the same step ids.
fn check_resumable(
    checkpoint: &RunCheckpoint,
    workflow_id: &str,
    steps: &[Step],
) -> Result<(), WorkflowError> {
    if checkpoint.workflow_id != workflow_id {
        return Err(WorkflowError::ValidationError(format!(
            "run {} belongs to workflow '{}', not '{workflow_id}'",
            checkpoint.run_id, checkpoint.workflow_id
        )));
    }

    let submitted: BTreeSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    let recorded: BTreeSet<&str> = checkpoint
        .step_ids
        .iter()
        .chain(&checkpoint.completed)
        .chain(&checkpoint.failed)
        .map(String::as_str)
        .collect();
    if submitted != recorded {
        let missing: Vec<&str> = recorded.difference(&submitted).copied().collect();
        let unknown: Vec<&str> = submitted.difference(&recorded).copied().collect();
        return Err(WorkflowError::ValidationError(format!(
            "steps do not match run {}: missing [{}], unknown [{}]",
            checkpoint.run_id,
            missing.join(", "),
            unknown.join(", ")
        )));
    }
    Ok(())
}

fn workflow_status(status: PlanStatus) -> WorkflowStatus {
    match status {
        PlanStatus::Success => WorkflowStatus::Success,
        PlanStatus::CompletedWithWarnings => WorkflowStatus::CompletedWithWarnings,
        PlanStatus::Cancelled => WorkflowStatus::Cancelled,
        PlanStatus::Failed | PlanStatus::Initialized | PlanStatus::Executing => {
            WorkflowStatus::Failed
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Executes step plans and node graphs against a `CommandExecutor`.
///
/// Generic over `R: WorkflowRunRepository` for checkpoint and history
/// storage. Everything it needs is injected at construction.
pub struct Coordinator<R: WorkflowRunRepository> {
    runner: StepRunner,
    checkpoint: Arc<CheckpointManager<R>>,
    router: Arc<DecisionRouter>,
    history: Arc<ExecutionHistory>,
    event_bus: EventBus,
    config: OrchestratorConfig,
    /// Cancellation tokens keyed by workflow id.
    cancellation_tokens: DashMap<String, RunRegistration>,
}

impl<R: WorkflowRunRepository> Coordinator<R> {
    /// Create a coordinator with its own history, event bus and decision
    /// router, sized from `config`.
    pub fn new(executor: Arc<dyn CommandExecutor>, repo: R, config: OrchestratorConfig) -> Self {
        let history = Arc::new(ExecutionHistory::new(config.history_capacity));
        let event_bus = EventBus::new(config.event_capacity);
        let router = Arc::new(DecisionRouter::new(Arc::clone(&history), event_bus.clone()));

        Self {
            runner: StepRunner {
                executor,
                event_bus: event_bus.clone(),
                default_timeout: config.step_timeout(),
                backoff_unit: config.backoff_unit(),
            },
            checkpoint: Arc::new(CheckpointManager::new(repo)),
            router,
            history,
            event_bus,
            config,
            cancellation_tokens: DashMap::new(),
        }
    }

    /// Decision router used by graph walks. Register criteria here.
    pub fn router(&self) -> &DecisionRouter {
        &self.router
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn checkpoint(&self) -> &CheckpointManager<R> {
        &self.checkpoint
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Whether a run of `workflow_id` is in progress.
    pub fn is_running(&self, workflow_id: &str) -> bool {
        self.cancellation_tokens.contains_key(workflow_id)
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Execute a list of steps as a dependency-ordered workflow.
    ///
    /// Returns `Err` only when the submission is invalid or the run could not
    /// be recorded; step failures are reported in the result.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        steps: Vec<Step>,
        caller_context: HashMap<String, Value>,
    ) -> Result<WorkflowResult, CoordinatorError> {
        let plan = ExecutionPlan::build(steps)?;
        let ctx = WorkflowContext::new(workflow_id, Uuid::now_v7(), caller_context);
        self.run_plan(plan, ctx).await
    }

    /// Continue a run from its latest checkpoint.
    ///
    /// Steps recorded as completed are not run again; failed steps get a fresh
    /// retry budget. The run keeps its id. `workflow_id` and the step ids must
    /// match the checkpointed run.
    pub async fn resume_workflow(
        &self,
        run_id: Uuid,
        workflow_id: &str,
        steps: Vec<Step>,
    ) -> Result<WorkflowResult, CoordinatorError> {
        let checkpoint = match self.checkpoint.restore(run_id).await {
            Ok(checkpoint) => checkpoint,
            Err(CheckpointError::RunNotFound(id)) => {
                return Err(CoordinatorError::RunNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        check_resumable(&checkpoint, workflow_id, &steps)?;

        let ctx = WorkflowContext::from_json(checkpoint.context)?;
        let mut plan = ExecutionPlan::build(steps)?;
        plan.restore_completed(&checkpoint.completed, &ctx.step_results);

        tracing::info!(
            run_id = %run_id,
            workflow_id = ctx.workflow_id.as_str(),
            previous_status = ?checkpoint.status,
            restored = checkpoint.completed.len(),
            "resuming workflow run"
        );

        self.run_plan(plan, ctx).await
    }

    /// Request cancellation of every active run of `workflow_id`.
    ///
    /// In-flight steps finish; no further wave (or graph node) starts.
    pub fn cancel(&self, workflow_id: &str) -> Result<(), CoordinatorError> {
        match self.cancellation_tokens.get(workflow_id) {
            Some(registration) => {
                registration.token.cancel();
                tracing::info!(workflow_id, "workflow cancellation requested");
                Ok(())
            }
            None => Err(CoordinatorError::RunNotFound(workflow_id.to_string())),
        }
    }

    /// Walk a node graph from its entry until the end sentinel.
    pub async fn execute_graph(
        &self,
        graph: &WorkflowGraph,
        caller_context: HashMap<String, Value>,
    ) -> Result<GraphRunResult, CoordinatorError> {
        let mut plan = ExecutionPlan::build(graph.task_steps())?;
        let mut ctx = WorkflowContext::new(graph.workflow_id(), Uuid::now_v7(), caller_context);
        let clock = RunClock::start();
        let token = self.register_run(graph.workflow_id());

        self.event_bus.publish(WorkflowEvent::RunStarted {
            run_id: ctx.run_id,
            workflow_id: ctx.workflow_id.clone(),
            total_steps: plan.len(),
        });
        tracing::info!(
            run_id = %ctx.run_id,
            workflow_id = graph.workflow_id(),
            nodes = graph.len(),
            entry = graph.entry(),
            "starting graph walk"
        );

        let mut trail = GraphTrail::default();
        let walked = self
            .walk_graph(graph, &mut plan, &mut ctx, &token, &mut trail)
            .await;
        self.release_run(graph.workflow_id());

        let end = walked?;
        let result = self
            .finish(&mut plan, &ctx, end, clock, trail.decisions.len())
            .await?;

        Ok(GraphRunResult {
            result,
            path: trail.path,
            decisions: trail.decisions,
        })
    }

    // -----------------------------------------------------------------------
    // Step plans
    // -----------------------------------------------------------------------

    async fn run_plan(
        &self,
        mut plan: ExecutionPlan,
        mut ctx: WorkflowContext,
    ) -> Result<WorkflowResult, CoordinatorError> {
        let clock = RunClock::start();
        let workflow_id = ctx.workflow_id.clone();
        let token = self.register_run(&workflow_id);

        self.event_bus.publish(WorkflowEvent::RunStarted {
            run_id: ctx.run_id,
            workflow_id: workflow_id.clone(),
            total_steps: plan.len(),
        });
        tracing::info!(
            run_id = %ctx.run_id,
            workflow_id = workflow_id.as_str(),
            steps = plan.len(),
            "starting workflow execution"
        );

        let executed = self.execute_waves(&mut plan, &mut ctx, &token).await;
        self.release_run(&workflow_id);

        let end = executed?;
        self.finish(&mut plan, &ctx, end, clock, 0).await
    }

    async fn execute_waves(
        &self,
        plan: &mut ExecutionPlan,
        ctx: &mut WorkflowContext,
        token: &CancellationToken,
    ) -> Result<RunEnd, CoordinatorError> {
        let run_id = ctx.run_id;

        if let Some(cycle) = plan.cycle() {
            let err = WorkflowError::CycleDetected {
                steps: cycle.to_vec(),
            };
            tracing::error!(run_id = %run_id, error = %err, "workflow has a dependency cycle, nothing will run");
            return Ok(RunEnd::failed(err.to_string()));
        }

        plan.set_status(PlanStatus::Executing);
        self.checkpoint.checkpoint(plan, ctx).await?;

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_steps.max(1)));
        let mut wave: u32 = 0;

        while !plan.is_finished() {
            if token.is_cancelled() {
                tracing::info!(run_id = %run_id, "workflow cancelled, no further waves");
                return Ok(RunEnd::cancelled());
            }

            let ready = plan.ready_set();
            if ready.is_empty() {
                let blocked: Vec<&str> = plan
                    .steps()
                    .iter()
                    .filter(|s| {
                        plan.context(&s.id)
                            .is_some_and(|c| c.status == StepStatus::Pending)
                    })
                    .map(|s| s.id.as_str())
                    .collect();
                tracing::warn!(
                    run_id = %run_id,
                    blocked = ?blocked,
                    "no step is ready, remaining steps depend on failed steps"
                );
                return Ok(RunEnd::failed(format!(
                    "steps blocked by failed prerequisites: {}",
                    blocked.join(", ")
                )));
            }

            wave += 1;
            tracing::debug!(run_id = %run_id, wave, steps = ready.len(), "processing wave");
            self.event_bus.publish(WorkflowEvent::WaveStarted {
                run_id,
                wave,
                step_ids: ready.clone(),
            });

            let mut join_set = JoinSet::new();
            for step_id in &ready {
                let Some(step) = plan.step(step_id).cloned() else {
                    continue;
                };
                // Resolved against the context as it is at dispatch.
                let action = VariableResolver::resolve(&step.action, ctx);
                plan.mark_executing(step_id, wave);

                let runner = self.runner.clone();
                let semaphore = Arc::clone(&semaphore);
                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    runner.run(run_id, &step, action).await
                });
            }

            while let Some(joined) = join_set.join_next().await {
                let outcome = joined
                    .map_err(|e| CoordinatorError::Internal(format!("step task join error: {e}")))?;
                self.merge_outcome(plan, ctx, outcome);
                self.checkpoint.checkpoint(plan, ctx).await?;
            }

            if let Some(step) = plan.critical_failure() {
                tracing::error!(
                    run_id = %run_id,
                    step_id = step.id.as_str(),
                    "critical step failed, stopping workflow"
                );
                return Ok(RunEnd::failed(format!("critical step '{}' failed", step.id)));
            }
        }

        Ok(RunEnd::from_failures(plan))
    }

    /// Fold one step outcome into the plan and the context.
    fn merge_outcome(&self, plan: &mut ExecutionPlan, ctx: &mut WorkflowContext, outcome: StepOutcome) {
        let run_id = ctx.run_id;
        let StepOutcome {
            step_id,
            result,
            started_at,
            attempts,
            retry_count,
            backoffs_ms,
        } = outcome;

        if let Some(step_ctx) = plan.context_mut(&step_id) {
            step_ctx.start_time = Some(started_at);
            step_ctx.attempts = attempts;
            step_ctx.retry_count = retry_count;
            step_ctx.backoffs_ms = backoffs_ms;
        }

        match result {
            Ok(value) => {
                ctx.record_step_result(&step_id, value.clone());
                if let Some(step) = plan.step(&step_id) {
                    ctx.extract_variables(step, &value);
                }
                plan.mark_completed(&step_id, value);

                let duration_ms = plan
                    .context(&step_id)
                    .and_then(|c| c.duration_ms())
                    .unwrap_or(0);
                tracing::info!(
                    run_id = %run_id,
                    step_id = step_id.as_str(),
                    attempts,
                    duration_ms,
                    "step completed"
                );
                self.event_bus.publish(WorkflowEvent::StepCompleted {
                    run_id,
                    step_id,
                    attempts,
                    duration_ms,
                });
            }
            Err(error) => {
                let critical = plan.step(&step_id).is_some_and(|s| s.critical);
                let message = error.to_string();
                plan.mark_failed(&step_id, message.clone());

                if critical {
                    tracing::error!(run_id = %run_id, step_id = step_id.as_str(), attempts, error = %error, "critical step failed");
                } else {
                    tracing::warn!(run_id = %run_id, step_id = step_id.as_str(), attempts, error = %error, "step failed");
                }
                self.event_bus.publish(WorkflowEvent::StepFailed {
                    run_id,
                    step_id,
                    attempts,
                    critical,
                    error: message,
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Graphs
    // -----------------------------------------------------------------------

    async fn walk_graph(
        &self,
        graph: &WorkflowGraph,
        plan: &mut ExecutionPlan,
        ctx: &mut WorkflowContext,
        token: &CancellationToken,
        trail: &mut GraphTrail,
    ) -> Result<RunEnd, CoordinatorError> {
        let run_id = ctx.run_id;
        let max_visits = self.config.max_graph_steps;
        let mut visits: u32 = 0;
        let mut current = graph.entry().to_string();

        plan.set_status(PlanStatus::Executing);
        self.checkpoint.checkpoint(plan, ctx).await?;

        while current != END_NODE {
            if token.is_cancelled() {
                tracing::info!(run_id = %run_id, node = current.as_str(), "graph walk cancelled");
                return Ok(RunEnd::cancelled());
            }
            if visits >= max_visits {
                tracing::error!(run_id = %run_id, max_visits, "graph walk exceeded its visit limit");
                return Ok(RunEnd::failed(format!(
                    "graph walk exceeded {max_visits} node visits"
                )));
            }
            visits += 1;
            trail.path.push(current.clone());

            current = match graph.node(&current) {
                Some(GraphNode::Task { step, next }) => {
                    plan.reset_step(&step.id);
                    let action = VariableResolver::resolve(&step.action, ctx);
                    plan.mark_executing(&step.id, visits);
                    self.event_bus.publish(WorkflowEvent::WaveStarted {
                        run_id,
                        wave: visits,
                        step_ids: vec![step.id.clone()],
                    });

                    let outcome = self.runner.run(run_id, step, action).await;
                    self.merge_outcome(plan, ctx, outcome);
                    self.checkpoint.checkpoint(plan, ctx).await?;

                    if step.critical && plan.failed().contains(&step.id) {
                        return Ok(RunEnd::failed(format!("critical step '{}' failed", step.id)));
                    }
                    next.clone().unwrap_or_else(|| END_NODE.to_string())
                }
                Some(GraphNode::Decision(node)) => {
                    let mut instance = DecisionInstance::new(node.clone());
                    let state = ctx.to_state();
                    let (destination, record) = instance
                        .resolve(&self.router, &ctx.workflow_id, &state)
                        .await;
                    if let Some(record) = record {
                        self.checkpoint.record_decision(&record).await?;
                        trail.decisions.push(record);
                    }
                    destination
                }
                None => {
                    return Err(CoordinatorError::Internal(format!(
                        "graph has no node '{current}'"
                    )));
                }
            };
        }

        Ok(RunEnd::from_failures(plan))
    }

    // -----------------------------------------------------------------------
    // Shared
    // -----------------------------------------------------------------------

    async fn finish(
        &self,
        plan: &mut ExecutionPlan,
        ctx: &WorkflowContext,
        end: RunEnd,
        clock: RunClock,
        decisions: usize,
    ) -> Result<WorkflowResult, CoordinatorError> {
        plan.finalize(end.status);
        self.checkpoint.checkpoint(plan, ctx).await?;

        let result = WorkflowResult {
            status: workflow_status(end.status),
            workflow_id: ctx.workflow_id.clone(),
            run_id: ctx.run_id,
            results: plan.step_results(),
            completed_steps: plan.count(StepStatus::Completed),
            failed_steps: plan.count(StepStatus::Failed),
            not_attempted_steps: plan.count(StepStatus::NotAttempted),
            total_steps: plan.len(),
            execution_time: clock.start.elapsed().as_secs_f64(),
            error: end.error,
        };

        let summary = WorkflowRunSummary::from_result(&result, clock.started_at, decisions);
        self.history.record_run(summary.clone());
        self.checkpoint.archive_run(&summary).await?;

        self.event_bus.publish(WorkflowEvent::RunFinished {
            run_id: result.run_id,
            workflow_id: result.workflow_id.clone(),
            status: result.status,
            duration_ms: summary.duration_ms,
            completed_steps: result.completed_steps,
            failed_steps: result.failed_steps,
        });

        tracing::info!(
            run_id = %result.run_id,
            workflow_id = result.workflow_id.as_str(),
            status = %result.status,
            completed = result.completed_steps,
            failed = result.failed_steps,
            not_attempted = result.not_attempted_steps,
            duration_ms = summary.duration_ms,
            "workflow finished"
        );

        Ok(result)
    }

    fn register_run(&self, workflow_id: &str) -> CancellationToken {
        let mut registration = self
            .cancellation_tokens
            .entry(workflow_id.to_string())
            .or_insert_with(|| RunRegistration {
                token: CancellationToken::new(),
                active: 0,
            });
        if registration.token.is_cancelled() {
            registration.token = CancellationToken::new();
        }
        registration.active += 1;
        registration.token.clone()
    }

    fn release_run(&self, workflow_id: &str) {
        if let Some(mut registration) = self.cancellation_tokens.get_mut(workflow_id) {
            registration.active = registration.active.saturating_sub(1);
        }
        self.cancellation_tokens
            .remove_if(workflow_id, |_, registration| registration.active == 0);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
