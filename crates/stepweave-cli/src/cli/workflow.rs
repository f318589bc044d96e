//! Workflow execution subcommands: run, validate, resume and graph.
//!
//! Progress events are printed to stderr while a run is in flight; the final
//! result goes to stdout (styled, or JSON with `--json`). Ctrl+C cancels the
//! run between waves.

use std::collections::HashMap;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use stepweave_core::event::EventBus;
use stepweave_core::repository::WorkflowRunRepository;
use stepweave_core::workflow::checkpoint::CheckpointError;
use stepweave_core::workflow::definition::{NodeDefinition, load_graph_file, load_submission_file};
use stepweave_core::workflow::{
    Coordinator, CoordinatorError, ExecutionPlan, WorkflowError, WorkflowGraph,
};
use stepweave_types::event::WorkflowEvent;
use stepweave_types::result::{WorkflowResult, WorkflowStatus};
use stepweave_types::step::StepStatus;

use crate::state::AppState;

/// Output switches shared by the workflow subcommands.
#[derive(Debug, Clone, Copy)]
pub struct OutputMode {
    pub json: bool,
    pub quiet: bool,
}

impl OutputMode {
    fn show_progress(self) -> bool {
        !self.json && !self.quiet
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn run_workflow<R: WorkflowRunRepository + 'static>(
    state: &AppState<R>,
    file: &Path,
    vars: Vec<(String, Value)>,
    mode: OutputMode,
) -> Result<ExitCode> {
    let submission = load_submission_file(file, state.config.default_max_retries)
        .with_context(|| format!("Failed to load workflow file {}", file.display()))?;

    let mut context = submission.context;
    context.extend(vars);
    let total_steps = submission.steps.len();
    let workflow_id = submission.workflow_id;

    let progress = spawn_progress(state.coordinator.event_bus(), mode);
    let interrupt = spawn_interrupt(Arc::clone(&state.coordinator), workflow_id.clone());

    let outcome = state
        .coordinator
        .execute_workflow(&workflow_id, submission.steps, context)
        .await;
    interrupt.abort();

    finish_run(outcome, progress, &workflow_id, total_steps, mode).await
}

// ---------------------------------------------------------------------------
// Resume
// ---------------------------------------------------------------------------

pub async fn resume_workflow<R: WorkflowRunRepository + 'static>(
    state: &AppState<R>,
    run_id: uuid::Uuid,
    file: &Path,
    mode: OutputMode,
) -> Result<ExitCode> {
    let submission = load_submission_file(file, state.config.default_max_retries)
        .with_context(|| format!("Failed to load workflow file {}", file.display()))?;
    let total_steps = submission.steps.len();

    // The resumed run registers under the checkpointed workflow id.
    let workflow_id = match state.coordinator.checkpoint().restore(run_id).await {
        Ok(checkpoint) => checkpoint.workflow_id,
        Err(CheckpointError::RunNotFound(id)) => {
            anyhow::bail!("No checkpoint found for run '{id}'")
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to load checkpoint: {e}")),
    };

    let progress = spawn_progress(state.coordinator.event_bus(), mode);
    let interrupt = spawn_interrupt(Arc::clone(&state.coordinator), workflow_id.clone());

    let outcome = state
        .coordinator
        .resume_workflow(run_id, &submission.workflow_id, submission.steps)
        .await;
    interrupt.abort();

    if let Err(CoordinatorError::RunNotFound(id)) = &outcome {
        progress.abort();
        anyhow::bail!("No checkpoint found for run '{id}'");
    }

    finish_run(outcome, progress, &workflow_id, total_steps, mode).await
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

/// Parse a workflow file and check its dependency graph without running it.
pub fn validate_workflow<R: WorkflowRunRepository>(
    state: &AppState<R>,
    file: &Path,
    mode: OutputMode,
) -> Result<ExitCode> {
    let submission = load_submission_file(file, state.config.default_max_retries)
        .with_context(|| format!("Failed to load workflow file {}", file.display()))?;
    let total_steps = submission.steps.len();

    let message = match ExecutionPlan::build(submission.steps) {
        Ok(plan) => match plan.cycle() {
            Some(cycle) => WorkflowError::CycleDetected {
                steps: cycle.to_vec(),
            }
            .to_string(),
            None => {
                report_valid(&submission.workflow_id, plan.topological_order(), mode)?;
                return Ok(ExitCode::SUCCESS);
            }
        },
        Err(e) => e.to_string(),
    };

    print_result(
        &WorkflowResult::rejected(&submission.workflow_id, total_steps, message),
        mode,
    )?;
    Ok(ExitCode::from(2))
}

fn report_valid(workflow_id: &str, order: &[String], mode: OutputMode) -> Result<()> {
    if mode.json {
        let out = json!({
            "workflow_id": workflow_id,
            "valid": true,
            "order": order,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if !mode.quiet {
        println!();
        println!(
            "  {} Workflow '{}' is valid ({} steps)",
            style("*").green().bold(),
            style(workflow_id).cyan(),
            order.len()
        );
        println!("  Order: {}", order.join(" -> "));
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

pub async fn run_graph<R: WorkflowRunRepository + 'static>(
    state: &AppState<R>,
    file: &Path,
    vars: Vec<(String, Value)>,
    mode: OutputMode,
) -> Result<ExitCode> {
    let def = load_graph_file(file)
        .with_context(|| format!("Failed to load graph file {}", file.display()))?;
    let task_nodes = def
        .nodes
        .iter()
        .filter(|n| matches!(n, NodeDefinition::Task { .. }))
        .count();

    let graph = match WorkflowGraph::from_definition(
        &def,
        state.coordinator.router(),
        state.config.default_max_retries,
    ) {
        Ok(graph) => graph,
        Err(e) => {
            print_result(
                &WorkflowResult::rejected(&def.workflow_id, task_nodes, e.to_string()),
                mode,
            )?;
            return Ok(ExitCode::from(2));
        }
    };

    let mut context: HashMap<String, Value> = def.context.clone();
    context.extend(vars);

    let progress = spawn_progress(state.coordinator.event_bus(), mode);
    let interrupt = spawn_interrupt(Arc::clone(&state.coordinator), def.workflow_id.clone());

    let outcome = state.coordinator.execute_graph(&graph, context).await;
    interrupt.abort();

    let run = match outcome {
        Ok(run) => run,
        Err(CoordinatorError::Validation(e)) => {
            progress.abort();
            print_result(
                &WorkflowResult::rejected(&def.workflow_id, task_nodes, e.to_string()),
                mode,
            )?;
            return Ok(ExitCode::from(2));
        }
        Err(e) => {
            progress.abort();
            return Err(e.into());
        }
    };
    let _ = progress.await;

    if mode.json {
        let out = json!({
            "result": run.result,
            "path": run.path,
            "decisions": run.decisions,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if !mode.quiet {
        render_result(&run.result);
        println!("  Path: {}", run.path.join(" -> "));
        for decision in &run.decisions {
            let fallback = if decision.used_fallback {
                format!(" {}", style("(fallback)").yellow())
            } else {
                String::new()
            };
            println!(
                "  Decision {}: '{}' -> {}{}",
                style(&decision.source_node).cyan(),
                decision.criterion_value,
                decision.destination,
                fallback
            );
        }
        println!();
    }

    Ok(exit_code(run.result.status))
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

async fn finish_run(
    outcome: Result<WorkflowResult, CoordinatorError>,
    progress: JoinHandle<()>,
    workflow_id: &str,
    total_steps: usize,
    mode: OutputMode,
) -> Result<ExitCode> {
    let result = match outcome {
        Ok(result) => result,
        Err(CoordinatorError::Validation(e)) => {
            progress.abort();
            WorkflowResult::rejected(workflow_id, total_steps, e.to_string())
        }
        Err(e) => {
            progress.abort();
            return Err(e.into());
        }
    };
    if result.status != WorkflowStatus::ValidationError {
        let _ = progress.await;
    }

    print_result(&result, mode)?;
    Ok(exit_code(result.status))
}

/// 0 for usable results, 1 for failed or cancelled runs, 2 for rejected input.
fn exit_code(status: WorkflowStatus) -> ExitCode {
    match status {
        WorkflowStatus::Success | WorkflowStatus::CompletedWithWarnings => ExitCode::SUCCESS,
        WorkflowStatus::Failed | WorkflowStatus::Cancelled => ExitCode::from(1),
        WorkflowStatus::ValidationError => ExitCode::from(2),
    }
}

/// Print step progress to stderr until the run finishes.
fn spawn_progress(bus: &EventBus, mode: OutputMode) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    let show = mode.show_progress();

    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "progress printer lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let finished = matches!(event, WorkflowEvent::RunFinished { .. });
            if show {
                if let Some(line) = progress_line(&event) {
                    eprintln!("{line}");
                }
            }
            if finished {
                break;
            }
        }
    })
}

fn progress_line(event: &WorkflowEvent) -> Option<String> {
    match event {
        WorkflowEvent::WaveStarted { wave, step_ids, .. } => Some(format!(
            "  {} wave {wave}: {}",
            style(">").cyan(),
            step_ids.join(", ")
        )),
        WorkflowEvent::StepRetrying {
            step_id,
            attempt,
            backoff_ms,
            error,
            ..
        } => Some(format!(
            "  {} {step_id} attempt {attempt} failed ({error}), retrying in {backoff_ms}ms",
            style("~").yellow()
        )),
        WorkflowEvent::StepCompleted {
            step_id,
            duration_ms,
            ..
        } => Some(format!("  {} {step_id} ({duration_ms}ms)", style("+").green())),
        WorkflowEvent::StepFailed { step_id, error, .. } => {
            Some(format!("  {} {step_id}: {error}", style("x").red()))
        }
        WorkflowEvent::DecisionMade {
            node, destination, ..
        } => Some(format!("  {} {node} -> {destination}", style("?").magenta())),
        _ => None,
    }
}

/// Cancel the workflow on Ctrl+C.
fn spawn_interrupt<R: WorkflowRunRepository + 'static>(
    coordinator: Arc<Coordinator<R>>,
    workflow_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("  Cancelling '{workflow_id}' after the current wave...");
            if let Err(e) = coordinator.cancel(&workflow_id) {
                tracing::warn!(workflow_id = workflow_id.as_str(), error = %e, "cancel failed");
            }
        }
    })
}

fn print_result(result: &WorkflowResult, mode: OutputMode) -> Result<()> {
    if mode.json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else if !mode.quiet {
        render_result(result);
        println!();
    }
    Ok(())
}

fn render_result(result: &WorkflowResult) {
    println!();
    println!(
        "  {} {} {}",
        style("Workflow").bold(),
        style(&result.workflow_id).cyan(),
        status_text(result.status)
    );
    if !result.run_id.is_nil() {
        println!("  Run ID: {}", result.run_id);
    }
    println!(
        "  Steps: {} completed, {} failed, {} not attempted (of {})",
        result.completed_steps, result.failed_steps, result.not_attempted_steps, result.total_steps
    );
    println!("  Time: {:.3}s", result.execution_time);
    if let Some(ref err) = result.error {
        println!("  Error: {}", style(err).red());
    }

    if result.results.is_empty() {
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Wave"),
            Cell::new("Attempts"),
            Cell::new("Duration"),
            Cell::new("Result / Error"),
        ]);

    for step in &result.results {
        let detail = match (&step.error, &step.result) {
            (Some(err), _) => err.clone(),
            (None, Some(value)) => truncate(&value.to_string(), 60),
            (None, None) => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(&step.step_id),
            step_status_cell(step.status),
            Cell::new(step.wave.map_or_else(|| "-".to_string(), |w| w.to_string())),
            Cell::new(step.attempts),
            Cell::new(
                step.duration_ms
                    .map_or_else(|| "-".to_string(), |ms| format!("{ms}ms")),
            ),
            Cell::new(detail),
        ]);
    }

    println!();
    println!("{table}");
}

pub(crate) fn status_text(status: WorkflowStatus) -> String {
    let text = status.to_string();
    match status {
        WorkflowStatus::Success => style(text).green().to_string(),
        WorkflowStatus::CompletedWithWarnings => style(text).yellow().to_string(),
        WorkflowStatus::Failed => style(text).red().to_string(),
        WorkflowStatus::Cancelled => style(text).dim().to_string(),
        WorkflowStatus::ValidationError => style(text).magenta().to_string(),
    }
}

pub(crate) fn status_cell(status: WorkflowStatus) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        WorkflowStatus::Success => cell.fg(Color::Green),
        WorkflowStatus::CompletedWithWarnings => cell.fg(Color::Yellow),
        WorkflowStatus::Failed => cell.fg(Color::Red),
        WorkflowStatus::Cancelled => cell.fg(Color::DarkGrey),
        WorkflowStatus::ValidationError => cell.fg(Color::Magenta),
    }
}

fn step_status_cell(status: StepStatus) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        StepStatus::Completed => cell.fg(Color::Green),
        StepStatus::Failed => cell.fg(Color::Red),
        StepStatus::NotAttempted => cell.fg(Color::DarkGrey),
        StepStatus::Pending | StepStatus::Executing => cell,
    }
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepweave_types::config::OrchestratorConfig;

    const QUIET: OutputMode = OutputMode {
        json: false,
        quiet: true,
    };

    fn state() -> (tempfile::TempDir, AppState<stepweave_core::repository::InMemoryWorkflowRunRepository>) {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig {
            backoff_unit_ms: 1,
            ..Default::default()
        };
        let state = AppState::ephemeral(config);
        (dir, state)
    }

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(WorkflowStatus::Success), ExitCode::SUCCESS);
        assert_eq!(exit_code(WorkflowStatus::CompletedWithWarnings), ExitCode::SUCCESS);
        assert_eq!(exit_code(WorkflowStatus::Failed), ExitCode::from(1));
        assert_eq!(exit_code(WorkflowStatus::ValidationError), ExitCode::from(2));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }

    #[tokio::test]
    async fn test_run_echo_workflow_records_history() {
        let (dir, state) = state();
        let file = write(
            &dir,
            "wf.yaml",
            r#"
workflow_id: greet
steps:
  - id: hello
    action: {type: echo, value: {name: "${who}"}}
    variables: {name: result.name}
  - id: shout
    depends_on: [hello]
    action: {type: echo, value: "hi ${name}"}
"#,
        );

        let code = run_workflow(&state, &file, vec![("who".to_string(), json!("ops"))], QUIET)
            .await
            .unwrap();
        assert_eq!(code, ExitCode::SUCCESS);

        let runs = state.repo().list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].workflow_id, "greet");
        assert_eq!(runs[0].completed_steps, 2);
    }

    #[tokio::test]
    async fn test_run_reports_failed_run() {
        let (dir, state) = state();
        let file = write(
            &dir,
            "wf.json",
            r#"{"workflow_id": "broken", "steps": [
                {"id": "a", "critical": true, "action": {"type": "shell", "command": "exit 4"}},
                {"id": "b", "depends_on": ["a"], "action": {"type": "echo", "value": 1}}
            ]}"#,
        );

        let code = run_workflow(&state, &file, Vec::new(), QUIET).await.unwrap();
        assert_eq!(code, ExitCode::from(1));
    }

    #[tokio::test]
    async fn test_run_rejects_unknown_dependency() {
        let (dir, state) = state();
        let file = write(
            &dir,
            "wf.yaml",
            "workflow_id: bad\nsteps:\n  - {id: a, depends_on: [ghost], action: {type: echo}}\n",
        );

        let code = run_workflow(&state, &file, Vec::new(), QUIET).await.unwrap();
        assert_eq!(code, ExitCode::from(2));
        assert!(state.repo().list_runs(10).await.unwrap().is_empty());
    }

    #[test]
    fn test_validate_detects_cycle() {
        let (dir, state) = state();
        let file = write(
            &dir,
            "wf.yaml",
            r#"
workflow_id: loop
steps:
  - {id: a, depends_on: [b], action: {type: echo}}
  - {id: b, depends_on: [a], action: {type: echo}}
"#,
        );
        assert_eq!(validate_workflow(&state, &file, QUIET).unwrap(), ExitCode::from(2));

        let ok = write(
            &dir,
            "ok.yaml",
            "workflow_id: fine\nsteps:\n  - {id: a, action: {type: echo}}\n",
        );
        assert_eq!(validate_workflow(&state, &ok, QUIET).unwrap(), ExitCode::SUCCESS);
    }

    #[tokio::test]
    async fn test_graph_routes_on_context() {
        let (dir, state) = state();
        let file = write(
            &dir,
            "graph.yaml",
            r#"
workflow_id: triage
entry: classify
nodes:
  - id: classify
    kind: task
    action: {type: echo, value: {label: "${label}"}}
    variables: {label_out: result.label}
    next: route
  - id: route
    kind: decision
    sources:
      - {type: state_path, value: variables.label_out}
    destinations: {urgent: page, normal: ticket}
    fallback: ticket
  - {id: page, kind: task, action: {type: echo, value: paged}}
  - {id: ticket, kind: task, action: {type: echo, value: filed}}
"#,
        );

        let code = run_graph(&state, &file, vec![("label".to_string(), json!("urgent"))], QUIET)
            .await
            .unwrap();
        assert_eq!(code, ExitCode::SUCCESS);

        let decisions = state.repo().list_decisions(Some("triage"), 10).await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].destination, "page");
        assert!(!decisions[0].used_fallback);
    }

    #[tokio::test]
    async fn test_resume_rejects_other_workflow_file() {
        let (dir, state) = state();
        let steps = r#"[{"id": "a", "critical": true, "action": {"type": "shell", "command": "exit 3"}}]"#;
        let original = write(
            &dir,
            "billing.json",
            &format!(r#"{{"workflow_id": "billing", "steps": {steps}}}"#),
        );
        let other = write(
            &dir,
            "shipping.json",
            &format!(r#"{{"workflow_id": "shipping", "steps": {steps}}}"#),
        );

        assert_eq!(
            run_workflow(&state, &original, Vec::new(), QUIET).await.unwrap(),
            ExitCode::from(1)
        );
        let run_id = state.repo().list_runs(1).await.unwrap()[0].run_id;

        let code = resume_workflow(&state, run_id, &other, QUIET).await.unwrap();
        assert_eq!(code, ExitCode::from(2));
        let runs = state.repo().list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].workflow_id, "billing");
    }

    #[tokio::test]
    async fn test_resume_unknown_run_errors() {
        let (dir, state) = state();
        let file = write(
            &dir,
            "wf.yaml",
            "workflow_id: w\nsteps:\n  - {id: a, action: {type: echo}}\n",
        );
        let err = resume_workflow(&state, uuid::Uuid::now_v7(), &file, QUIET)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No checkpoint found"));
    }
}
