//! Run history subcommands: history, stats and decisions.
//!
//! Reads archived run summaries and decision records from the run repository.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use stepweave_core::repository::WorkflowRunRepository;
use stepweave_core::workflow::ExecutionHistory;
use stepweave_types::history::ExecutionStats;

use super::workflow::{status_cell, truncate};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

pub async fn list_runs<R: WorkflowRunRepository>(
    state: &AppState<R>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let runs = state
        .repo()
        .list_runs(limit)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list runs: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!();
        println!("  No runs recorded yet.");
        println!("  Start one with: {}", style("sweave run <file.yaml>").dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Run ID").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Status"),
            Cell::new("Steps"),
            Cell::new("Duration"),
            Cell::new("Finished"),
        ]);

    for run in &runs {
        table.add_row(vec![
            Cell::new(run.run_id.to_string()),
            Cell::new(&run.workflow_id),
            status_cell(run.status),
            Cell::new(format!(
                "{}/{} ({} failed)",
                run.completed_steps, run.total_steps, run.failed_steps
            )),
            Cell::new(format!("{}ms", run.duration_ms)),
            Cell::new(run.finished_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Aggregate the retained runs and decisions (bounded by `history_capacity`).
pub async fn collect_stats<R: WorkflowRunRepository>(state: &AppState<R>) -> Result<ExecutionStats> {
    let capacity = state.config.history_capacity;
    let limit = u32::try_from(capacity).unwrap_or(u32::MAX);

    let runs = state
        .repo()
        .list_runs(limit)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list runs: {e}"))?;
    let decisions = state
        .repo()
        .list_decisions(None, limit)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list decisions: {e}"))?;

    let history = ExecutionHistory::new(capacity);
    for run in runs.into_iter().rev() {
        history.record_run(run);
    }
    for decision in decisions.into_iter().rev() {
        history.record_decision(decision);
    }

    Ok(history.stats())
}

pub async fn show_stats<R: WorkflowRunRepository>(state: &AppState<R>, json: bool) -> Result<()> {
    let stats = collect_stats(state).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!();
    println!("  {}", style("Runs").bold());
    println!("    Total:         {}", stats.total_runs);
    println!("    Success:       {}", style(stats.successful_runs).green());
    println!("    With warnings: {}", style(stats.runs_with_warnings).yellow());
    println!("    Failed:        {}", style(stats.failed_runs).red());
    println!("    Cancelled:     {}", stats.cancelled_runs);
    println!("    Avg duration:  {:.1}ms", stats.average_duration_ms);
    println!(
        "    Steps:         {} completed, {} failed",
        stats.total_steps_completed, stats.total_steps_failed
    );
    println!();
    println!("  {}", style("Decisions").bold());
    println!("    Total:         {}", stats.total_decisions);
    println!("    Fallbacks:     {}", stats.fallback_decisions);
    for (destination, count) in &stats.destination_counts {
        println!("    -> {destination}: {count}");
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

pub async fn list_decisions<R: WorkflowRunRepository>(
    state: &AppState<R>,
    workflow_id: Option<&str>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let decisions = state
        .repo()
        .list_decisions(workflow_id, limit)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list decisions: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&decisions)?);
        return Ok(());
    }

    if decisions.is_empty() {
        println!();
        println!("  No decisions recorded.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Time").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Node"),
            Cell::new("Key"),
            Cell::new("Destination"),
            Cell::new("Source"),
        ]);

    for d in &decisions {
        let destination = if d.used_fallback {
            Cell::new(format!("{} (fallback)", d.destination)).fg(Color::Yellow)
        } else {
            Cell::new(&d.destination)
        };
        table.add_row(vec![
            Cell::new(d.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(&d.workflow_id),
            Cell::new(&d.source_node),
            Cell::new(truncate(&d.criterion_value, 30)),
            destination,
            Cell::new(d.source.as_deref().unwrap_or("-")),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use stepweave_types::config::OrchestratorConfig;
    use stepweave_types::decision::DecisionRecord;
    use stepweave_types::history::WorkflowRunSummary;
    use stepweave_types::result::WorkflowStatus;
    use uuid::Uuid;

    fn summary(status: WorkflowStatus, duration_ms: u64) -> WorkflowRunSummary {
        WorkflowRunSummary {
            run_id: Uuid::now_v7(),
            workflow_id: "nightly".to_string(),
            status,
            completed_steps: 2,
            failed_steps: 0,
            not_attempted_steps: 0,
            total_steps: 2,
            duration_ms,
            decisions: 0,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            error: None,
        }
    }

    fn decision(destination: &str, used_fallback: bool) -> DecisionRecord {
        DecisionRecord {
            decision_id: Uuid::now_v7(),
            workflow_id: "nightly".to_string(),
            source_node: "route".to_string(),
            timestamp: Utc::now(),
            considered_options: vec!["a".to_string()],
            selected_option: "a".to_string(),
            destination: destination.to_string(),
            criterion_value: "a".to_string(),
            source: None,
            used_fallback,
            context_snapshot: json!({}),
        }
    }

    #[tokio::test]
    async fn test_stats_from_repository() {
        let state = AppState::ephemeral(OrchestratorConfig::default());

        state.repo().record_run(&summary(WorkflowStatus::Success, 100)).await.unwrap();
        state.repo().record_run(&summary(WorkflowStatus::Failed, 300)).await.unwrap();
        state.repo().record_decision(&decision("page", false)).await.unwrap();
        state.repo().record_decision(&decision("ticket", true)).await.unwrap();

        let stats = collect_stats(&state).await.unwrap();
        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.successful_runs, 1);
        assert_eq!(stats.failed_runs, 1);
        assert_eq!(stats.average_duration_ms, 200.0);
        assert_eq!(stats.total_decisions, 2);
        assert_eq!(stats.fallback_decisions, 1);
        assert_eq!(stats.destination_counts.get("ticket"), Some(&1));
    }
}
