//! SQLite workflow run repository implementation.
//!
//! Implements `WorkflowRunRepository` from `stepweave-core` using sqlx with
//! split read/write pools. Checkpoints are upserted per run, run summaries are
//! replaced per run (a resumed run keeps its id), and decision records are
//! append-only.

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use stepweave_core::repository::workflow::WorkflowRunRepository;
use stepweave_types::decision::DecisionRecord;
use stepweave_types::error::RepositoryError;
use stepweave_types::history::{RunCheckpoint, WorkflowRunSummary};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowRunRepository`.
pub struct SqliteWorkflowRunRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRunRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct CheckpointRow {
    run_id: String,
    workflow_id: String,
    status: String,
    step_ids: String,
    completed: String,
    failed: String,
    context: String,
    updated_at: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            run_id: row.try_get("run_id")?,
            workflow_id: row.try_get("workflow_id")?,
            status: row.try_get("status")?,
            step_ids: row.try_get("step_ids")?,
            completed: row.try_get("completed")?,
            failed: row.try_get("failed")?,
            context: row.try_get("context")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_checkpoint(self) -> Result<RunCheckpoint, RepositoryError> {
        Ok(RunCheckpoint {
            run_id: parse_uuid(&self.run_id)?,
            workflow_id: self.workflow_id,
            status: parse_enum(&self.status, "checkpoint status")?,
            step_ids: parse_json(&self.step_ids, "step ids")?,
            completed: parse_json(&self.completed, "completed steps")?,
            failed: parse_json(&self.failed, "failed steps")?,
            context: parse_json(&self.context, "context")?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct RunRow {
    run_id: String,
    workflow_id: String,
    status: String,
    completed_steps: i64,
    failed_steps: i64,
    not_attempted_steps: i64,
    total_steps: i64,
    duration_ms: i64,
    decisions: i64,
    started_at: String,
    finished_at: String,
    error: Option<String>,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            run_id: row.try_get("run_id")?,
            workflow_id: row.try_get("workflow_id")?,
            status: row.try_get("status")?,
            completed_steps: row.try_get("completed_steps")?,
            failed_steps: row.try_get("failed_steps")?,
            not_attempted_steps: row.try_get("not_attempted_steps")?,
            total_steps: row.try_get("total_steps")?,
            duration_ms: row.try_get("duration_ms")?,
            decisions: row.try_get("decisions")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            error: row.try_get("error")?,
        })
    }

    fn into_summary(self) -> Result<WorkflowRunSummary, RepositoryError> {
        Ok(WorkflowRunSummary {
            run_id: parse_uuid(&self.run_id)?,
            workflow_id: self.workflow_id,
            status: parse_enum(&self.status, "run status")?,
            completed_steps: self.completed_steps.max(0) as usize,
            failed_steps: self.failed_steps.max(0) as usize,
            not_attempted_steps: self.not_attempted_steps.max(0) as usize,
            total_steps: self.total_steps.max(0) as usize,
            duration_ms: self.duration_ms.max(0) as u64,
            decisions: self.decisions.max(0) as usize,
            started_at: parse_datetime(&self.started_at)?,
            finished_at: parse_datetime(&self.finished_at)?,
            error: self.error,
        })
    }
}

struct DecisionRow {
    decision_id: String,
    workflow_id: String,
    source_node: String,
    timestamp: String,
    considered_options: String,
    selected_option: String,
    destination: String,
    criterion_value: String,
    source: Option<String>,
    used_fallback: bool,
    context_snapshot: String,
}

impl DecisionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            decision_id: row.try_get("decision_id")?,
            workflow_id: row.try_get("workflow_id")?,
            source_node: row.try_get("source_node")?,
            timestamp: row.try_get("timestamp")?,
            considered_options: row.try_get("considered_options")?,
            selected_option: row.try_get("selected_option")?,
            destination: row.try_get("destination")?,
            criterion_value: row.try_get("criterion_value")?,
            source: row.try_get("source")?,
            used_fallback: row.try_get("used_fallback")?,
            context_snapshot: row.try_get("context_snapshot")?,
        })
    }

    fn into_record(self) -> Result<DecisionRecord, RepositoryError> {
        Ok(DecisionRecord {
            decision_id: parse_uuid(&self.decision_id)?,
            workflow_id: self.workflow_id,
            source_node: self.source_node,
            timestamp: parse_datetime(&self.timestamp)?,
            considered_options: parse_json(&self.considered_options, "considered options")?,
            selected_option: self.selected_option,
            destination: self.destination,
            criterion_value: self.criterion_value,
            source: self.source,
            used_fallback: self.used_fallback,
            context_snapshot: parse_json(&self.context_snapshot, "context snapshot")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_json<T: DeserializeOwned>(s: &str, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {what} JSON: {e}")))
}

fn to_json<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|e| RepositoryError::Query(format!("serialize {what}: {e}")))
}

/// Snake-case status enums are stored as their bare serde name.
fn enum_text<T: Serialize>(value: &T) -> Result<String, RepositoryError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(other) => Err(RepositoryError::Query(format!("unexpected status encoding: {other}"))),
        Err(e) => Err(RepositoryError::Query(format!("serialize status: {e}"))),
    }
}

fn parse_enum<T: DeserializeOwned>(s: &str, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| RepositoryError::Query(format!("invalid {what}: {s}")))
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

// ---------------------------------------------------------------------------
// WorkflowRunRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRunRepository for SqliteWorkflowRunRepository {
    async fn save_checkpoint(&self, checkpoint: &RunCheckpoint) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_checkpoints (run_id, workflow_id, status, step_ids, completed, failed, context, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(run_id) DO UPDATE SET
                 workflow_id = excluded.workflow_id,
                 status = excluded.status,
                 step_ids = excluded.step_ids,
                 completed = excluded.completed,
                 failed = excluded.failed,
                 context = excluded.context,
                 updated_at = excluded.updated_at"#,
        )
        .bind(checkpoint.run_id.to_string())
        .bind(&checkpoint.workflow_id)
        .bind(enum_text(&checkpoint.status)?)
        .bind(to_json(&checkpoint.step_ids, "step ids")?)
        .bind(to_json(&checkpoint.completed, "completed steps")?)
        .bind(to_json(&checkpoint.failed, "failed steps")?)
        .bind(to_json(&checkpoint.context, "context")?)
        .bind(format_datetime(&checkpoint.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn load_checkpoint(&self, run_id: &Uuid) -> Result<Option<RunCheckpoint>, RepositoryError> {
        let row = sqlx::query(
            "SELECT run_id, workflow_id, status, step_ids, completed, failed, context, updated_at FROM workflow_checkpoints WHERE run_id = ?",
        )
        .bind(run_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => {
                let r = CheckpointRow::from_row(&row).map_err(query_error)?;
                Ok(Some(r.into_checkpoint()?))
            }
            None => Ok(None),
        }
    }

    async fn record_run(&self, summary: &WorkflowRunSummary) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT OR REPLACE INTO workflow_runs
                 (run_id, workflow_id, status, completed_steps, failed_steps, not_attempted_steps,
                  total_steps, duration_ms, decisions, started_at, finished_at, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(summary.run_id.to_string())
        .bind(&summary.workflow_id)
        .bind(enum_text(&summary.status)?)
        .bind(summary.completed_steps as i64)
        .bind(summary.failed_steps as i64)
        .bind(summary.not_attempted_steps as i64)
        .bind(summary.total_steps as i64)
        .bind(i64::try_from(summary.duration_ms).unwrap_or(i64::MAX))
        .bind(summary.decisions as i64)
        .bind(format_datetime(&summary.started_at))
        .bind(format_datetime(&summary.finished_at))
        .bind(&summary.error)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn list_runs(&self, limit: u32) -> Result<Vec<WorkflowRunSummary>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT run_id, workflow_id, status, completed_steps, failed_steps, not_attempted_steps,
                      total_steps, duration_ms, decisions, started_at, finished_at, error
               FROM workflow_runs
               ORDER BY finished_at DESC, run_id DESC
               LIMIT ?"#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| RunRow::from_row(row).map_err(query_error)?.into_summary())
            .collect()
    }

    async fn record_decision(&self, record: &DecisionRecord) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"INSERT INTO workflow_decisions
                 (decision_id, workflow_id, source_node, timestamp, considered_options, selected_option,
                  destination, criterion_value, source, used_fallback, context_snapshot)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.decision_id.to_string())
        .bind(&record.workflow_id)
        .bind(&record.source_node)
        .bind(format_datetime(&record.timestamp))
        .bind(to_json(&record.considered_options, "considered options")?)
        .bind(&record.selected_option)
        .bind(&record.destination)
        .bind(&record.criterion_value)
        .bind(&record.source)
        .bind(record.used_fallback)
        .bind(to_json(&record.context_snapshot, "context snapshot")?)
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                RepositoryError::Conflict(format!("decision '{}' already recorded", record.decision_id)),
            ),
            Err(e) => Err(query_error(e)),
        }
    }

    async fn list_decisions(
        &self,
        workflow_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DecisionRecord>, RepositoryError> {
        let rows = match workflow_id {
            Some(workflow_id) => {
                sqlx::query(
                    r#"SELECT * FROM workflow_decisions
                       WHERE workflow_id = ?
                       ORDER BY timestamp DESC, decision_id DESC
                       LIMIT ?"#,
                )
                .bind(workflow_id)
                .bind(i64::from(limit))
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(
                    r#"SELECT * FROM workflow_decisions
                       ORDER BY timestamp DESC, decision_id DESC
                       LIMIT ?"#,
                )
                .bind(i64::from(limit))
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(query_error)?;

        rows.iter()
            .map(|row| DecisionRow::from_row(row).map_err(query_error)?.into_record())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepweave_types::result::WorkflowStatus;
    use stepweave_types::step::PlanStatus;

    async fn repo() -> (tempfile::TempDir, SqliteWorkflowRunRepository) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("runs.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (dir, SqliteWorkflowRunRepository::new(pool))
    }

    fn summary(workflow_id: &str, status: WorkflowStatus, finished_secs: i64) -> WorkflowRunSummary {
        let finished_at = DateTime::from_timestamp(1_700_000_000 + finished_secs, 0).unwrap();
        WorkflowRunSummary {
            run_id: Uuid::now_v7(),
            workflow_id: workflow_id.to_string(),
            status,
            completed_steps: 3,
            failed_steps: 1,
            not_attempted_steps: 1,
            total_steps: 5,
            duration_ms: 420,
            decisions: 2,
            started_at: finished_at,
            finished_at,
            error: Some("critical step 'x' failed".to_string()),
        }
    }

    fn decision(workflow_id: &str, secs: i64) -> DecisionRecord {
        DecisionRecord {
            decision_id: Uuid::now_v7(),
            workflow_id: workflow_id.to_string(),
            source_node: "route".to_string(),
            timestamp: DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
            considered_options: vec!["normal".to_string(), "urgent".to_string()],
            selected_option: "urgent".to_string(),
            destination: "page".to_string(),
            criterion_value: "urgent".to_string(),
            source: Some("path:variables.label".to_string()),
            used_fallback: false,
            context_snapshot: json!({"variables": {"label": "urgent"}}),
        }
    }

    #[tokio::test]
    async fn test_checkpoint_upsert_and_load() {
        let (_dir, repo) = repo().await;
        let mut checkpoint = RunCheckpoint {
            run_id: Uuid::now_v7(),
            workflow_id: "etl".to_string(),
            status: PlanStatus::Executing,
            step_ids: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            completed: vec!["a".to_string()],
            failed: vec![],
            context: json!({"global_variables": {"n": 1}}),
            updated_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        repo.save_checkpoint(&checkpoint).await.unwrap();

        checkpoint.status = PlanStatus::CompletedWithWarnings;
        checkpoint.completed.push("b".to_string());
        checkpoint.failed.push("c".to_string());
        repo.save_checkpoint(&checkpoint).await.unwrap();

        let loaded = repo.load_checkpoint(&checkpoint.run_id).await.unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
        assert!(repo.load_checkpoint(&Uuid::nil()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_runs_replaced_and_listed_newest_first() {
        let (_dir, repo) = repo().await;
        let older = summary("etl", WorkflowStatus::Failed, 0);
        let newer = summary("etl", WorkflowStatus::Success, 10);
        repo.record_run(&older).await.unwrap();
        repo.record_run(&newer).await.unwrap();

        let mut resumed = older.clone();
        resumed.status = WorkflowStatus::Success;
        resumed.error = None;
        resumed.finished_at = DateTime::from_timestamp(1_700_000_020, 0).unwrap();
        repo.record_run(&resumed).await.unwrap();

        let runs = repo.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0], resumed);
        assert_eq!(runs[1], newer);

        assert_eq!(repo.list_runs(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_decisions_filtered_and_duplicates_rejected() {
        let (_dir, repo) = repo().await;
        let first = decision("triage", 0);
        let second = decision("triage", 5);
        let other = decision("billing", 3);
        for record in [&first, &second, &other] {
            repo.record_decision(record).await.unwrap();
        }

        let all = repo.list_decisions(None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], second);

        let triage = repo.list_decisions(Some("triage"), 10).await.unwrap();
        assert_eq!(triage, vec![second, first.clone()]);

        let err = repo.record_decision(&first).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }
}
