//! Append-only execution history of run summaries and decision records.
//!
//! Shared by every run of a coordinator (and by its decision router). Appends
//! are serialized behind a mutex; the oldest entries are evicted once a log
//! reaches its capacity.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use stepweave_types::decision::DecisionRecord;
use stepweave_types::history::{ExecutionStats, WorkflowRunSummary};
use stepweave_types::result::WorkflowStatus;

#[derive(Debug, Default)]
struct HistoryLog {
    runs: VecDeque<WorkflowRunSummary>,
    decisions: VecDeque<DecisionRecord>,
    /// Same records as `decisions`, grouped by workflow id. Evicted together.
    decisions_by_workflow: HashMap<String, VecDeque<DecisionRecord>>,
}

impl HistoryLog {
    fn evict_oldest_decision(&mut self) {
        let Some(evicted) = self.decisions.pop_front() else {
            return;
        };
        let emptied = match self.decisions_by_workflow.get_mut(&evicted.workflow_id) {
            Some(entries) => {
                entries.pop_front();
                entries.is_empty()
            }
            None => false,
        };
        if emptied {
            self.decisions_by_workflow.remove(&evicted.workflow_id);
        }
    }
}

/// Bounded in-memory history, safe for concurrent appends.
#[derive(Debug)]
pub struct ExecutionHistory {
    capacity: usize,
    log: Mutex<HistoryLog>,
}

impl ExecutionHistory {
    /// Create a history keeping at most `capacity` entries per log.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            log: Mutex::new(HistoryLog::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, HistoryLog> {
        // Entries are only ever pushed whole, so a poisoned log is still valid.
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a finished run.
    pub fn record_run(&self, summary: WorkflowRunSummary) {
        let mut log = self.lock();
        push_bounded(&mut log.runs, summary, self.capacity);
    }

    /// Append a decision to the global and per-workflow logs.
    pub fn record_decision(&self, record: DecisionRecord) {
        let mut log = self.lock();
        while log.decisions.len() >= self.capacity {
            log.evict_oldest_decision();
        }
        log.decisions_by_workflow
            .entry(record.workflow_id.clone())
            .or_default()
            .push_back(record.clone());
        log.decisions.push_back(record);
    }

    /// Retained runs, oldest first.
    pub fn runs(&self) -> Vec<WorkflowRunSummary> {
        self.lock().runs.iter().cloned().collect()
    }

    /// Retained decisions, oldest first. `None` returns the global log.
    pub fn decisions(&self, workflow_id: Option<&str>) -> Vec<DecisionRecord> {
        let log = self.lock();
        match workflow_id {
            Some(id) => log
                .decisions_by_workflow
                .get(id)
                .map(|d| d.iter().cloned().collect())
                .unwrap_or_default(),
            None => log.decisions.iter().cloned().collect(),
        }
    }

    /// Aggregate statistics over the retained entries.
    pub fn stats(&self) -> ExecutionStats {
        let log = self.lock();
        let mut stats = ExecutionStats {
            total_runs: log.runs.len(),
            total_decisions: log.decisions.len(),
            ..Default::default()
        };

        let mut total_duration: u128 = 0;
        for run in &log.runs {
            match run.status {
                WorkflowStatus::Success => stats.successful_runs += 1,
                WorkflowStatus::CompletedWithWarnings => stats.runs_with_warnings += 1,
                WorkflowStatus::Failed | WorkflowStatus::ValidationError => stats.failed_runs += 1,
                WorkflowStatus::Cancelled => stats.cancelled_runs += 1,
            }
            stats.total_steps_completed += run.completed_steps;
            stats.total_steps_failed += run.failed_steps;
            total_duration += u128::from(run.duration_ms);
        }
        if stats.total_runs > 0 {
            stats.average_duration_ms = total_duration as f64 / stats.total_runs as f64;
        }

        for decision in &log.decisions {
            if decision.used_fallback {
                stats.fallback_decisions += 1;
            }
            *stats
                .destination_counts
                .entry(decision.destination.clone())
                .or_default() += 1;
        }

        stats
    }
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::new(1000)
    }
}

fn push_bounded<T>(log: &mut VecDeque<T>, entry: T, capacity: usize) {
    while log.len() >= capacity {
        log.pop_front();
    }
    log.push_back(entry);
}
