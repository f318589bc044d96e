//! Orchestrator configuration types.
//!
//! `OrchestratorConfig` represents the top-level `config.toml` that controls
//! timeouts, retry pacing, parallelism, and history retention.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the orchestrator.
///
/// Loaded from `~/.stepweave/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hard timeout for a single step attempt, in seconds.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Retry budget applied by definition loaders when a step omits one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Length of one backoff "time unit" in milliseconds. Retry `n` sleeps
    /// `n` units.
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,

    /// Maximum number of steps executing at once within a wave.
    #[serde(default = "default_max_parallel_steps")]
    pub max_parallel_steps: usize,

    /// Maximum node visits in a graph walk before it is declared runaway.
    #[serde(default = "default_max_graph_steps")]
    pub max_graph_steps: u32,

    /// Run summaries and decision records kept in memory.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Broadcast channel capacity of the event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// SQLite URL for run history and checkpoints. Defaults to
    /// `{data_dir}/stepweave.db` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    crate::step::DEFAULT_MAX_RETRIES
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

fn default_max_parallel_steps() -> usize {
    8
}

fn default_max_graph_steps() -> u32 {
    100
}

fn default_history_capacity() -> usize {
    1000
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout_secs(),
            default_max_retries: default_max_retries(),
            backoff_unit_ms: default_backoff_unit_ms(),
            max_parallel_steps: default_max_parallel_steps(),
            max_graph_steps: default_max_graph_steps(),
            history_capacity: default_history_capacity(),
            event_capacity: default_event_capacity(),
            database_url: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}
