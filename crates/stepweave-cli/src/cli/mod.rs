//! CLI command definitions and dispatch for the `sweave` binary.
//!
//! Uses clap derive macros for argument parsing. Workflow files are YAML or
//! JSON; see `stepweave_core::workflow::definition` for their shape.

pub mod history;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

/// Run dependency-ordered workflows and inspect their history.
#[derive(Parser)]
#[command(name = "sweave", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Keep checkpoints and history in memory only.
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Data directory (defaults to $STEPWEAVE_DATA_DIR or ~/.stepweave).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a step-list workflow file.
    Run {
        /// Path to the workflow YAML/JSON file.
        file: PathBuf,

        /// Extra caller context as key=value (value parsed as JSON when valid).
        #[arg(long = "set", value_parser = parse_key_val)]
        vars: Vec<(String, Value)>,
    },

    /// Check a workflow file without running it.
    Validate {
        /// Path to the workflow YAML/JSON file.
        file: PathBuf,
    },

    /// Continue a run from its last checkpoint.
    Resume {
        /// Run id printed by `sweave run`.
        run_id: uuid::Uuid,

        /// The workflow file the run was started from.
        file: PathBuf,
    },

    /// Run a node graph workflow (tasks plus decision nodes).
    Graph {
        /// Path to the graph YAML/JSON file.
        file: PathBuf,

        /// Extra caller context as key=value (value parsed as JSON when valid).
        #[arg(long = "set", value_parser = parse_key_val)]
        vars: Vec<(String, Value)>,
    },

    /// List recent runs.
    #[command(alias = "ls")]
    History {
        /// Maximum number of runs to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Aggregate statistics over recorded runs and decisions.
    Stats,

    /// List recorded routing decisions.
    Decisions {
        /// Only decisions of this workflow.
        #[arg(long)]
        workflow: Option<String>,

        /// Maximum number of decisions to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

/// Parse `key=value`. The value is JSON when it parses as JSON, else a string.
pub fn parse_key_val(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }

    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}
