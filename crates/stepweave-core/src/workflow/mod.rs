//! Workflow engine core: plans, execution coordination, and decision routing.
//!
//! - `definition` -- YAML/JSON submissions and graph definitions, validation errors
//! - `plan` -- dependency graph, topological order, per-step progress
//! - `context` -- run state: variables, step results, caller context
//! - `resolver` -- `${name}` placeholder resolution in step actions
//! - `retry` -- retry policy and linear backoff
//! - `command` -- command executor boundary and handler registry
//! - `coordinator` -- wave-based parallel execution and graph walks
//! - `decision` -- decision router and single-shot decision instances
//! - `graph` -- node graphs with conditional edges
//! - `expression` -- JEXL evaluator for expression criteria
//! - `history` -- bounded in-memory run and decision history
//! - `checkpoint` -- durable checkpoints for resume

pub mod checkpoint;
pub mod command;
pub mod context;
pub mod coordinator;
pub mod decision;
pub mod definition;
pub mod expression;
pub mod graph;
pub mod history;
pub mod plan;
pub mod resolver;
pub mod retry;

pub use command::{CommandError, CommandExecutor, CommandHandler, HandlerRegistry};
pub use coordinator::{Coordinator, CoordinatorError};
pub use decision::{CognitiveCriteria, DecisionInstance, DecisionNode, DecisionRouter};
pub use definition::WorkflowError;
pub use graph::{GraphBuilder, GraphNode, GraphRunResult, WorkflowGraph};
pub use history::ExecutionHistory;
pub use plan::ExecutionPlan;
