//! Shared domain types for Stepweave.
//!
//! This crate contains the data model used across the orchestrator: steps and
//! their runtime status, workflow results, decision records, run history
//! entries, checkpoints, lifecycle events, and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod decision;
pub mod error;
pub mod event;
pub mod history;
pub mod result;
pub mod step;
