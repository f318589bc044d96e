//! Orchestration logic and repository trait definitions for Stepweave.
//!
//! This crate defines the "ports" (command executor, repository) that the
//! infrastructure layer implements, plus the workflow engine itself. It
//! depends only on `stepweave-types` -- never on `stepweave-infra` or any
//! database/IO crate.

pub mod event;
pub mod repository;
pub mod workflow;
