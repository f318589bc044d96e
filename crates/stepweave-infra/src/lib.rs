//! Infrastructure layer for Stepweave.
//!
//! Implements the ports defined in `stepweave-core`: SQLite persistence for
//! run checkpoints, summaries and decision records, the built-in command
//! handlers, and the `config.toml` loader.

pub mod config;
pub mod handler;
pub mod sqlite;
