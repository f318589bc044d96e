//! Command execution boundary between the coordinator and step executors.
//!
//! The coordinator only sees `CommandExecutor`: a resolved action payload
//! goes in, a JSON result or a `CommandError` comes out. `HandlerRegistry` is
//! the standard executor, dispatching on the action's `"type"` field to
//! explicitly registered `CommandHandler`s.
//!
//! `CommandHandler` uses native async fn in traits. `CommandHandlerDyn` is its
//! object-safe twin with boxed futures, blanket-implemented for every handler,
//! so the registry can store heterogeneous handlers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// Boxed, sendable future used at the object-safe boundaries.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by command execution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The handler ran and reported a failure.
    #[error("command failed: {0}")]
    Failed(String),

    /// No handler is registered for the action's type.
    #[error("unknown command type '{0}'")]
    UnknownCommand(String),

    /// The action payload is malformed for its handler.
    #[error("invalid command payload: {0}")]
    InvalidPayload(String),

    /// The attempt exceeded its timeout.
    #[error("command timed out after {0}s")]
    TimedOut(u64),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Executes resolved step actions. Implementations must be cheap to share
/// across concurrently running steps.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, action: Value) -> BoxFuture<'_, Result<Value, CommandError>>;
}

/// A handler for one command type.
pub trait CommandHandler: Send + Sync {
    /// The `"type"` value this handler serves.
    fn command_type(&self) -> &str;

    fn handle(&self, action: Value) -> impl Future<Output = Result<Value, CommandError>> + Send;
}

/// Object-safe version of [`CommandHandler`].
pub trait CommandHandlerDyn: Send + Sync {
    fn command_type(&self) -> &str;

    fn handle_boxed(&self, action: Value) -> BoxFuture<'_, Result<Value, CommandError>>;
}

impl<T: CommandHandler> CommandHandlerDyn for T {
    fn command_type(&self) -> &str {
        CommandHandler::command_type(self)
    }

    fn handle_boxed(&self, action: Value) -> BoxFuture<'_, Result<Value, CommandError>> {
        Box::pin(self.handle(action))
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Explicit registry of command handlers keyed by command type.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandlerDyn>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A later registration for the same type replaces
    /// the earlier one.
    pub fn register<H: CommandHandler + 'static>(&mut self, handler: H) {
        let command_type = CommandHandler::command_type(&handler).to_string();
        if self.handlers.contains_key(&command_type) {
            tracing::warn!(command_type = command_type.as_str(), "replacing registered command handler");
        }
        tracing::debug!(command_type = command_type.as_str(), "registered command handler");
        self.handlers.insert(command_type, Arc::new(handler));
    }

    /// Builder-style registration.
    pub fn with_handler<H: CommandHandler + 'static>(mut self, handler: H) -> Self {
        self.register(handler);
        self
    }

    pub fn contains(&self, command_type: &str) -> bool {
        self.handlers.contains_key(command_type)
    }

    /// Registered command types, sorted.
    pub fn command_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("command_types", &self.command_types())
            .finish()
    }
}

impl CommandExecutor for HandlerRegistry {
    fn execute(&self, action: Value) -> BoxFuture<'_, Result<Value, CommandError>> {
        let handler = match action.get("type").and_then(Value::as_str) {
            Some(command_type) => match self.handlers.get(command_type) {
                Some(handler) => Arc::clone(handler),
                None => {
                    let err = CommandError::UnknownCommand(command_type.to_string());
                    return Box::pin(async move { Err::<Value, _>(err) });
                }
            },
            None => {
                return Box::pin(async {
                    Err::<Value, _>(CommandError::InvalidPayload(
                        "action has no string \"type\" field".to_string(),
                    ))
                });
            }
        };

        Box::pin(async move { handler.handle_boxed(action).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
