//! Built-in command handlers.
//!
//! Each handler serves one action `"type"`. `default_registry` wires all of
//! them into a `HandlerRegistry`, which is what the CLI hands to the
//! coordinator as its command executor.

pub mod echo;
pub mod shell;
pub mod sleep;

use stepweave_core::workflow::HandlerRegistry;

pub use echo::EchoHandler;
pub use shell::ShellHandler;
pub use sleep::SleepHandler;

/// Registry with every built-in handler registered.
pub fn default_registry() -> HandlerRegistry {
    HandlerRegistry::new()
        .with_handler(EchoHandler)
        .with_handler(ShellHandler::new())
        .with_handler(SleepHandler)
}
