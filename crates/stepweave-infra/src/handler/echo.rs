//! `echo` handler: returns its payload.
//!
//! `{"type": "echo", "value": <any>}` yields `value`. Without a `value` field
//! the action object itself (minus `type`) is returned, so resolved
//! `${var}` references can be inspected in results.

use serde_json::Value;
use stepweave_core::workflow::{CommandError, CommandHandler};

pub struct EchoHandler;

impl CommandHandler for EchoHandler {
    fn command_type(&self) -> &str {
        "echo"
    }

    async fn handle(&self, action: Value) -> Result<Value, CommandError> {
        let Value::Object(mut fields) = action else {
            return Err(CommandError::InvalidPayload("echo action must be an object".to_string()));
        };

        if let Some(value) = fields.remove("value") {
            return Ok(value);
        }

        fields.remove("type");
        Ok(Value::Object(fields))
    }
}
