//! `sleep` handler: `{"type": "sleep", "ms": 250}` waits and returns
//! `{"slept_ms": 250}`.

use std::time::Duration;

use serde_json::{Value, json};
use stepweave_core::workflow::{CommandError, CommandHandler};

pub struct SleepHandler;

impl CommandHandler for SleepHandler {
    fn command_type(&self) -> &str {
        "sleep"
    }

    async fn handle(&self, action: Value) -> Result<Value, CommandError> {
        let ms = action
            .get("ms")
            .and_then(Value::as_u64)
            .ok_or_else(|| CommandError::InvalidPayload("sleep requires integer \"ms\"".to_string()))?;

        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept_ms": ms }))
    }
}
