//! `shell` handler: runs a command line through `sh -c`.
//!
//! Action fields:
//! - `command` (required): the command line.
//! - `stdin` (optional): text written to the child's stdin.
//! - `cwd` (optional): working directory.
//! - `json` (optional, default false): parse stdout as JSON into `output`.
//!
//! Returns `{"stdout", "stderr", "exit_code"}` (plus `output` when `json` is
//! set). A non-zero exit is a `CommandError::Failed` carrying stderr. The
//! child is killed if the attempt future is dropped (timeout or cancel).

use std::process::Stdio;

use serde_json::{Value, json};
use stepweave_core::workflow::{CommandError, CommandHandler};
use tokio::io::AsyncWriteExt;

/// Shell interpreter used for `command`.
const DEFAULT_SHELL: &str = "sh";

pub struct ShellHandler {
    shell: String,
}

impl ShellHandler {
    pub fn new() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
        }
    }

    /// Use a different interpreter (it must accept `-c <command>`).
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }
}

impl Default for ShellHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandHandler for ShellHandler {
    fn command_type(&self) -> &str {
        "shell"
    }

    async fn handle(&self, action: Value) -> Result<Value, CommandError> {
        let command = action
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| CommandError::InvalidPayload("shell requires string \"command\"".to_string()))?;
        let stdin_text = action.get("stdin").and_then(Value::as_str);
        let parse_json = action.get("json").and_then(Value::as_bool).unwrap_or(false);

        let mut cmd = tokio::process::Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(if stdin_text.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = action.get("cwd").and_then(Value::as_str) {
            cmd.current_dir(cwd);
        }

        tracing::debug!(command, "spawning shell command");

        let mut child = cmd
            .spawn()
            .map_err(|e| CommandError::Failed(format!("failed to spawn {}: {e}", self.shell)))?;

        // Stdin is written while stdout and stderr drain.
        let pipe = child.stdin.take();
        let feed = async move {
            match (pipe, stdin_text) {
                // The pipe is dropped after the write, closing the child's stdin.
                (Some(mut pipe), Some(text)) => pipe.write_all(text.as_bytes()).await,
                _ => Ok(()),
            }
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output =
            output.map_err(|e| CommandError::Failed(format!("failed to wait for command: {e}")))?;
        match fed {
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                return Err(CommandError::Failed(format!("failed to write stdin: {e}")));
            }
            _ => {}
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(CommandError::Failed(format!("exit status {code}: {stderr}")));
        }

        let mut result = json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": output.status.code().unwrap_or(0),
        });
        if parse_json {
            let parsed: Value = serde_json::from_str(&stdout)
                .map_err(|e| CommandError::Failed(format!("stdout is not valid JSON: {e}")))?;
            result["output"] = parsed;
        }

        Ok(result)
    }
}
