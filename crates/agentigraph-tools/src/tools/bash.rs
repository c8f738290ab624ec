//! Bash tool: shell commands with timeout and cancellation

use crate::registry::{Tool, ToolContext, ToolError, ToolExecutor, ToolResult};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const MAX_OUTPUT_CHARS: usize = 30000;

pub struct BashTool {
    workspace_root: PathBuf,
    default_timeout_secs: u64,
}

impl BashTool {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            workspace_root: workspace_root.as_ref().to_path_buf(),
            default_timeout_secs: 120,
        }
    }
}

impl Tool for BashTool {
    fn name(&self) -> &str { "bash" }

    fn description(&self) -> &str {
        "Execute a bash command. Captures stdout and stderr. \
         Set timeout in seconds (default 120). \
         Include a short description of what the command does."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default 120, max 600)"
                },
                "description": {
                    "type": "string",
                    "description": "Short description of what this command does"
                }
            },
            "required": ["command"]
        })
    }
}

#[async_trait::async_trait]
impl ToolExecutor for BashTool {
    /// Spawns with kill_on_drop and races the child against the run's
    /// cancellation token and the timeout.
    async fn execute(&self, args: Value, ctx: ToolContext) -> Result<ToolResult, ToolError> {
        let command = args["command"]
            .as_str()
            .ok_or_else(|| ToolError::Failed("Missing required parameter: command".into()))?;

        let timeout_secs = args["timeout"]
            .as_u64()
            .unwrap_or(self.default_timeout_secs)
            .min(600);

        match args["description"].as_str() {
            Some(desc) => debug!(description = desc, command, "bash"),
            None => debug!(command = %command.chars().take(80).collect::<String>(), "bash"),
        }

        let child = Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace_root)
            .kill_on_drop(true)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::Failed(format!("Failed to spawn: {}", e)))?;

        // Dropping the wait future drops the child, which kills it.
        tokio::select! {
            result = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output()) => {
                match result {
                    Ok(Ok(output)) => Ok(format_output(&output)),
                    Ok(Err(e)) => Err(ToolError::Failed(format!("Failed to wait: {}", e))),
                    Err(_) => Err(ToolError::Failed(format!("Command timed out after {}s", timeout_secs))),
                }
            }
            _ = ctx.cancel.cancelled() => Ok(ToolResult::text("[process killed by interrupt]")),
        }
    }
}

fn format_output(output: &std::process::Output) -> ToolResult {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    let result = if output.status.success() {
        if stderr.is_empty() {
            stdout.trim().to_string()
        } else {
            format!("{}\n{}", stdout.trim(), stderr.trim())
        }
    } else {
        format!(
            "Exit code: {}\n{}\n{}",
            output.status.code().unwrap_or(-1),
            stdout.trim(),
            stderr.trim()
        )
    };

    if result.is_empty() {
        return ToolResult::text("(no output)");
    }
    let total = result.chars().count();
    if total > MAX_OUTPUT_CHARS {
        let head: String = result.chars().take(MAX_OUTPUT_CHARS).collect();
        ToolResult::text(format!("{}\n... [truncated, {} total chars]", head, total))
    } else {
        ToolResult::text(result)
    }
}
