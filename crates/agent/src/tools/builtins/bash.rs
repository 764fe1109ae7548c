use async_trait::async_trait;
use serde_json::json;

use crate::error::ToolError;
use crate::tools::context::ToolContext;
use crate::tools::registry::Tool;

/// First-token allow-list (spec.md §4.3). Any other command is rejected
/// before a subprocess is ever spawned.
const ALLOWED_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "grep", "find", "mkdir", "rm", "mv", "cp", "pwd", "echo",
];

pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &'static str {
        "bash"
    }

    fn description(&self) -> &'static str {
        "Run a shell command inside the session's sandbox directory. Only a small \
         allow-list of commands is permitted: ls, cat, head, tail, grep, find, mkdir, \
         rm, mv, cp, pwd, echo."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Command line to run, e.g. \"ls -la\"." }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let command = args
            .get("command")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ToolError::InvalidRequest("command is required".to_string()))?;

        let parts = split_command_line(command);
        let Some((program, rest)) = parts.split_first() else {
            return Err(ToolError::InvalidRequest("command is empty".to_string()));
        };

        if !ALLOWED_COMMANDS.contains(&program.as_str()) {
            return Err(ToolError::DisallowedCommand(format!(
                "'{program}' is not allowed; permitted commands: {}",
                ALLOWED_COMMANDS.join(", ")
            )));
        }

        tokio::fs::create_dir_all(ctx.sandbox.root())
            .await
            .map_err(|e| ToolError::Internal(e.to_string()))?;

        let mut child = tokio::process::Command::new(program)
            .args(rest)
            .current_dir(ctx.sandbox.root())
            .env_clear()
            .env("PATH", "/usr/bin:/bin")
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::Internal(format!("failed to spawn {program}: {e}")))?;

        let output = match tokio::time::timeout(ctx.tool_timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ToolError::Internal(e.to_string()))?,
            Err(_) => {
                return Err(ToolError::Timeout(ctx.tool_timeout));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Ok(format!(
                "command exited with status {}\n{stderr}",
                output.status.code().unwrap_or(-1)
            ));
        }

        Ok(if stdout.is_empty() {
            "(command produced no output)".to_string()
        } else {
            stdout
        })
    }
}

/// Minimal shell-word split: whitespace-separated tokens, with single- and
/// double-quoted spans kept intact. Good enough for the narrow allow-listed
/// command set this tool accepts.
fn split_command_line(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
