//! Execution context threaded through every tool call: the sandbox and
//! task store for the (user, session) pair the turn belongs to.

use std::sync::Arc;

use sandbox::Sandbox;
use store::TaskStore;

use crate::error::ToolError;

/// Everything a [`Tool`](super::registry::Tool) needs to execute, scoped
/// to a single session.
pub struct ToolContext {
    pub session_id: String,
    pub user_id: String,
    pub sandbox: Arc<Sandbox>,
    pub task_store: Arc<dyn TaskStore>,
    pub tool_timeout: std::time::Duration,
}

impl ToolContext {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        sandbox: Arc<Sandbox>,
        task_store: Arc<dyn TaskStore>,
        tool_timeout: std::time::Duration,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            sandbox,
            task_store,
            tool_timeout,
        }
    }
}

/// Reject a relative path containing separators before it ever reaches the
/// sandbox's own filename grammar check, so the error message is specific
/// to the `filename` argument tools declare (spec.md §4.3).
pub fn require_filename_arg(args: &serde_json::Value, key: &str) -> Result<String, ToolError> {
    args.get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidRequest(format!("{key} is required")))
}
