use async_trait::async_trait;

use crate::error::Result;
use crate::model::TodoItem;

/// Per-session todo snapshot store. Holds at most one snapshot per session;
/// writes replace the entire list atomically (spec.md C2).
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Replace the session's todo snapshot in full.
    async fn write_todos(&self, session_id: &str, todos: Vec<TodoItem>) -> Result<()>;

    /// The full current snapshot.
    async fn list_todos(&self, session_id: &str) -> Result<Vec<TodoItem>>;

    /// Only items not yet completed, in snapshot order.
    async fn list_pending(&self, session_id: &str) -> Result<Vec<TodoItem>>;

    /// The most recent `k` completed items, most-recent-first.
    async fn list_recent_completed(&self, session_id: &str, k: usize) -> Result<Vec<TodoItem>>;
}
