use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Message, NewMessage};

/// Append-only per-session chat history (spec.md C4).
#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    /// Persist a new message and return it with its assigned id/timestamp.
    async fn append_message(&self, session_id: &str, message: NewMessage) -> Result<Message>;

    /// Overwrite the content/reasoning/tool_calls of an existing message.
    /// Used only to finalize the assistant message at turn end (spec.md §3).
    async fn finalize_message(
        &self,
        message_id: i64,
        content: &str,
        reasoning: Option<&str>,
        tool_calls: Option<&[crate::model::ToolCallPayload]>,
    ) -> Result<()>;

    /// All messages of a session in insertion order.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>>;

    /// The latest assistant message of a session, if any.
    async fn latest_assistant_message(&self, session_id: &str) -> Result<Option<Message>>;

    /// The most recent `k` system messages of a session, oldest first.
    async fn recent_system_messages(&self, session_id: &str, k: usize) -> Result<Vec<Message>>;
}
