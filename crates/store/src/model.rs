//! Entities persisted by the store: messages, execution steps, and todo
//! snapshots. See spec.md §3 for the invariants these types encode.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Role of a chat history message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A tool call as echoed to/from the provider. `arguments` is kept as the
/// original JSON string byte-for-byte — never re-serialized from a parsed
/// object — so the provider's echo-fidelity requirement holds (spec.md §8.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    pub id: String,
    pub function_name: String,
    pub arguments: String,
}

/// A single row of chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub reasoning: Option<String>,
    pub tool_calls: Option<Vec<ToolCallPayload>>,
    pub tool_call_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Fields needed to insert a new message; `id`/`created_at` are assigned
/// by the store.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub reasoning: Option<String>,
    pub tool_calls: Option<Vec<ToolCallPayload>>,
    pub tool_call_id: Option<String>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn assistant_placeholder() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            ..Default::default()
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            ..Default::default()
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

/// Status of an execution step. Ordering matters only insofar as
/// `Completed`/`Failed` are terminal (spec.md §8.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Thinking,
    ToolCalling,
    ToolExecuting,
    ToolCompleted,
    Failed,
    Completed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Thinking => "thinking",
            StepStatus::ToolCalling => "tool_calling",
            StepStatus::ToolExecuting => "tool_executing",
            StepStatus::ToolCompleted => "tool_completed",
            StepStatus::Failed => "failed",
            StepStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thinking" => Ok(StepStatus::Thinking),
            "tool_calling" => Ok(StepStatus::ToolCalling),
            "tool_executing" => Ok(StepStatus::ToolExecuting),
            "tool_completed" => Ok(StepStatus::ToolCompleted),
            "failed" => Ok(StepStatus::Failed),
            "completed" => Ok(StepStatus::Completed),
            other => Err(format!("unknown step status: {other}")),
        }
    }
}

/// A durably recorded transition of the agent loop (spec.md §3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: i64,
    pub session_id: String,
    pub message_id: i64,
    pub user_id: String,
    pub iteration: u32,
    pub status: StepStatus,
    pub reasoning: Option<String>,
    pub tool_name: Option<String>,
    pub tool_arguments: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_result: Option<String>,
    pub tool_error: Option<String>,
    pub progress: u8,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Fields needed to append a new step.
#[derive(Debug, Clone, Default)]
pub struct NewStep {
    pub message_id: i64,
    pub user_id: String,
    pub iteration: u32,
    pub status: Option<StepStatus>,
    pub reasoning: Option<String>,
    pub tool_name: Option<String>,
    pub tool_arguments: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_result: Option<String>,
    pub tool_error: Option<String>,
    pub progress: u8,
}

impl Default for StepStatus {
    fn default() -> Self {
        StepStatus::Thinking
    }
}

/// Status of a single todo item (spec.md §3, Todo item).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

/// One item in a session's todo snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub active_form: String,
    pub status: TodoStatus,
}

/// Aggregate counts returned alongside a todo snapshot write/read.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TodoCounts {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub pending: usize,
}

impl TodoCounts {
    pub fn from_items(items: &[TodoItem]) -> Self {
        let mut counts = TodoCounts {
            total: items.len(),
            ..Default::default()
        };
        for item in items {
            match item.status {
                TodoStatus::Pending => counts.pending += 1,
                TodoStatus::InProgress => counts.in_progress += 1,
                TodoStatus::Completed => counts.completed += 1,
            }
        }
        counts
    }
}
