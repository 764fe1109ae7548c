//! Wire-level message and tool types exchanged with the chat model. These
//! mirror the shape the Prompt Assembler builds (spec.md §4.6, §4.7): a
//! flat, provider-agnostic request array rather than each provider's own
//! request struct.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single tool call, echoed verbatim end to end. `arguments` is kept as
/// the exact JSON text produced by the model — it is never parsed and
/// re-serialized before being echoed back, since providers reject a
/// request whose echoed arguments don't byte-match what they emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// A message in the request array sent to [`crate::ChatProvider::stream`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Required (may be empty) on an `assistant` message that carries
    /// `tool_calls` — the provider rejects tool-call turns with no
    /// reasoning field at all (spec.md §4.7).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Returns `Err` if this is an assistant message with tool_calls but no
    /// reasoning_content field, violating the provider's request-shape
    /// requirement (spec.md §4.7).
    pub fn validate(&self) -> Result<(), String> {
        if self.role == Role::Assistant
            && self.tool_calls.is_some()
            && self.reasoning_content.is_none()
        {
            return Err(
                "assistant message with tool_calls must carry a reasoning_content field".into(),
            );
        }
        Ok(())
    }
}

/// A tool schema offered to the model for this call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments object.
    pub parameters: serde_json::Value,
}
