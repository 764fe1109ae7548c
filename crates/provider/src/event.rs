use crate::wire::ToolCall;

/// Events emitted by [`crate::ChatProvider::stream`] (spec.md §4.7).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A new fragment of model thinking; may occur many times.
    ReasoningDelta { chunk: String, accumulated: String },
    /// Finalization signal that the assistant turn ends with tool calls.
    /// Emitted at most once, and always last.
    ToolCalls {
        tool_calls: Vec<ToolCall>,
        accumulated_content: String,
        accumulated_reasoning: String,
    },
    /// Terminal signal when the assistant turn ends with text only.
    Done {
        content: String,
        accumulated_reasoning: String,
    },
}
