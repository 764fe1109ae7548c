//! Parses an OpenAI-compatible SSE stream into [`StreamEvent`]s, accumulating
//! both the reasoning text and per-index tool-call argument fragments.
//! Grounded on the corpus's own `parse_openai_sse_chunk` (content/tool_calls
//! deltas keyed by `choices[].delta`), generalized to also carry a
//! `reasoning_content` delta field and to fold everything into the three
//! coarser events the agent loop consumes.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{ProviderError, Result};
use crate::event::StreamEvent;
use crate::wire::ToolCall;

#[derive(Debug, Deserialize)]
struct RawChunk {
    choices: Vec<RawChoice>,
}

#[derive(Debug, Deserialize)]
struct RawChoice {
    delta: RawDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<RawToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct RawToolCallDelta {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: RawFunctionDelta,
}

#[derive(Debug, Default, Deserialize)]
struct RawFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: String,
}

#[derive(Default)]
struct ToolCallState {
    id: String,
    name: String,
    arguments: String,
}

/// Incremental accumulator for one `stream()` call. Owns the running
/// reasoning/content buffers and the per-index tool-call state, and
/// translates each raw SSE line into zero or one [`StreamEvent`].
#[derive(Default)]
pub struct SseAccumulator {
    content: String,
    reasoning: String,
    tool_states: BTreeMap<usize, ToolCallState>,
    finished: bool,
}

impl SseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one `data: ...` payload (already stripped of the prefix).
    /// Returns the events this line produced, in order. `[DONE]` sentinel
    /// lines produce the final terminal event.
    pub fn feed(&mut self, data: &str) -> Result<Vec<StreamEvent>> {
        if self.finished {
            return Ok(Vec::new());
        }
        if data == "[DONE]" {
            self.finished = true;
            return Ok(vec![self.finalize()]);
        }

        let chunk: RawChunk = serde_json::from_str(data).map_err(|e| ProviderError::MalformedChunk {
            message: e.to_string(),
            raw: data.to_string(),
        })?;

        let mut events = Vec::new();
        for choice in &chunk.choices {
            if let Some(reasoning) = &choice.delta.reasoning_content {
                if !reasoning.is_empty() {
                    self.reasoning.push_str(reasoning);
                    events.push(StreamEvent::ReasoningDelta {
                        chunk: reasoning.clone(),
                        accumulated: self.reasoning.clone(),
                    });
                }
            }
            if let Some(content) = &choice.delta.content {
                if !content.is_empty() {
                    self.content.push_str(content);
                }
            }
            if let Some(deltas) = &choice.delta.tool_calls {
                for delta in deltas {
                    let index = delta.index.unwrap_or(0);
                    let state = self.tool_states.entry(index).or_default();
                    if let Some(id) = &delta.id {
                        state.id = id.clone();
                    }
                    if let Some(name) = &delta.function.name {
                        state.name = name.clone();
                    }
                    state.arguments.push_str(&delta.function.arguments);
                }
            }
            if choice.finish_reason.is_some() {
                self.finished = true;
                events.push(self.finalize());
                break;
            }
        }
        Ok(events)
    }

    fn finalize(&mut self) -> StreamEvent {
        if self.tool_states.is_empty() {
            StreamEvent::Done {
                content: std::mem::take(&mut self.content),
                accumulated_reasoning: self.reasoning.clone(),
            }
        } else {
            let tool_calls = std::mem::take(&mut self.tool_states)
                .into_iter()
                .map(|(_, state)| ToolCall {
                    id: state.id,
                    name: state.name,
                    arguments: state.arguments,
                })
                .collect();
            StreamEvent::ToolCalls {
                tool_calls,
                accumulated_content: self.content.clone(),
                accumulated_reasoning: self.reasoning.clone(),
            }
        }
    }
}

/// Split a raw SSE byte buffer into `data: ` payload lines, ignoring
/// comments, blank lines, and other field names.
pub fn extract_data_lines(text: &str) -> Vec<&str> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("data: ").or_else(|| line.trim().strip_prefix("data:")))
        .map(str::trim)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_deltas_accumulate_in_order() {
        let mut acc = SseAccumulator::new();
        for c in ["A", "B", "C", "D", "E"] {
            let data = format!(r#"{{"choices":[{{"delta":{{"reasoning_content":"{c}"}}}}]}}"#);
            acc.feed(&data).unwrap();
        }
        assert_eq!(acc.reasoning, "ABCDE");
    }

    #[test]
    fn tool_call_deltas_accumulate_by_index() {
        let mut acc = SseAccumulator::new();
        acc.feed(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"write","arguments":""}}]}}]}"#).unwrap();
        acc.feed(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"a\":"}}]}}}]}"#).unwrap();
        acc.feed(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"1}"}}]}}]}"#).unwrap();
        let events = acc
            .feed(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#)
            .unwrap();
        match &events[0] {
            StreamEvent::ToolCalls { tool_calls, .. } => {
                assert_eq!(tool_calls.len(), 1);
                assert_eq!(tool_calls[0].arguments, r#"{"a":1}"#);
                assert_eq!(tool_calls[0].id, "call_1");
            }
            other => panic!("expected ToolCalls, got {other:?}"),
        }
    }

    #[test]
    fn done_sentinel_finalizes_text_only_turn() {
        let mut acc = SseAccumulator::new();
        acc.feed(r#"{"choices":[{"delta":{"content":"hi"}}]}"#).unwrap();
        let events = acc.feed("[DONE]").unwrap();
        match &events[0] {
            StreamEvent::Done { content, .. } => assert_eq!(content, "hi"),
            other => panic!("expected Done, got {other:?}"),
        }
        assert!(acc.is_finished());
    }
}
