//! OpenAI-compatible HTTP implementation of [`ChatProvider`]. Grounded in
//! the corpus's `mrs`/`llama_cpp` providers: a spawned task drives the
//! transport and feeds an unbounded channel, which is wrapped into the
//! `Stream` the caller consumes.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use futures_util::StreamExt as _;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{ProviderError, Result};
use crate::event::StreamEvent;
use crate::sse::{extract_data_lines, SseAccumulator};
use crate::wire::{ChatMessage, Role, ToolCall, ToolSpec};
use crate::{ChatProvider, EventStream};

/// Configuration for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpChatProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout: Duration,
}

#[derive(Clone)]
pub struct HttpChatProvider {
    client: reqwest::Client,
    config: HttpChatProviderConfig,
}

impl HttpChatProvider {
    pub fn new(config: HttpChatProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_body(&self, messages: &[ChatMessage], tools: &[ToolSpec], stream: bool) -> Result<serde_json::Value> {
        for message in messages {
            message
                .validate()
                .map_err(ProviderError::InvalidRequest)?;
        }
        let messages: Vec<_> = messages.iter().map(wire_message).collect();
        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": stream,
        });
        if !tools.is_empty() {
            let tools: Vec<_> = tools.iter().map(wire_tool).collect();
            body["tools"] = json!(tools);
        }
        Ok(body)
    }

    async fn stream_via_http(
        &self,
        body: serde_json::Value,
    ) -> Result<mpsc::UnboundedReceiver<Result<StreamEvent>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let mut byte_stream = response.bytes_stream();
        tokio::spawn(async move {
            let mut accumulator = SseAccumulator::new();
            let mut carry = String::new();
            while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::StreamDisconnected(e.to_string())));
                        return;
                    }
                };
                carry.push_str(&String::from_utf8_lossy(&bytes));

                // `carry` may end mid-line: a chunk boundary can split a
                // `data: {...}` payload in two. Only hand complete,
                // newline-terminated lines to the accumulator and keep the
                // trailing partial line buffered for the next chunk.
                let consumed = consumed_line_bytes(&carry);
                if consumed > 0 {
                    let complete = carry[..consumed].to_string();
                    for data in extract_data_lines(&complete) {
                        match accumulator.feed(data) {
                            Ok(events) => {
                                for event in events {
                                    if tx.send(Ok(event)).is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(Err(e));
                                return;
                            }
                        }
                    }
                    carry.drain(..consumed);
                }
                if accumulator.is_finished() {
                    return;
                }
            }
            if !accumulator.is_finished() {
                let _ = tx.send(Err(ProviderError::StreamDisconnected(
                    "stream ended before a terminal event".to_string(),
                )));
            }
        });
        Ok(rx)
    }

    /// Non-streaming fallback used when the streaming transport fails
    /// outright (spec.md §4.7).
    async fn call_non_streaming(&self, mut body: serde_json::Value) -> Result<StreamEvent> {
        body["stream"] = json!(false);
        let response: serde_json::Value = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let message = response
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();
        let reasoning = message
            .get("reasoning_content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();
        let tool_calls = message.get("tool_calls").and_then(|v| v.as_array());

        match tool_calls {
            Some(calls) if !calls.is_empty() => {
                let tool_calls = calls
                    .iter()
                    .map(|c| ToolCall {
                        id: c.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        name: c
                            .get("function")
                            .and_then(|f| f.get("name"))
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        arguments: c
                            .get("function")
                            .and_then(|f| f.get("arguments"))
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                    })
                    .collect();
                Ok(StreamEvent::ToolCalls {
                    tool_calls,
                    accumulated_content: content,
                    accumulated_reasoning: reasoning,
                })
            }
            _ => Ok(StreamEvent::Done {
                content,
                accumulated_reasoning: reasoning,
            }),
        }
    }
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    async fn stream(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<EventStream> {
        let streaming_body = self.build_body(messages, tools, true)?;
        let fallback_body = self.build_body(messages, tools, false)?;
        match self.stream_via_http(streaming_body).await {
            Ok(rx) => {
                let provider = self.clone();
                Ok(Box::pin(forward_with_fallback(rx, provider, fallback_body)))
            }
            Err(e) => {
                tracing::warn!(error = %e, "provider streaming transport failed, falling back to non-streaming call");
                let event = self.call_non_streaming(fallback_body).await?;
                let (tx, rx) = mpsc::unbounded_channel();
                let _ = tx.send(Ok(event));
                Ok(Box::pin(UnboundedReceiverStream::new(rx)))
            }
        }
    }
}

/// Forwards events from an in-flight stream as-is, except for a
/// [`ProviderError::StreamDisconnected`], which triggers a one-time
/// non-streaming fallback call instead of terminating the turn
/// (spec.md §4.7/§5, scenario S3).
fn forward_with_fallback(
    rx: mpsc::UnboundedReceiver<Result<StreamEvent>>,
    provider: HttpChatProvider,
    fallback_body: serde_json::Value,
) -> impl Stream<Item = Result<StreamEvent>> {
    stream::unfold(Some((rx, provider, fallback_body)), |state| async move {
        let Some((mut rx, provider, fallback_body)) = state else {
            return None;
        };
        match rx.recv().await {
            Some(Ok(event)) => Some((Ok(event), Some((rx, provider, fallback_body)))),
            Some(Err(ProviderError::StreamDisconnected(reason))) => {
                tracing::warn!(
                    reason = %reason,
                    "provider stream disconnected mid-flight, falling back to non-streaming call"
                );
                let result = provider.call_non_streaming(fallback_body).await;
                Some((result, None))
            }
            Some(Err(e)) => Some((Err(e), None)),
            None => None,
        }
    })
}

#[derive(Serialize)]
struct WireToolCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: WireFunctionCall<'a>,
}

#[derive(Serialize)]
struct WireFunctionCall<'a> {
    name: &'a str,
    arguments: &'a str,
}

/// Bytes of `carry` safe to hand to the accumulator: everything up to and
/// including the last newline. The rest may be half of a `data:` payload
/// split across two transport chunks, so it must stay buffered.
fn consumed_line_bytes(carry: &str) -> usize {
    match carry.rfind('\n') {
        Some(idx) => idx + 1,
        None => 0,
    }
}

fn wire_message(message: &ChatMessage) -> serde_json::Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut value = json!({
        "role": role,
        "content": message.content,
    });
    if let Some(reasoning) = &message.reasoning_content {
        value["reasoning_content"] = json!(reasoning);
    }
    if let Some(tool_calls) = &message.tool_calls {
        let calls: Vec<_> = tool_calls
            .iter()
            .map(|tc| WireToolCall {
                id: &tc.id,
                call_type: "function",
                function: WireFunctionCall {
                    name: &tc.name,
                    arguments: &tc.arguments,
                },
            })
            .collect();
        value["tool_calls"] = json!(calls);
    }
    if let Some(id) = &message.tool_call_id {
        value["tool_call_id"] = json!(id);
    }
    value
}

fn wire_tool(tool: &ToolSpec) -> serde_json::Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> HttpChatProvider {
        HttpChatProvider::new(HttpChatProviderConfig {
            base_url: "http://example.invalid".into(),
            api_key: "test".into(),
            model: "test-model".into(),
            request_timeout: Duration::from_secs(5),
        })
    }

    #[test]
    fn build_body_rejects_tool_call_assistant_message_without_reasoning() {
        let p = provider();
        let bad = ChatMessage {
            role: Role::Assistant,
            content: String::new(),
            reasoning_content: None,
            tool_calls: Some(vec![ToolCall {
                id: "1".into(),
                name: "write".into(),
                arguments: "{}".into(),
            }]),
            tool_call_id: None,
        };
        let result = p.build_body(&[bad], &[], true);
        assert!(result.is_err());
    }

    #[test]
    fn wire_message_preserves_tool_call_arguments_byte_exact() {
        let message = ChatMessage {
            role: Role::Assistant,
            content: String::new(),
            reasoning_content: Some(String::new()),
            tool_calls: Some(vec![ToolCall {
                id: "1".into(),
                name: "write".into(),
                arguments: r#"{"b":2,"a":1}"#.into(),
            }]),
            tool_call_id: None,
        };
        let value = wire_message(&message);
        assert_eq!(
            value["tool_calls"][0]["function"]["arguments"],
            r#"{"b":2,"a":1}"#
        );
    }

    #[test]
    fn consumed_line_bytes_holds_back_a_trailing_partial_line() {
        let whole = "data: {\"a\":1}\ndata: {\"b\":2}\n";
        assert_eq!(consumed_line_bytes(whole), whole.len());

        let split_mid_payload = "data: {\"a\":1}\ndata: {\"b\":";
        let consumed = consumed_line_bytes(split_mid_payload);
        assert_eq!(consumed, "data: {\"a\":1}\n".len());
        assert_eq!(&split_mid_payload[consumed..], "data: {\"b\":");

        assert_eq!(consumed_line_bytes("data: {\"no newline yet\""), 0);
    }

    #[tokio::test]
    async fn stream_via_http_parses_a_full_sse_response_from_a_mock_server() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let full_body = concat!(
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"thinking\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"},\"finish_reason\":\"stop\"}]}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string(full_body))
            .mount(&server)
            .await;

        let p = HttpChatProvider::new(HttpChatProviderConfig {
            base_url: server.uri(),
            api_key: "test".into(),
            model: "test-model".into(),
            request_timeout: Duration::from_secs(5),
        });
        let user_message = ChatMessage {
            role: Role::User,
            content: "build me a page".into(),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
        };

        let mut stream = p.stream(&[user_message], &[]).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = futures_util::StreamExt::next(&mut stream).await {
            events.push(event.unwrap());
        }

        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::ReasoningDelta { accumulated, .. } if accumulated == "thinking")));
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Done { content, .. }) if content == "hi"
        ));
    }
}
