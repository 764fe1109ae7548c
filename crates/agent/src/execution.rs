//! Agent Loop (spec.md C8). The iterative think-act driver: per user turn,
//! runs up to N iterations of (think → optionally call tools → feed tool
//! results back), writing every transition to the step store before
//! publishing the corresponding live event (spec.md §9 "Durability before
//! visibility").

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};

use provider::{ChatMessage, ChatProvider, StreamEvent, ToolCall as WireToolCall};
use store::{ChatHistoryStore, ExecutionStep, NewMessage, NewStep, StepStatus, TaskStore, TodoCounts};

use crate::error::{AgentError, ToolError};
use crate::events::{self, EventName, SessionQueue};
use crate::prompt::{self, AssemblerConfig};
use crate::tools::{ToolContext, ToolRegistry};

type Result<T> = std::result::Result<T, AgentError>;

/// Tunables for one loop run (spec.md §4.8).
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    /// N: max iterations per turn.
    pub max_iterations: u32,
    /// T_TOOL: per-call tool timeout.
    pub tool_timeout: Duration,
    /// Q: the session event queue's capacity.
    pub event_queue_capacity: usize,
    /// Max tool calls dispatched across the whole turn before the loop
    /// stops calling tools and finalizes with what it has.
    pub max_tool_calls_per_message: u32,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tool_timeout: Duration::from_secs(30),
            event_queue_capacity: events::DEFAULT_CAPACITY,
            max_tool_calls_per_message: 16,
        }
    }
}

const TOOL_RESULT_TRUNCATE: usize = 1000;

fn progress_thinking(i: u32) -> u8 {
    (10 + 5 * i).min(80) as u8
}
fn progress_reasoning(i: u32) -> u8 {
    (15 + 5 * i).min(85) as u8
}
fn progress_tool_calling(i: u32) -> u8 {
    (20 + 8 * i).min(90) as u8
}
fn progress_tool_executing(i: u32) -> u8 {
    (25 + 8 * i).min(92) as u8
}
fn progress_tool_completed(i: u32) -> u8 {
    (30 + 8 * i).min(95) as u8
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str(" …[truncated]");
    out
}

fn step_event_payload(step: &ExecutionStep) -> Value {
    json!({ "type": "step", "data": step })
}

/// The iterative driver for one user turn (spec.md C8).
pub struct AgentLoop {
    chat_history: Arc<dyn ChatHistoryStore>,
    steps: Arc<dyn store::StepStore>,
    tasks: Arc<dyn TaskStore>,
    provider: Arc<dyn ChatProvider>,
    tools: ToolRegistry,
    sandbox: Arc<sandbox::Sandbox>,
    assembler_config: AssemblerConfig,
    config: AgentLoopConfig,
}

impl AgentLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chat_history: Arc<dyn ChatHistoryStore>,
        steps: Arc<dyn store::StepStore>,
        tasks: Arc<dyn TaskStore>,
        provider: Arc<dyn ChatProvider>,
        tools: ToolRegistry,
        sandbox: Arc<sandbox::Sandbox>,
        assembler_config: AssemblerConfig,
        config: AgentLoopConfig,
    ) -> Self {
        Self {
            chat_history,
            steps,
            tasks,
            provider,
            tools,
            sandbox,
            assembler_config,
            config,
        }
    }

    /// Drive a full turn to completion. Never propagates an error: any
    /// uncaught failure is turned into a finalized assistant message plus
    /// an `error` event, per spec.md §4.8's final paragraph.
    pub async fn run(&self, session_id: &str, user_id: &str, assistant_message_id: i64) {
        let queue = events::get_or_create(session_id, self.config.event_queue_capacity);
        if let Err(err) = self.run_inner(session_id, user_id, assistant_message_id, &queue).await {
            tracing::error!(session_id, error = %err, "agent loop terminated with uncaught error");
            let sentinel = format!("AI service error: {err}");
            let _ = self
                .chat_history
                .finalize_message(assistant_message_id, &sentinel, None, None)
                .await;
            queue.publish(EventName::Error, json!({ "error": sentinel }));
        }
    }

    async fn run_inner(
        &self,
        session_id: &str,
        user_id: &str,
        assistant_message_id: i64,
        queue: &SessionQueue,
    ) -> Result<()> {
        let mut messages = self.assemble_initial_messages(session_id).await?;
        let tool_defs = self.tools.definitions();
        let tool_ctx = ToolContext::new(
            session_id,
            user_id,
            self.sandbox.clone(),
            self.tasks.clone(),
            self.config.tool_timeout,
        );

        let mut final_content = String::new();
        let mut final_reasoning = String::new();
        let mut last_iteration = 1;
        let mut tool_call_count: u32 = 0;

        'outer: for iteration in 1..=self.config.max_iterations {
            last_iteration = iteration;
            let thinking_step = self
                .steps
                .append_step(
                    session_id,
                    NewStep {
                        message_id: assistant_message_id,
                        user_id: user_id.to_string(),
                        iteration,
                        status: Some(StepStatus::Thinking),
                        progress: progress_thinking(iteration),
                        ..Default::default()
                    },
                )
                .await?;
            queue.publish(EventName::Thinking, step_event_payload(&thinking_step));

            let outcome = self
                .consume_stream(
                    &messages,
                    &tool_defs,
                    thinking_step.id,
                    iteration,
                    session_id,
                    queue,
                )
                .await?;

            match outcome {
                StreamOutcome::Done { content, accumulated_reasoning } => {
                    final_content = content;
                    final_reasoning = accumulated_reasoning;
                    break 'outer;
                }
                StreamOutcome::ToolCalls {
                    tool_calls,
                    accumulated_content,
                    accumulated_reasoning,
                } => {
                    final_content = accumulated_content.clone();
                    final_reasoning = accumulated_reasoning.clone();

                    let tool_calling_step = self
                        .steps
                        .append_step(
                            session_id,
                            NewStep {
                                message_id: assistant_message_id,
                                user_id: user_id.to_string(),
                                iteration,
                                status: Some(StepStatus::ToolCalling),
                                reasoning: Some(accumulated_reasoning.clone()),
                                progress: progress_tool_calling(iteration),
                                ..Default::default()
                            },
                        )
                        .await?;
                    queue.publish(EventName::ToolCalling, step_event_payload(&tool_calling_step));

                    messages.push(ChatMessage {
                        role: provider::Role::Assistant,
                        content: accumulated_content,
                        reasoning_content: Some(accumulated_reasoning),
                        tool_calls: Some(tool_calls.clone()),
                        tool_call_id: None,
                    });

                    for call in &tool_calls {
                        if tool_call_count >= self.config.max_tool_calls_per_message {
                            tracing::warn!(
                                session_id,
                                max = self.config.max_tool_calls_per_message,
                                "tool call limit reached for this message, stopping further tool dispatch"
                            );
                            break 'outer;
                        }
                        tool_call_count += 1;
                        self.dispatch_tool_call(
                            session_id,
                            user_id,
                            assistant_message_id,
                            iteration,
                            call,
                            &tool_ctx,
                            &mut messages,
                            queue,
                        )
                        .await?;
                    }
                }
            }
        }

        let completed_step = self
            .steps
            .append_step(
                session_id,
                NewStep {
                    message_id: assistant_message_id,
                    user_id: user_id.to_string(),
                    iteration: last_iteration,
                    status: Some(StepStatus::Completed),
                    progress: 100,
                    ..Default::default()
                },
            )
            .await?;
        queue.publish(EventName::Completed, step_event_payload(&completed_step));

        self.chat_history
            .finalize_message(
                assistant_message_id,
                &final_content,
                Some(&final_reasoning),
                None,
            )
            .await?;
        queue.publish(EventName::Done, json!({ "done": true }));

        Ok(())
    }

    async fn assemble_initial_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let stored = self.chat_history.list_messages(session_id).await?;
        let listing = self.sandbox.list().await?;
        let pending = self.tasks.list_pending(session_id).await?;
        let recent_completed = self.tasks.list_recent_completed(session_id, 5).await?;
        let recent_system_notes = self.chat_history.recent_system_messages(session_id, 3).await?;
        Ok(prompt::assemble(
            &stored,
            &listing,
            &pending,
            &recent_completed,
            &recent_system_notes,
            &self.assembler_config,
        ))
    }

    async fn consume_stream(
        &self,
        messages: &[ChatMessage],
        tool_defs: &[provider::ToolSpec],
        thinking_step_id: i64,
        iteration: u32,
        session_id: &str,
        queue: &SessionQueue,
    ) -> Result<StreamOutcome> {
        let mut stream = self.provider.stream(messages, tool_defs).await?;
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::ReasoningDelta { accumulated, .. } => {
                    let step = self
                        .steps
                        .update_step_reasoning(thinking_step_id, &accumulated, progress_reasoning(iteration))
                        .await?;
                    queue.publish(EventName::ThinkingDelta, step_event_payload(&step));
                }
                StreamEvent::ToolCalls {
                    tool_calls,
                    accumulated_content,
                    accumulated_reasoning,
                } => {
                    return Ok(StreamOutcome::ToolCalls {
                        tool_calls,
                        accumulated_content,
                        accumulated_reasoning,
                    });
                }
                StreamEvent::Done { content, accumulated_reasoning } => {
                    return Ok(StreamOutcome::Done { content, accumulated_reasoning });
                }
            }
        }
        tracing::warn!(session_id, iteration, "provider stream ended without a terminal event");
        Ok(StreamOutcome::Done {
            content: String::new(),
            accumulated_reasoning: String::new(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_tool_call(
        &self,
        session_id: &str,
        user_id: &str,
        assistant_message_id: i64,
        iteration: u32,
        call: &WireToolCall,
        tool_ctx: &ToolContext,
        messages: &mut Vec<ChatMessage>,
        queue: &SessionQueue,
    ) -> Result<()> {
        let calling_step = self
            .steps
            .append_step(
                session_id,
                NewStep {
                    message_id: assistant_message_id,
                    user_id: user_id.to_string(),
                    iteration,
                    status: Some(StepStatus::ToolCalling),
                    tool_name: Some(call.name.clone()),
                    tool_arguments: Some(call.arguments.clone()),
                    tool_call_id: Some(call.id.clone()),
                    progress: progress_tool_calling(iteration),
                    ..Default::default()
                },
            )
            .await?;
        queue.publish(EventName::ToolCalling, step_event_payload(&calling_step));

        let executing_step = self
            .steps
            .append_step(
                session_id,
                NewStep {
                    message_id: assistant_message_id,
                    user_id: user_id.to_string(),
                    iteration,
                    status: Some(StepStatus::ToolExecuting),
                    tool_name: Some(call.name.clone()),
                    tool_arguments: Some(call.arguments.clone()),
                    tool_call_id: Some(call.id.clone()),
                    progress: progress_tool_executing(iteration),
                    ..Default::default()
                },
            )
            .await?;
        queue.publish(EventName::ToolExecuting, step_event_payload(&executing_step));

        let outcome = self.run_tool(call, tool_ctx).await;

        match outcome {
            Ok(result) => {
                let truncated = truncate_chars(&result, TOOL_RESULT_TRUNCATE);
                let completed_step = self
                    .steps
                    .append_step(
                        session_id,
                        NewStep {
                            message_id: assistant_message_id,
                            user_id: user_id.to_string(),
                            iteration,
                            status: Some(StepStatus::ToolCompleted),
                            tool_name: Some(call.name.clone()),
                            tool_arguments: Some(call.arguments.clone()),
                            tool_call_id: Some(call.id.clone()),
                            tool_result: Some(truncated),
                            progress: progress_tool_completed(iteration),
                            ..Default::default()
                        },
                    )
                    .await?;
                queue.publish(EventName::ToolCompleted, step_event_payload(&completed_step));

                self.chat_history
                    .append_message(session_id, NewMessage::tool(result.clone(), call.id.clone()))
                    .await?;
                messages.push(ChatMessage::tool(result.clone(), call.id.clone()));

                if call.name == "todo" {
                    if let Ok(summary) = serde_json::from_str::<Value>(&result) {
                        let todos = self.tasks.list_todos(session_id).await?;
                        let counts = TodoCounts::from_items(&todos);
                        queue.publish(
                            EventName::TodosUpdate,
                            json!({
                                "todos": todos,
                                "total": counts.total,
                                "completed": counts.completed,
                                "in_progress": counts.in_progress,
                                "pending": counts.pending,
                                "summary": summary,
                            }),
                        );
                    }
                }
            }
            Err(tool_error) => {
                let error_text = tool_error.to_string();
                let failed_step = self
                    .steps
                    .append_step(
                        session_id,
                        NewStep {
                            message_id: assistant_message_id,
                            user_id: user_id.to_string(),
                            iteration,
                            status: Some(StepStatus::Failed),
                            tool_name: Some(call.name.clone()),
                            tool_arguments: Some(call.arguments.clone()),
                            tool_call_id: Some(call.id.clone()),
                            tool_error: Some(error_text.clone()),
                            progress: progress_tool_completed(iteration),
                            ..Default::default()
                        },
                    )
                    .await?;
                queue.publish(EventName::Failed, step_event_payload(&failed_step));

                self.chat_history
                    .append_message(session_id, NewMessage::tool(error_text.clone(), call.id.clone()))
                    .await?;
                messages.push(ChatMessage::tool(error_text, call.id.clone()));
            }
        }

        Ok(())
    }

    async fn run_tool(
        &self,
        call: &WireToolCall,
        tool_ctx: &ToolContext,
    ) -> std::result::Result<String, ToolError> {
        let Some(tool) = self.tools.find(&call.name) else {
            return Err(ToolError::NotFound(call.name.clone()));
        };
        let args: Value = serde_json::from_str(&call.arguments)
            .map_err(|e| ToolError::InvalidRequest(format!("malformed tool arguments json: {e}")))?;

        match tokio::time::timeout(tool_ctx.tool_timeout, tool.execute(args, tool_ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(tool_ctx.tool_timeout)),
        }
    }
}

enum StreamOutcome {
    Done {
        content: String,
        accumulated_reasoning: String,
    },
    ToolCalls {
        tool_calls: Vec<WireToolCall>,
        accumulated_content: String,
        accumulated_reasoning: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use sandbox::{Sandbox, SandboxConfig};
    use store::SqliteStore;
    use tempfile::TempDir;

    use crate::tools::builtins::default_registry;

    /// Scripted provider: each call to `stream` pops the next scripted
    /// sequence of events off the front of the queue.
    struct ScriptedProvider {
        scripts: StdMutex<std::collections::VecDeque<Vec<StreamEvent>>>,
    }

    impl ScriptedProvider {
        fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
            Self {
                scripts: StdMutex::new(scripts.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn stream(
            &self,
            _messages: &[ChatMessage],
            _tools: &[provider::ToolSpec],
        ) -> provider::Result<provider::EventStream> {
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted provider called more times than scripted");
            let stream = tokio_stream::iter(script.into_iter().map(Ok));
            Ok(Box::pin(stream))
        }
    }

    async fn test_loop(provider: ScriptedProvider) -> (AgentLoop, SqliteStore, TempDir, String, i64) {
        test_loop_with_config(
            provider,
            AgentLoopConfig {
                max_iterations: 5,
                tool_timeout: Duration::from_secs(5),
                event_queue_capacity: 64,
                max_tool_calls_per_message: 16,
            },
        )
        .await
    }

    async fn test_loop_with_config(
        provider: ScriptedProvider,
        config: AgentLoopConfig,
    ) -> (AgentLoop, SqliteStore, TempDir, String, i64) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::in_memory().await.unwrap();
        let chat_history: Arc<dyn ChatHistoryStore> = Arc::new(store.clone());
        let steps: Arc<dyn store::StepStore> = Arc::new(store.clone());
        let tasks: Arc<dyn TaskStore> = Arc::new(store.clone());

        let session_id = uuid::Uuid::new_v4().to_string();
        let sandbox = Sandbox::new(SandboxConfig::new(tmp.path()), "user1", session_id.clone());
        sandbox.initialize().await.unwrap();
        let sandbox = Arc::new(sandbox);

        chat_history
            .append_message(&session_id, NewMessage::user("build me a page"))
            .await
            .unwrap();
        let assistant_message = chat_history
            .append_message(&session_id, NewMessage::assistant_placeholder())
            .await
            .unwrap();

        let agent_loop = AgentLoop::new(
            chat_history,
            steps,
            tasks,
            Arc::new(provider),
            default_registry(),
            sandbox,
            AssemblerConfig::default(),
            config,
        );

        (agent_loop, store, tmp, session_id, assistant_message.id)
    }

    #[tokio::test]
    async fn text_only_turn_finalizes_message_and_completes() {
        let provider = ScriptedProvider::new(vec![vec![StreamEvent::Done {
            content: "Here is your page.".into(),
            accumulated_reasoning: "thought about it".into(),
        }]]);
        let (agent_loop, store, _tmp, session_id, message_id) = test_loop(provider).await;

        agent_loop.run(&session_id, "user1", message_id).await;

        let messages = store.list_messages(&session_id).await.unwrap();
        let assistant = messages
            .iter()
            .find(|m| m.id == message_id)
            .expect("assistant message exists");
        assert_eq!(assistant.content, "Here is your page.");
        assert_eq!(assistant.reasoning.as_deref(), Some("thought about it"));

        let all_steps = store.list_steps(message_id).await.unwrap();
        assert_eq!(all_steps.last().unwrap().status, StepStatus::Completed);
        assert_eq!(all_steps.last().unwrap().progress, 100);
    }

    #[tokio::test]
    async fn reasoning_deltas_accumulate_into_one_thinking_step() {
        let chunks = ["A", "B", "C", "D", "E"];
        let mut accumulated = String::new();
        let mut events = Vec::new();
        for chunk in chunks {
            accumulated.push_str(chunk);
            events.push(StreamEvent::ReasoningDelta {
                chunk: chunk.into(),
                accumulated: accumulated.clone(),
            });
        }
        events.push(StreamEvent::Done {
            content: "done".into(),
            accumulated_reasoning: accumulated.clone(),
        });
        let provider = ScriptedProvider::new(vec![events]);
        let (agent_loop, store, _tmp, session_id, message_id) = test_loop(provider).await;

        agent_loop.run(&session_id, "user1", message_id).await;

        let all_steps = store.list_steps(message_id).await.unwrap();
        let thinking_steps: Vec<_> = all_steps
            .iter()
            .filter(|s| s.status == StepStatus::Thinking)
            .collect();
        assert_eq!(thinking_steps.len(), 1);
        assert_eq!(thinking_steps[0].reasoning.as_deref(), Some("ABCDE"));
    }

    #[tokio::test]
    async fn tool_call_then_done_persists_tool_message_and_result() {
        let provider = ScriptedProvider::new(vec![
            vec![StreamEvent::ToolCalls {
                tool_calls: vec![WireToolCall {
                    id: "call_1".into(),
                    name: "list".into(),
                    arguments: "{}".into(),
                }],
                accumulated_content: String::new(),
                accumulated_reasoning: "let's see what's there".into(),
            }],
            vec![StreamEvent::Done {
                content: "Here's your page.".into(),
                accumulated_reasoning: "done thinking".into(),
            }],
        ]);
        let (agent_loop, store, _tmp, session_id, message_id) = test_loop(provider).await;

        agent_loop.run(&session_id, "user1", message_id).await;

        let messages = store.list_messages(&session_id).await.unwrap();
        let tool_message = messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("call_1"))
            .expect("tool message persisted");
        assert!(tool_message.content.contains("index.html"));

        let all_steps = store.list_steps(message_id).await.unwrap();
        assert!(all_steps.iter().any(|s| s.status == StepStatus::ToolCompleted));
        assert_eq!(all_steps.last().unwrap().status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn tool_failure_is_reported_and_loop_recovers() {
        let provider = ScriptedProvider::new(vec![
            vec![StreamEvent::ToolCalls {
                tool_calls: vec![WireToolCall {
                    id: "call_1".into(),
                    name: "write".into(),
                    arguments: r#"{"filename": "../x", "content": "oops"}"#.into(),
                }],
                accumulated_content: String::new(),
                accumulated_reasoning: "writing a file".into(),
            }],
            vec![StreamEvent::Done {
                content: "Fixed it.".into(),
                accumulated_reasoning: "recovered".into(),
            }],
        ]);
        let (agent_loop, store, _tmp, session_id, message_id) = test_loop(provider).await;

        agent_loop.run(&session_id, "user1", message_id).await;

        let all_steps = store.list_steps(message_id).await.unwrap();
        assert!(all_steps.iter().any(|s| s.status == StepStatus::Failed));
        // The loop recovers and still reaches a terminal completed step.
        assert_eq!(all_steps.last().unwrap().status, StepStatus::Completed);

        let messages = store.list_messages(&session_id).await.unwrap();
        let assistant = messages.iter().find(|m| m.id == message_id).unwrap();
        assert_eq!(assistant.content, "Fixed it.");
    }

    #[tokio::test]
    async fn tool_call_cap_stops_dispatch_mid_iteration() {
        let provider = ScriptedProvider::new(vec![vec![StreamEvent::ToolCalls {
            tool_calls: vec![
                WireToolCall { id: "call_1".into(), name: "list".into(), arguments: "{}".into() },
                WireToolCall { id: "call_2".into(), name: "list".into(), arguments: "{}".into() },
                WireToolCall { id: "call_3".into(), name: "list".into(), arguments: "{}".into() },
            ],
            accumulated_content: String::new(),
            accumulated_reasoning: "let's look around a lot".into(),
        }]]);
        let (agent_loop, store, _tmp, session_id, message_id) = test_loop_with_config(
            provider,
            AgentLoopConfig {
                max_iterations: 5,
                tool_timeout: Duration::from_secs(5),
                event_queue_capacity: 64,
                max_tool_calls_per_message: 2,
            },
        )
        .await;

        agent_loop.run(&session_id, "user1", message_id).await;

        let all_steps = store.list_steps(message_id).await.unwrap();
        let completed_calls = all_steps
            .iter()
            .filter(|s| s.status == StepStatus::ToolCompleted)
            .count();
        assert_eq!(completed_calls, 2);
        assert_eq!(all_steps.last().unwrap().status, StepStatus::Completed);

        let messages = store.list_messages(&session_id).await.unwrap();
        assert_eq!(messages.iter().filter(|m| m.tool_call_id.is_some()).count(), 2);
    }
}
