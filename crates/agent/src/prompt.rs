//! Prompt Assembler (spec.md C6). A pure transformation over already-fetched
//! state — stored messages, sandbox listing, todos, recent system notes —
//! into the message array handed to the provider. Keep it pure so it can be
//! tested with deterministic fixtures per spec.md §9's design note.

use std::collections::{HashMap, HashSet};

use provider::{ChatMessage, Role as WireRole};
use store::{Message, Role as StoreRole, TodoItem};

pub struct AssemblerConfig {
    pub system_prompt: String,
    /// H: number of most-recent assistant messages to keep when truncation
    /// is enabled.
    pub max_history_messages: usize,
    pub enable_truncation: bool,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_history_messages: 20,
            enable_truncation: true,
        }
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a web-development assistant. You edit a small sandboxed project \
made of plain HTML, CSS, and JavaScript on behalf of the user. Prefer \
native HTML/CSS/JS over frameworks unless asked otherwise. Use the list, \
read, write, bash, check, and todo tools to inspect and change the \
project; keep the todo list up to date as you work.";

/// Truncate `text` to `max_len` bytes and append a visible marker if it
/// was cut (spec.md §4.6 step 4 — applied by the caller before
/// persistence, exposed here since it's conceptually part of C6).
pub fn cap_user_input(text: &str, max_len: usize, warning: &str) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max_len).collect::<String>();
    truncated.push_str(warning);
    truncated
}

/// Build the contextual prompt a stored `user` message is rewritten into
/// (spec.md §4.6 step 2).
fn contextual_prompt(
    original_text: &str,
    sandbox_listing: &[String],
    pending_todos: &[TodoItem],
    recent_completed_todos: &[TodoItem],
    recent_system_notes: &[Message],
) -> String {
    let mut out = String::new();

    out.push_str("## 当前沙箱文件\n");
    if sandbox_listing.is_empty() {
        out.push_str("(no files yet)\n");
    } else {
        for name in sandbox_listing {
            out.push_str("- ");
            out.push_str(name);
            out.push('\n');
        }
    }

    out.push_str("\n## 待办事项\n");
    if pending_todos.is_empty() {
        out.push_str("(none)\n");
    } else {
        for (i, todo) in pending_todos.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, todo.content));
        }
    }

    if !recent_completed_todos.is_empty() {
        out.push_str("\n## 最近完成\n");
        for todo in recent_completed_todos {
            out.push_str("- ");
            out.push_str(&todo.content);
            out.push('\n');
        }
    }

    if !recent_system_notes.is_empty() {
        out.push_str("\n## 最近系统提示\n");
        for note in recent_system_notes {
            let trimmed: String = note.content.chars().take(150).collect();
            out.push_str("- ");
            out.push_str(&trimmed);
            out.push('\n');
        }
    }

    out.push_str("\n## 用户消息\n");
    out.push_str(original_text);
    out
}

fn to_wire_role(role: StoreRole) -> WireRole {
    match role {
        StoreRole::User => WireRole::User,
        StoreRole::Assistant => WireRole::Assistant,
        StoreRole::System => WireRole::System,
        StoreRole::Tool => WireRole::Tool,
    }
}

fn transform_message(
    message: &Message,
    sandbox_listing: &[String],
    pending_todos: &[TodoItem],
    recent_completed_todos: &[TodoItem],
    recent_system_notes: &[Message],
) -> ChatMessage {
    match message.role {
        StoreRole::User => ChatMessage {
            role: WireRole::User,
            content: contextual_prompt(
                &message.content,
                sandbox_listing,
                pending_todos,
                recent_completed_todos,
                recent_system_notes,
            ),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
        },
        StoreRole::Assistant => {
            let tool_calls = message.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|c| provider::ToolCall {
                        id: c.id.clone(),
                        name: c.function_name.clone(),
                        arguments: c.arguments.clone(),
                    })
                    .collect::<Vec<_>>()
            });
            let reasoning_content = if tool_calls.is_some() {
                Some(message.reasoning.clone().unwrap_or_default())
            } else {
                None
            };
            ChatMessage {
                role: WireRole::Assistant,
                content: message.content.clone(),
                reasoning_content,
                tool_calls,
                tool_call_id: None,
            }
        }
        StoreRole::Tool => ChatMessage {
            role: WireRole::Tool,
            content: message.content.clone(),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: message.tool_call_id.clone(),
        },
        StoreRole::System => ChatMessage {
            role: to_wire_role(message.role),
            content: message.content.clone(),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
        },
    }
}

/// Assemble the provider-bound message array for one call to
/// [`provider::ChatProvider::stream`] (spec.md §4.6).
pub fn assemble(
    stored_messages: &[Message],
    sandbox_listing: &[String],
    pending_todos: &[TodoItem],
    recent_completed_todos: &[TodoItem],
    recent_system_notes: &[Message],
    config: &AssemblerConfig,
) -> Vec<ChatMessage> {
    let transformed: Vec<ChatMessage> = stored_messages
        .iter()
        .map(|m| {
            transform_message(
                m,
                sandbox_listing,
                pending_todos,
                recent_completed_todos,
                recent_system_notes,
            )
        })
        .collect();

    let mut out = Vec::with_capacity(transformed.len() + 1);
    out.push(ChatMessage::system(&config.system_prompt));

    if !config.enable_truncation {
        out.extend(transformed);
        return out;
    }

    // Map each assistant's tool_call ids to its index in `stored_messages`,
    // so tool messages can be matched to a *kept* assistant.
    let mut tool_call_owner: HashMap<&str, usize> = HashMap::new();
    for (i, m) in stored_messages.iter().enumerate() {
        if let Some(calls) = &m.tool_calls {
            for call in calls {
                tool_call_owner.insert(call.id.as_str(), i);
            }
        }
    }

    let assistant_indices: Vec<usize> = stored_messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == StoreRole::Assistant)
        .map(|(i, _)| i)
        .collect();
    let kept_assistants: HashSet<usize> = assistant_indices
        .iter()
        .rev()
        .take(config.max_history_messages)
        .copied()
        .collect();

    let first_user_index = stored_messages
        .iter()
        .position(|m| m.role == StoreRole::User);

    for (i, message) in stored_messages.iter().enumerate() {
        let keep = match message.role {
            StoreRole::System => true,
            StoreRole::User => Some(i) == first_user_index,
            StoreRole::Assistant => kept_assistants.contains(&i),
            StoreRole::Tool => message
                .tool_call_id
                .as_deref()
                .and_then(|id| tool_call_owner.get(id))
                .is_some_and(|owner| kept_assistants.contains(owner)),
        };
        if keep {
            out.push(transformed[i].clone());
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::{NewMessage, ToolCallPayload};
    use time::OffsetDateTime;

    fn msg(id: i64, role: StoreRole, content: &str) -> Message {
        Message {
            id,
            session_id: "s1".into(),
            role,
            content: content.into(),
            reasoning: None,
            tool_calls: None,
            tool_call_id: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn truncation_keeps_system_first_user_and_last_h_assistants() {
        let mut messages = Vec::new();
        messages.push(msg(1, StoreRole::User, "first user"));
        for n in 0..5 {
            messages.push(msg(10 + n, StoreRole::System, &format!("note {n}")));
        }
        for n in 0..25 {
            messages.push(msg(100 + n * 2, StoreRole::User, &format!("user {n}")));
            let mut assistant = msg(101 + n * 2, StoreRole::Assistant, &format!("assistant {n}"));
            assistant.tool_calls = Some(vec![ToolCallPayload {
                id: format!("call_{n}"),
                function_name: "write".into(),
                arguments: "{}".into(),
            }]);
            messages.push(assistant);
            messages.push(Message {
                tool_call_id: Some(format!("call_{n}")),
                ..msg(102 + n * 2, StoreRole::Tool, "tool result")
            });
        }

        let config = AssemblerConfig {
            max_history_messages: 20,
            ..Default::default()
        };
        let out = assemble(&messages, &[], &[], &[], &[], &config);

        let system_count = out.iter().filter(|m| m.role == WireRole::System).count();
        assert_eq!(system_count, 6); // synthetic prompt + 5 stored notes
        let user_count = out.iter().filter(|m| m.role == WireRole::User).count();
        assert_eq!(user_count, 1); // only the first user message survives
        let assistant_count = out.iter().filter(|m| m.role == WireRole::Assistant).count();
        assert_eq!(assistant_count, 20);
        let tool_count = out.iter().filter(|m| m.role == WireRole::Tool).count();
        assert_eq!(tool_count, 20);
    }

    #[test]
    fn assistant_with_tool_calls_carries_reasoning_content() {
        let mut assistant = msg(1, StoreRole::Assistant, "");
        assistant.reasoning = Some("because reasons".into());
        assistant.tool_calls = Some(vec![ToolCallPayload {
            id: "call_1".into(),
            function_name: "write".into(),
            arguments: r#"{"a":1}"#.into(),
        }]);
        let out = assemble(&[assistant], &[], &[], &[], &[], &AssemblerConfig::default());
        let assistant_msg = out.iter().find(|m| m.role == WireRole::Assistant).unwrap();
        assert_eq!(assistant_msg.reasoning_content.as_deref(), Some("because reasons"));
        assert_eq!(
            assistant_msg.tool_calls.as_ref().unwrap()[0].arguments,
            r#"{"a":1}"#
        );
    }

    #[test]
    fn user_message_gets_contextual_prompt() {
        let user = msg(1, StoreRole::User, "make a todo app");
        let out = assemble(
            &[user],
            &["index.html".to_string()],
            &[TodoItem {
                content: "scaffold page".into(),
                active_form: "scaffolding page".into(),
                status: store::TodoStatus::Pending,
            }],
            &[],
            &[],
            &AssemblerConfig::default(),
        );
        let user_msg = out.iter().find(|m| m.role == WireRole::User).unwrap();
        assert!(user_msg.content.contains("index.html"));
        assert!(user_msg.content.contains("scaffold page"));
        assert!(user_msg.content.contains("make a todo app"));
        let _ = NewMessage::user("unused"); // keep NewMessage import exercised
    }

    #[test]
    fn cap_user_input_truncates_and_marks() {
        let capped = cap_user_input("abcdefgh", 4, " [...]");
        assert_eq!(capped, "abcd [...]");
        assert_eq!(cap_user_input("short", 10, " [...]"), "short");
    }
}
