//! `rusqlite`-backed implementation of [`ChatHistoryStore`], [`StepStore`],
//! and [`TaskStore`]. Mirrors the teacher's `SqliteSessionStore`: a single
//! connection behind a mutex, all access routed through
//! `tokio::task::spawn_blocking` so the async runtime is never blocked on
//! disk I/O.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};
use time::OffsetDateTime;

use crate::chat_history::ChatHistoryStore;
use crate::error::{Result, StoreError};
use crate::model::{
    ExecutionStep, Message, NewMessage, NewStep, Role, StepStatus, TodoItem, ToolCallPayload,
};
use crate::step_store::StepStore;
use crate::task_store::TaskStore;

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        r#"
        CREATE TABLE messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            reasoning TEXT,
            tool_calls TEXT,
            tool_call_id TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX idx_messages_session ON messages(session_id, id);

        CREATE TABLE execution_steps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            message_id INTEGER NOT NULL,
            user_id TEXT NOT NULL,
            iteration INTEGER NOT NULL,
            status TEXT NOT NULL,
            reasoning TEXT,
            tool_name TEXT,
            tool_arguments TEXT,
            tool_call_id TEXT,
            tool_result TEXT,
            tool_error TEXT,
            progress INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX idx_steps_message ON execution_steps(message_id, id);
        CREATE INDEX idx_steps_session ON execution_steps(session_id, id);

        CREATE TABLE todo_snapshots (
            session_id TEXT PRIMARY KEY,
            todos TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )])
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply migrations.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let mut conn = Connection::open(path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            migrations().to_latest(&mut conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::TaskJoin(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, for tests.
    pub async fn in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let mut conn = Connection::open_in_memory()?;
            migrations().to_latest(&mut conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::TaskJoin(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run_blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::TaskJoin(e.to_string()))?
    }
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let role: String = row.get("role")?;
    let tool_calls_json: Option<String> = row.get("tool_calls")?;
    let created_at: String = row.get("created_at")?;
    Ok(Message {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        role: role.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
        })?,
        content: row.get("content")?,
        reasoning: row.get("reasoning")?,
        tool_calls: tool_calls_json
            .map(|s| serde_json::from_str::<Vec<ToolCallPayload>>(&s))
            .transpose()
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
        tool_call_id: row.get("tool_call_id")?,
        created_at: OffsetDateTime::parse(&created_at, &time::format_description::well_known::Rfc3339)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })?,
    })
}

fn row_to_step(row: &rusqlite::Row) -> rusqlite::Result<ExecutionStep> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let progress: i64 = row.get("progress")?;
    Ok(ExecutionStep {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        message_id: row.get("message_id")?,
        user_id: row.get("user_id")?,
        iteration: row.get::<_, i64>("iteration")? as u32,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
        })?,
        reasoning: row.get("reasoning")?,
        tool_name: row.get("tool_name")?,
        tool_arguments: row.get("tool_arguments")?,
        tool_call_id: row.get("tool_call_id")?,
        tool_result: row.get("tool_result")?,
        tool_error: row.get("tool_error")?,
        progress: progress as u8,
        created_at: OffsetDateTime::parse(&created_at, &time::format_description::well_known::Rfc3339)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })?,
        updated_at: OffsetDateTime::parse(&updated_at, &time::format_description::well_known::Rfc3339)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })?,
    })
}

#[async_trait]
impl ChatHistoryStore for SqliteStore {
    async fn append_message(&self, session_id: &str, message: NewMessage) -> Result<Message> {
        let session_id = session_id.to_string();
        self.run_blocking(move |conn| {
            let now = OffsetDateTime::now_utc();
            let now_str = now
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap();
            let tool_calls_json = message
                .tool_calls
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            conn.execute(
                "INSERT INTO messages (session_id, role, content, reasoning, tool_calls, tool_call_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    session_id,
                    message.role.as_str(),
                    message.content,
                    message.reasoning,
                    tool_calls_json,
                    message.tool_call_id,
                    now_str,
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(Message {
                id,
                session_id,
                role: message.role,
                content: message.content,
                reasoning: message.reasoning,
                tool_calls: message.tool_calls,
                tool_call_id: message.tool_call_id,
                created_at: now,
            })
        })
        .await
    }

    async fn finalize_message(
        &self,
        message_id: i64,
        content: &str,
        reasoning: Option<&str>,
        tool_calls: Option<&[ToolCallPayload]>,
    ) -> Result<()> {
        let content = content.to_string();
        let reasoning = reasoning.map(str::to_string);
        let tool_calls_json = tool_calls.map(serde_json::to_string).transpose()?;
        self.run_blocking(move |conn| {
            conn.execute(
                "UPDATE messages SET content = ?1, reasoning = ?2, tool_calls = ?3 WHERE id = ?4",
                params![content, reasoning, tool_calls_json, message_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let session_id = session_id.to_string();
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, reasoning, tool_calls, tool_call_id, created_at
                 FROM messages WHERE session_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![session_id], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn latest_assistant_message(&self, session_id: &str) -> Result<Option<Message>> {
        let session_id = session_id.to_string();
        self.run_blocking(move |conn| {
            conn.query_row(
                "SELECT id, session_id, role, content, reasoning, tool_calls, tool_call_id, created_at
                 FROM messages WHERE session_id = ?1 AND role = 'assistant'
                 ORDER BY id DESC LIMIT 1",
                params![session_id],
                row_to_message,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
    }

    async fn recent_system_messages(&self, session_id: &str, k: usize) -> Result<Vec<Message>> {
        let session_id = session_id.to_string();
        let mut rows: Vec<Message> = self
            .run_blocking(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, session_id, role, content, reasoning, tool_calls, tool_call_id, created_at
                     FROM messages WHERE session_id = ?1 AND role = 'system'
                     ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![session_id, k as i64], row_to_message)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        rows.reverse();
        Ok(rows)
    }
}

#[async_trait]
impl StepStore for SqliteStore {
    async fn append_step(&self, session_id: &str, step: NewStep) -> Result<ExecutionStep> {
        let session_id = session_id.to_string();
        self.run_blocking(move |conn| {
            let now = OffsetDateTime::now_utc();
            let now_str = now
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap();
            let status = step.status.unwrap_or(StepStatus::Thinking);
            conn.execute(
                "INSERT INTO execution_steps
                    (session_id, message_id, user_id, iteration, status, reasoning,
                     tool_name, tool_arguments, tool_call_id, tool_result, tool_error,
                     progress, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                params![
                    session_id,
                    step.message_id,
                    step.user_id,
                    step.iteration,
                    status.as_str(),
                    step.reasoning,
                    step.tool_name,
                    step.tool_arguments,
                    step.tool_call_id,
                    step.tool_result,
                    step.tool_error,
                    step.progress as i64,
                    now_str,
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(ExecutionStep {
                id,
                session_id,
                message_id: step.message_id,
                user_id: step.user_id,
                iteration: step.iteration,
                status,
                reasoning: step.reasoning,
                tool_name: step.tool_name,
                tool_arguments: step.tool_arguments,
                tool_call_id: step.tool_call_id,
                tool_result: step.tool_result,
                tool_error: step.tool_error,
                progress: step.progress,
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    async fn update_step_reasoning(
        &self,
        step_id: i64,
        reasoning: &str,
        progress: u8,
    ) -> Result<ExecutionStep> {
        let reasoning = reasoning.to_string();
        self.run_blocking(move |conn| {
            let now = OffsetDateTime::now_utc();
            let now_str = now
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap();
            conn.execute(
                "UPDATE execution_steps SET reasoning = ?1, progress = ?2, updated_at = ?3 WHERE id = ?4",
                params![reasoning, progress as i64, now_str, step_id],
            )?;
            conn.query_row(
                "SELECT id, session_id, message_id, user_id, iteration, status, reasoning,
                        tool_name, tool_arguments, tool_call_id, tool_result, tool_error,
                        progress, created_at, updated_at
                 FROM execution_steps WHERE id = ?1",
                params![step_id],
                row_to_step,
            )
            .map_err(Into::into)
        })
        .await
    }

    async fn finalize_step(
        &self,
        step_id: i64,
        status: StepStatus,
        progress: u8,
        tool_result: Option<&str>,
        tool_error: Option<&str>,
    ) -> Result<ExecutionStep> {
        let tool_result = tool_result.map(str::to_string);
        let tool_error = tool_error.map(str::to_string);
        self.run_blocking(move |conn| {
            let now = OffsetDateTime::now_utc();
            let now_str = now
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap();
            conn.execute(
                "UPDATE execution_steps
                 SET status = ?1, progress = ?2, tool_result = COALESCE(?3, tool_result),
                     tool_error = COALESCE(?4, tool_error), updated_at = ?5
                 WHERE id = ?6",
                params![
                    status.as_str(),
                    progress as i64,
                    tool_result,
                    tool_error,
                    now_str,
                    step_id
                ],
            )?;
            conn.query_row(
                "SELECT id, session_id, message_id, user_id, iteration, status, reasoning,
                        tool_name, tool_arguments, tool_call_id, tool_result, tool_error,
                        progress, created_at, updated_at
                 FROM execution_steps WHERE id = ?1",
                params![step_id],
                row_to_step,
            )
            .map_err(Into::into)
        })
        .await
    }

    async fn list_steps(&self, message_id: i64) -> Result<Vec<ExecutionStep>> {
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, message_id, user_id, iteration, status, reasoning,
                        tool_name, tool_arguments, tool_call_id, tool_result, tool_error,
                        progress, created_at, updated_at
                 FROM execution_steps WHERE message_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![message_id], row_to_step)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn latest_step(&self, message_id: i64) -> Result<Option<ExecutionStep>> {
        self.run_blocking(move |conn| {
            conn.query_row(
                "SELECT id, session_id, message_id, user_id, iteration, status, reasoning,
                        tool_name, tool_arguments, tool_call_id, tool_result, tool_error,
                        progress, created_at, updated_at
                 FROM execution_steps WHERE message_id = ?1 ORDER BY id DESC LIMIT 1",
                params![message_id],
                row_to_step,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
    }

    async fn latest_step_for_session(&self, session_id: &str) -> Result<Option<ExecutionStep>> {
        let session_id = session_id.to_string();
        self.run_blocking(move |conn| {
            conn.query_row(
                "SELECT id, session_id, message_id, user_id, iteration, status, reasoning,
                        tool_name, tool_arguments, tool_call_id, tool_result, tool_error,
                        progress, created_at, updated_at
                 FROM execution_steps WHERE session_id = ?1 ORDER BY id DESC LIMIT 1",
                params![session_id],
                row_to_step,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn write_todos(&self, session_id: &str, todos: Vec<TodoItem>) -> Result<()> {
        let session_id = session_id.to_string();
        let todos_json = serde_json::to_string(&todos)?;
        self.run_blocking(move |conn| {
            let now_str = OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap();
            conn.execute(
                "INSERT INTO todo_snapshots (session_id, todos, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(session_id) DO UPDATE SET todos = excluded.todos, updated_at = excluded.updated_at",
                params![session_id, todos_json, now_str],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_todos(&self, session_id: &str) -> Result<Vec<TodoItem>> {
        let session_id = session_id.to_string();
        let json: Option<String> = self
            .run_blocking(move |conn| {
                conn.query_row(
                    "SELECT todos FROM todo_snapshots WHERE session_id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(Into::into)
            })
            .await?;
        match json {
            Some(s) => Ok(serde_json::from_str(&s)?),
            None => Ok(Vec::new()),
        }
    }

    async fn list_pending(&self, session_id: &str) -> Result<Vec<TodoItem>> {
        Ok(self
            .list_todos(session_id)
            .await?
            .into_iter()
            .filter(|t| !matches!(t.status, crate::model::TodoStatus::Completed))
            .collect())
    }

    async fn list_recent_completed(&self, session_id: &str, k: usize) -> Result<Vec<TodoItem>> {
        let mut completed: Vec<TodoItem> = self
            .list_todos(session_id)
            .await?
            .into_iter()
            .filter(|t| matches!(t.status, crate::model::TodoStatus::Completed))
            .collect();
        completed.reverse();
        completed.truncate(k);
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewMessage, NewStep, TodoStatus};

    async fn store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn append_and_list_messages_preserve_order() {
        let s = store().await;
        s.append_message("sess1", NewMessage::user("hi")).await.unwrap();
        s.append_message("sess1", NewMessage::assistant_placeholder())
            .await
            .unwrap();
        let msgs = s.list_messages("sess1").await.unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[1].role, Role::Assistant);
        assert!(msgs[0].id < msgs[1].id);
    }

    #[tokio::test]
    async fn finalize_message_updates_in_place() {
        let s = store().await;
        let msg = s
            .append_message("sess1", NewMessage::assistant_placeholder())
            .await
            .unwrap();
        s.finalize_message(msg.id, "done", Some("because"), None)
            .await
            .unwrap();
        let msgs = s.list_messages("sess1").await.unwrap();
        assert_eq!(msgs[0].content, "done");
        assert_eq!(msgs[0].reasoning.as_deref(), Some("because"));
    }

    #[tokio::test]
    async fn tool_call_arguments_round_trip_byte_exact() {
        let s = store().await;
        let tool_calls = vec![ToolCallPayload {
            id: "call_1".into(),
            function_name: "write".into(),
            arguments: r#"{"b":2,"a":1}"#.into(),
        }];
        let msg = s
            .append_message(
                "sess1",
                NewMessage {
                    role: Role::Assistant,
                    content: String::new(),
                    reasoning: Some(String::new()),
                    tool_calls: Some(tool_calls.clone()),
                    tool_call_id: None,
                },
            )
            .await
            .unwrap();
        let fetched = s.list_messages("sess1").await.unwrap();
        let round_tripped = fetched.iter().find(|m| m.id == msg.id).unwrap();
        assert_eq!(
            round_tripped.tool_calls.as_ref().unwrap()[0].arguments,
            r#"{"b":2,"a":1}"#
        );
    }

    #[tokio::test]
    async fn steps_append_in_order_and_update_in_place() {
        let s = store().await;
        let msg = s
            .append_message("sess1", NewMessage::assistant_placeholder())
            .await
            .unwrap();
        let step = s
            .append_step(
                "sess1",
                NewStep {
                    message_id: msg.id,
                    user_id: "u1".into(),
                    iteration: 1,
                    progress: 15,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        s.update_step_reasoning(step.id, "A", 20).await.unwrap();
        s.update_step_reasoning(step.id, "AB", 25).await.unwrap();

        let steps = s.list_steps(msg.id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].reasoning.as_deref(), Some("AB"));
        assert_eq!(steps[0].progress, 25);
    }

    #[tokio::test]
    async fn finalize_step_sets_terminal_status() {
        let s = store().await;
        let msg = s
            .append_message("sess1", NewMessage::assistant_placeholder())
            .await
            .unwrap();
        let step = s
            .append_step(
                "sess1",
                NewStep {
                    message_id: msg.id,
                    user_id: "u1".into(),
                    iteration: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let finalized = s
            .finalize_step(step.id, StepStatus::Completed, 100, None, None)
            .await
            .unwrap();
        assert!(finalized.status.is_terminal());
        assert_eq!(finalized.progress, 100);
    }

    #[tokio::test]
    async fn todo_snapshot_replace_is_atomic() {
        let s = store().await;
        s.write_todos(
            "sess1",
            vec![TodoItem {
                content: "a".into(),
                active_form: "doing a".into(),
                status: TodoStatus::Pending,
            }],
        )
        .await
        .unwrap();
        s.write_todos(
            "sess1",
            vec![
                TodoItem {
                    content: "a".into(),
                    active_form: "doing a".into(),
                    status: TodoStatus::Completed,
                },
                TodoItem {
                    content: "b".into(),
                    active_form: "doing b".into(),
                    status: TodoStatus::Pending,
                },
            ],
        )
        .await
        .unwrap();
        let todos = s.list_todos("sess1").await.unwrap();
        assert_eq!(todos.len(), 2);
        assert_eq!(s.list_pending("sess1").await.unwrap().len(), 1);
        assert_eq!(s.list_recent_completed("sess1", 5).await.unwrap().len(), 1);
    }
}
