use async_trait::async_trait;
use serde_json::json;
use store::{TodoCounts, TodoItem, TodoStatus};

use crate::error::ToolError;
use crate::tools::context::ToolContext;
use crate::tools::registry::Tool;

pub struct TodoTool;

#[async_trait]
impl Tool for TodoTool {
    fn name(&self) -> &'static str {
        "todo"
    }

    fn description(&self) -> &'static str {
        "Replace the session's entire todo list in one atomic snapshot write. \
         Always pass every item, not just the ones that changed."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": { "type": "string" },
                            "activeForm": { "type": "string" },
                            "status": { "type": "string", "enum": ["pending", "in_progress", "completed"] }
                        },
                        "required": ["content", "activeForm", "status"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let raw_todos = args
            .get("todos")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| ToolError::InvalidRequest("todos is required".to_string()))?;

        let mut todos = Vec::with_capacity(raw_todos.len());
        for item in raw_todos {
            let content = item
                .get("content")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| ToolError::InvalidRequest("todo item missing content".to_string()))?
                .to_string();
            let active_form = item
                .get("activeForm")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| ToolError::InvalidRequest("todo item missing activeForm".to_string()))?
                .to_string();
            let status_str = item
                .get("status")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| ToolError::InvalidRequest("todo item missing status".to_string()))?;
            let status = match status_str {
                "pending" => TodoStatus::Pending,
                "in_progress" => TodoStatus::InProgress,
                "completed" => TodoStatus::Completed,
                other => {
                    return Err(ToolError::InvalidRequest(format!("unknown todo status: {other}")))
                }
            };
            todos.push(TodoItem {
                content,
                active_form,
                status,
            });
        }

        let counts = TodoCounts::from_items(&todos);
        ctx.task_store.write_todos(&ctx.session_id, todos).await?;

        Ok(serde_json::to_string(&json!({
            "total": counts.total,
            "completed": counts.completed,
            "in_progress": counts.in_progress,
            "pending": counts.pending,
        }))
        .expect("json summary is always serializable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::test_context;

    #[tokio::test]
    async fn snapshot_replace_reports_counts() {
        let (ctx, _tmp) = test_context().await;
        let out = TodoTool
            .execute(
                json!({"todos": [
                    {"content": "a", "activeForm": "doing a", "status": "completed"},
                    {"content": "b", "activeForm": "doing b", "status": "pending"},
                ]}),
                &ctx,
            )
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["total"], 2);
        assert_eq!(parsed["completed"], 1);
        assert_eq!(parsed["pending"], 1);
    }

    #[tokio::test]
    async fn rejects_unknown_status() {
        let (ctx, _tmp) = test_context().await;
        let err = TodoTool
            .execute(
                json!({"todos": [{"content": "a", "activeForm": "doing a", "status": "done"}]}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidRequest(_)));
    }
}
