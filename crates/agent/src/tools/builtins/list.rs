use async_trait::async_trait;
use serde_json::json;

use crate::error::ToolError;
use crate::tools::context::ToolContext;
use crate::tools::registry::Tool;

pub struct ListTool;

#[async_trait]
impl Tool for ListTool {
    fn name(&self) -> &'static str {
        "list"
    }

    fn description(&self) -> &'static str {
        "List every file currently in the session's sandbox, sorted alphabetically."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    async fn execute(&self, _args: serde_json::Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let names = ctx.sandbox.list().await?;
        if names.is_empty() {
            return Ok("(no files yet)".to_string());
        }
        Ok(names.iter().map(|n| format!("- {n}")).collect::<Vec<_>>().join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::test_context;

    #[tokio::test]
    async fn lists_seeded_files_sorted() {
        let (ctx, _tmp) = test_context().await;
        ctx.sandbox.initialize().await.unwrap();
        let out = ListTool.execute(json!({}), &ctx).await.unwrap();
        assert_eq!(out, "- index.html\n- script.js\n- style.css");
    }

    #[tokio::test]
    async fn empty_sandbox_reports_no_files() {
        let (ctx, _tmp) = test_context().await;
        let out = ListTool.execute(json!({}), &ctx).await.unwrap();
        assert_eq!(out, "(no files yet)");
    }
}
