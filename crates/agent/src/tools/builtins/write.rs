use async_trait::async_trait;
use serde_json::json;

use crate::error::ToolError;
use crate::tools::context::{require_filename_arg, ToolContext};
use crate::tools::registry::Tool;

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &'static str {
        "write"
    }

    fn description(&self) -> &'static str {
        "Create or overwrite a file in the session's sandbox."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "filename": { "type": "string", "description": "Name of the file to write." },
                "content": { "type": "string", "description": "Full new content of the file." }
            },
            "required": ["filename", "content"]
        })
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let filename = require_filename_arg(&args, "filename")?;
        let content = args
            .get("content")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ToolError::InvalidRequest("content is required".to_string()))?;

        ctx.sandbox.write(&filename, content.as_bytes()).await?;
        Ok(format!("wrote {} bytes to {filename}", content.len()))
    }
}
