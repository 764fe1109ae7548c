use async_trait::async_trait;
use serde_json::json;

use crate::error::ToolError;
use crate::tools::context::{require_filename_arg, ToolContext};
use crate::tools::registry::Tool;

pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &'static str {
        "read"
    }

    fn description(&self) -> &'static str {
        "Read a file from the session's sandbox and return its contents."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "filename": { "type": "string", "description": "Name of the file to read." }
            },
            "required": ["filename"]
        })
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let filename = require_filename_arg(&args, "filename")?;
        Ok(ctx.sandbox.read(&filename).await?)
    }
}
