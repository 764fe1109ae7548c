//! Fixed tool set, keyed by name (spec.md C3).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use provider::ToolSpec;

use crate::error::ToolError;
use crate::tools::context::ToolContext;

/// A single named tool: a JSON-schema description for the model plus an
/// async executor. Tools are pure functions of (args, session state) — no
/// tool holds state beyond what lives in the sandbox or task store.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> serde_json::Value;

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<String, ToolError>;

    fn definition(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Registry of available tools, keyed by name. Dispatch is a direct
/// lookup (spec.md §4.3: "the registry is keyed by name").
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.insert(tool.name(), tool);
        self
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn definitions(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }
}
