//! Shared process state handed to every handler via axum's `State` extractor.

use std::sync::Arc;

use agent::ToolRegistry;
use provider::ChatProvider;
use sandbox::SandboxConfig;
use store::{ChatHistoryStore, StepStore, TaskStore};

use crate::config::Config;

pub struct AppState {
    pub chat_history: Arc<dyn ChatHistoryStore>,
    pub steps: Arc<dyn StepStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub provider: Arc<dyn ChatProvider>,
    pub sandbox_config: SandboxConfig,
    pub config: Config,
}

impl AppState {
    /// A fresh copy of the fixed tool set for one turn. Registries are
    /// cheap (a handful of `Arc` clones behind a `HashMap`) so there is no
    /// need to share one across turns.
    pub fn tool_registry(&self) -> ToolRegistry {
        agent::default_registry()
    }
}
