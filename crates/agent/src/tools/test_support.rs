//! Shared fixtures for builtin tool tests.

use std::sync::Arc;

use sandbox::{Sandbox, SandboxConfig};
use store::SqliteStore;
use tempfile::TempDir;

use crate::tools::context::ToolContext;

pub async fn test_context() -> (ToolContext, TempDir) {
    let tmp = TempDir::new().unwrap();
    let config = SandboxConfig::new(tmp.path());
    let sandbox = Arc::new(Sandbox::new(config, "user1", "session1"));
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let ctx = ToolContext::new(
        "session1",
        "user1",
        sandbox,
        store,
        std::time::Duration::from_secs(30),
    );
    (ctx, tmp)
}
