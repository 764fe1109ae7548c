mod bash;
mod check;
mod list;
mod read;
mod todo;
mod write;

pub use bash::BashTool;
pub use check::CheckTool;
pub use list::ListTool;
pub use read::ReadTool;
pub use todo::TodoTool;
pub use write::WriteTool;

use std::sync::Arc;

use crate::tools::registry::ToolRegistry;

/// The fixed tool set of spec.md §4.3, registered in a fresh registry.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(ListTool))
        .register(Arc::new(ReadTool))
        .register(Arc::new(WriteTool))
        .register(Arc::new(BashTool))
        .register(Arc::new(CheckTool))
        .register(Arc::new(TodoTool));
    registry
}
