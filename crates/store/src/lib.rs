//! Durable storage for chat history, execution steps, and todo snapshots
//! (spec.md C2, C4, C5). A single [`sqlite::SqliteStore`] backs all three
//! store traits against one SQLite database, the way the teacher's
//! `SqliteSessionStore` backs session state.

pub mod chat_history;
pub mod error;
pub mod model;
pub mod sqlite;
pub mod step_store;
pub mod task_store;

pub use chat_history::ChatHistoryStore;
pub use error::{Result, StoreError};
pub use model::{
    ExecutionStep, Message, NewMessage, NewStep, Role, StepStatus, TodoCounts, TodoItem,
    TodoStatus, ToolCallPayload,
};
pub use sqlite::SqliteStore;
pub use step_store::StepStore;
pub use task_store::TaskStore;
