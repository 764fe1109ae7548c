//! Tool registry, prompt assembler, event bus, and agent loop — the parts
//! of the agent execution engine that sit between the provider client and
//! the HTTP surface (spec.md C3, C6, C8, C9).

pub mod error;
pub mod events;
pub mod execution;
pub mod prompt;
pub mod tools;

pub use error::{AgentError, ToolError};
pub use events::{Event, EventName, SessionQueue};
pub use execution::{AgentLoop, AgentLoopConfig};
pub use prompt::{cap_user_input, AssemblerConfig, DEFAULT_SYSTEM_PROMPT};
pub use tools::{builtins::default_registry, Tool, ToolContext, ToolRegistry};
