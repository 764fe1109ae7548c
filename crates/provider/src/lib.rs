//! Streaming client for a reasoning chat model (spec.md C7). A single
//! operation, `stream`, yields reasoning deltas as they arrive and
//! terminates with either a `tool_calls` or a `done` event.

pub mod error;
pub mod event;
pub mod http_client;
pub mod sse;
pub mod wire;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

pub use error::{ProviderError, Result};
pub use event::StreamEvent;
pub use http_client::HttpChatProvider;
pub use wire::{ChatMessage, Role, ToolCall, ToolSpec};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Streaming interface to a reasoning chat model (spec.md §4.7).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stream a completion for `messages` given the available `tools`.
    /// On any transport error, implementations fall back to a single
    /// non-streaming call and yield one `Done` event rather than
    /// propagating the error, so the agent loop always sees a terminal
    /// event for a turn it started.
    async fn stream(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<EventStream>;
}
