use thiserror::Error;

/// Tool-layer error taxonomy (spec.md §7, items 1–5). Tool errors never
/// abort the loop — they are turned into a `tool` message so the model
/// can self-correct (spec.md §4.8 step 5e).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("command not allowed: {0}")]
    DisallowedCommand(String),
    #[error("tool timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("internal tool error: {0}")]
    Internal(String),
}

impl From<sandbox::SandboxError> for ToolError {
    fn from(e: sandbox::SandboxError) -> Self {
        use sandbox::SandboxError as S;
        match e {
            S::InvalidName(msg) => ToolError::InvalidRequest(msg),
            S::QuotaExceeded(msg) => ToolError::QuotaExceeded(msg),
            S::NotFound(msg) => ToolError::InvalidRequest(msg),
            S::NotUtf8(msg) => ToolError::InvalidRequest(msg),
            S::Io(e) => ToolError::Internal(e.to_string()),
        }
    }
}

impl From<store::StoreError> for ToolError {
    fn from(e: store::StoreError) -> Self {
        ToolError::Internal(e.to_string())
    }
}

/// Loop-layer error taxonomy (spec.md §7, items 6–7). These terminate a
/// turn with an `error` event; they never originate from tool execution.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("provider transport error: {0}")]
    ProviderTransport(#[from] provider::ProviderError),
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
    #[error("sandbox error: {0}")]
    Sandbox(#[from] sandbox::SandboxError),
    #[error("protocol error: {0}")]
    Protocol(String),
}
