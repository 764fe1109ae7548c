use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("stream disconnected before a terminal event: {0}")]
    StreamDisconnected(String),
    #[error("provider returned an error response: {0}")]
    Provider(String),
    #[error("malformed stream chunk: {message} (raw: {raw})")]
    MalformedChunk { message: String, raw: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transport(e.to_string())
    }
}
