//! HTTP handlers for the core-facing surface of spec.md §6. Session
//! ownership/public-read checks and token verification belong to the
//! external auth collaborator (spec.md §1 Non-goals); this layer only
//! requires an `X-User-Id` header identifying the caller, the way the
//! corpus's services treat a bearer token as an opaque pass-through.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use agent::{AgentLoop, AgentLoopConfig, AssemblerConfig};
use sandbox::Sandbox;
use store::{ExecutionStep, Message, NewMessage};

use crate::state::AppState;

pub type ApiError = (StatusCode, String);

fn require_user_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or((StatusCode::UNAUTHORIZED, "missing X-User-Id header".to_string()))
}

fn store_err(e: store::StoreError) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn sandbox_err(e: sandbox::SandboxError) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[derive(Deserialize)]
pub struct CreateMessageRequest {
    pub content: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// `POST /api/sessions/{session_id}/messages` — spec.md §6 + §4.8.
///
/// Persists the user message, creates an empty assistant message, spawns
/// the agent loop as a background task, and returns the assistant row
/// immediately so the client can start listening on the SSE stream.
pub async fn create_message(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CreateMessageRequest>,
) -> Result<Json<Message>, ApiError> {
    let user_id = require_user_id(&headers)?;

    if !state.config.enable_agent_loop {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "agent loop is disabled".to_string(),
        ));
    }

    let content = agent::cap_user_input(
        &req.content,
        state.config.max_user_input_length,
        &state.config.truncation_warning_message,
    );

    state
        .chat_history
        .append_message(&session_id, NewMessage::user(content))
        .await
        .map_err(store_err)?;

    let assistant_message = state
        .chat_history
        .append_message(&session_id, NewMessage::assistant_placeholder())
        .await
        .map_err(store_err)?;

    let sandbox = Sandbox::new(state.sandbox_config.clone(), user_id.clone(), session_id.clone());
    if tokio::fs::metadata(sandbox.root()).await.is_err() {
        sandbox.initialize().await.map_err(sandbox_err)?;
    }

    let agent_loop = AgentLoop::new(
        state.chat_history.clone(),
        state.steps.clone(),
        state.tasks.clone(),
        state.provider.clone(),
        state.tool_registry(),
        Arc::new(sandbox),
        AssemblerConfig {
            max_history_messages: state.config.max_history_messages,
            enable_truncation: state.config.enable_message_truncation,
            ..AssemblerConfig::default()
        },
        AgentLoopConfig {
            max_iterations: 100,
            tool_timeout: state.config.tool_execution_timeout,
            event_queue_capacity: agent::events::DEFAULT_CAPACITY,
            max_tool_calls_per_message: state.config.max_tool_calls_per_message,
        },
    );

    let assistant_message_id = assistant_message.id;
    let loop_session_id = session_id.clone();
    let span = tracing::info_span!("agent_turn", session_id = %loop_session_id, message_id = assistant_message_id);
    tokio::spawn(async move {
        use tracing::Instrument;
        agent_loop
            .run(&loop_session_id, &user_id, assistant_message_id)
            .instrument(span)
            .await;
    });

    Ok(Json(assistant_message))
}

/// `GET /api/sessions/{session_id}/messages`
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<Message>>, ApiError> {
    require_user_id(&headers)?;
    let messages = state
        .chat_history
        .list_messages(&session_id)
        .await
        .map_err(store_err)?;
    Ok(Json(messages))
}

/// `GET /api/sessions/{session_id}/messages/{message_id}/execution-steps`
pub async fn list_execution_steps(
    State(state): State<Arc<AppState>>,
    Path((session_id, message_id)): Path<(String, i64)>,
    headers: HeaderMap,
) -> Result<Json<Vec<ExecutionStep>>, ApiError> {
    let _ = session_id;
    require_user_id(&headers)?;
    let steps = state.steps.list_steps(message_id).await.map_err(store_err)?;
    Ok(Json(steps))
}

/// `GET /api/sessions/{session_id}/messages/_internal/latest/execution-steps`
pub async fn latest_execution_steps(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<ExecutionStep>>, ApiError> {
    require_user_id(&headers)?;
    let Some(latest) = state
        .chat_history
        .latest_assistant_message(&session_id)
        .await
        .map_err(store_err)?
    else {
        return Ok(Json(Vec::new()));
    };
    let steps = state.steps.list_steps(latest.id).await.map_err(store_err)?;
    Ok(Json(steps))
}
