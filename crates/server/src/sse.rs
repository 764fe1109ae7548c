//! SSE endpoint (spec.md C10, §4.10). One task per connection; on connect
//! it emits a sync snapshot if a turn is mid-flight, then forwards live
//! events from the session's queue, falling back to a heartbeat `ping`
//! when the queue is quiet, until a terminal event closes the stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::stream::{self, Stream};
use serde_json::json;

use agent::{events, EventName};

use crate::handlers::ApiError;
use crate::state::AppState;

fn require_user_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or((
            axum::http::StatusCode::UNAUTHORIZED,
            "missing X-User-Id header".to_string(),
        ))
}

fn now_unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn to_sse_event(event: events::Event) -> Event {
    Event::default()
        .id(event.id.to_string())
        .event(event.name.as_str())
        .data(event.payload.to_string())
}

enum StreamState {
    Live {
        queue: events::SessionQueue,
        heartbeat: std::time::Duration,
        ping_count: u64,
        closed: bool,
    },
    Exhausted,
}

pub async fn stream_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_user_id(&headers)?;

    let sync_event = sync_snapshot(&state, &session_id).await?;
    let queue = events::get_or_create(&session_id, events::DEFAULT_CAPACITY);

    let initial = stream::iter(sync_event.into_iter().map(Ok::<_, Infallible>));
    let live = stream::unfold(
        StreamState::Live {
            queue,
            heartbeat: state.config.sse_heartbeat,
            ping_count: 0,
            closed: false,
        },
        |state| async move {
            let StreamState::Live {
                queue,
                heartbeat,
                mut ping_count,
                closed,
            } = state
            else {
                return None;
            };
            if closed {
                return None;
            }

            tokio::select! {
                event = queue.recv() => {
                    let terminal = event.name.is_terminal();
                    let sse_event = to_sse_event(event);
                    let next = StreamState::Live {
                        queue,
                        heartbeat,
                        ping_count,
                        closed: terminal,
                    };
                    Some((Ok::<_, Infallible>(sse_event), next))
                }
                _ = tokio::time::sleep(heartbeat) => {
                    ping_count += 1;
                    let payload = json!({ "ping": ping_count, "timestamp": now_unix_timestamp() });
                    let sse_event = Event::default().event(EventName::Ping.as_str()).data(payload.to_string());
                    let next = StreamState::Live {
                        queue,
                        heartbeat,
                        ping_count,
                        closed: false,
                    };
                    Some((Ok::<_, Infallible>(sse_event), next))
                }
            }
        },
    );

    let combined: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> =
        Box::pin(initial.chain(live));

    Ok(Sse::new(combined).keep_alive(KeepAlive::new().interval(state.config.sse_heartbeat).text("keep-alive")))
}

/// Step 1 of spec.md §4.10: if the latest assistant message's latest step
/// is non-terminal, emit a `sync` event up front so a reconnecting client
/// knows a turn is already in flight.
async fn sync_snapshot(state: &Arc<AppState>, session_id: &str) -> Result<Option<Event>, ApiError> {
    let Some(latest_message) = state
        .chat_history
        .latest_assistant_message(session_id)
        .await
        .map_err(|e| (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    else {
        return Ok(None);
    };

    let Some(latest_step) = state
        .steps
        .latest_step(latest_message.id)
        .await
        .map_err(|e| (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    else {
        return Ok(None);
    };

    let is_running = !latest_step.status.is_terminal();
    if !is_running {
        return Ok(None);
    }

    let payload = json!({
        "message_id": latest_message.id,
        "latest_step": latest_step,
        "is_running": is_running,
    });
    Ok(Some(
        Event::default().event(EventName::Sync.as_str()).data(payload.to_string()),
    ))
}
