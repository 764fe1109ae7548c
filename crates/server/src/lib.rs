//! Axum wiring for the agent execution engine's HTTP surface (spec.md §6,
//! C10). `main.rs` owns process startup; everything here is the router
//! and the handlers it dispatches to.

pub mod config;
pub mod handlers;
pub mod sse;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/healthz", get(handlers::healthz))
        .route(
            "/api/sessions/:session_id/messages",
            post(handlers::create_message).get(handlers::list_messages),
        )
        .route(
            "/api/sessions/:session_id/messages/stream",
            get(sse::stream_session),
        )
        .route(
            "/api/sessions/:session_id/messages/_internal/latest/execution-steps",
            get(handlers::latest_execution_steps),
        )
        .route(
            "/api/sessions/:session_id/messages/:message_id/execution-steps",
            get(handlers::list_execution_steps),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
