//! Single-page chat UI and its JSON/SSE endpoints.

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use bon::Builder;

use crate::services::pipeline::ChatPipeline;
use crate::services::sessions::SessionManager;

#[derive(Clone, Builder)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub pipeline: Arc<ChatPipeline>,
    #[builder(default = 64)]
    pub frame_buffer: usize,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/api/sessions", post(handlers::create_session))
        .route("/api/sessions/{id}", delete(handlers::close_session))
        .route("/api/sessions/{id}/history", get(handlers::history))
        .route("/api/sessions/{id}/clear", post(handlers::clear))
        .route("/api/sessions/{id}/turns", post(handlers::submit_turn))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}
