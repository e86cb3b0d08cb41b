use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::response::Html;
use axum::Json;
use futures_util::stream::{BoxStream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use super::error::ApiError;
use super::AppState;
use crate::models::types::{PendingTurn, SessionId, UploadedImage};
use crate::services::renderer::RenderFrame;
use crate::services::sessions::{SessionHandle, SessionSnapshot};

const INDEX_HTML: &str = include_str!("index.html");

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health() -> &'static str {
    "ok"
}

fn lookup(state: &AppState, id: &str) -> Result<(SessionId, SessionHandle), ApiError> {
    let id = SessionId::from(id);
    let session = state.sessions.get(&id).ok_or(ApiError::SessionNotFound)?;
    Ok((id, session))
}

pub async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let id = state.sessions.create();
    (StatusCode::CREATED, Json(json!({ "id": id })))
}

pub async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.remove(&SessionId::from(id)) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::SessionNotFound)
    }
}

pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let (_, session) = lookup(&state, &id)?;
    let mut session = session.lock().await;
    session.touch();
    Ok(Json(session.snapshot()))
}

/// Clears the visible transcript. The remote context survives unless
/// `session.clear_resets_context` is enabled.
pub async fn clear(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let (id, session) = lookup(&state, &id)?;
    let mut session = session.try_lock().map_err(|_| ApiError::TurnInFlight)?;
    session.clear(state.sessions.clear_resets_context());
    info!(session = %id, context_messages = session.conversation.len(), "transcript cleared");
    Ok(Json(session.snapshot()))
}

/// Reads the `question` text field and the optional `image` file field.
async fn read_pending_turn(mut multipart: Multipart) -> Result<PendingTurn, ApiError> {
    let mut question = String::new();
    let mut image = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("question") => question = field.text().await?,
            Some("image") => {
                let file_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await?;
                let upload = UploadedImage::builder().bytes(bytes.to_vec()).maybe_file_name(file_name).build();
                // пустое поле файла браузер шлёт, когда картинка не выбрана
                image = (!upload.is_empty()).then_some(upload);
            }
            other => {
                return Err(ApiError::BadRequest(format!("unexpected field {:?}", other.unwrap_or(""))));
            }
        }
    }
    Ok(PendingTurn::builder().question(question).maybe_image(image).build())
}

fn to_event(frame: RenderFrame) -> Result<Event, Infallible> {
    let data = serde_json::to_string(&frame).unwrap_or_else(|_| "{}".to_string());
    Ok(Event::default().event(frame.kind()).data(data))
}

/// Runs one turn and streams its frames back as server-sent events.
pub async fn submit_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Sse<KeepAliveStream<BoxStream<'static, Result<Event, Infallible>>>>, ApiError> {
    let (id, session) = lookup(&state, &id)?;
    let turn = read_pending_turn(multipart).await?;
    let mut guard = Arc::clone(&session).try_lock_owned().map_err(|_| ApiError::TurnInFlight)?;

    let (tx, rx) = mpsc::channel(state.frame_buffer);
    let pipeline = Arc::clone(&state.pipeline);
    info!(session = %id, "turn accepted");
    tokio::spawn(async move {
        pipeline.run_turn(&mut guard, turn, tx).await;
    });

    let stream = ReceiverStream::new(rx).map(to_event).boxed();
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
