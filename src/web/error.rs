use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use derive_more::Display;
use serde_json::json;

#[derive(Debug, Display)]
pub enum ApiError {
    #[display("session not found")]
    SessionNotFound,
    #[display("a turn is already in progress for this session")]
    TurnInFlight,
    #[display("invalid upload: {_0}")]
    Multipart(MultipartError),
    #[display("{_0}")]
    BadRequest(String),
}

impl std::error::Error for ApiError {}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::Multipart(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::SessionNotFound => StatusCode::NOT_FOUND,
            ApiError::TurnInFlight => StatusCode::CONFLICT,
            ApiError::Multipart(e) => e.status(),
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(%status, error = %self, "api error");
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
