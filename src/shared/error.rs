use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

/// Error taxonomy for every engine operation. Validation and conflict
/// variants carry the message shown to the caller; infrastructure variants
/// are logged server-side and surfaced as a generic retry message.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("could not allocate a queue number, please try again")]
    Allocation,

    #[error("too many requests, please wait before trying again")]
    RateLimited,

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl QueueError {
    pub fn validation(msg: impl Into<String>) -> Self {
        QueueError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        QueueError::Conflict(msg.into())
    }
}

impl IntoResponse for QueueError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            QueueError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            QueueError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            QueueError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            QueueError::Allocation => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            QueueError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            QueueError::Database(e) => {
                error!("database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "something went wrong, please try again".to_string(),
                )
            }
            QueueError::Pool(e) => {
                error!("connection pool error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "something went wrong, please try again".to_string(),
                )
            }
            QueueError::Task(e) => {
                error!("blocking task failed: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "something went wrong, please try again".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
