use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    InvalidOperation(String),

    #[error("room {0} is archived")]
    ArchivedRoom(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("storage unavailable: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("session store unavailable: {0}")]
    Session(#[from] tower_sessions::session::Error),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        use AppError::*;
        match self {
            Validation(_) => "validation_error",
            NotFound(_) => "not_found_error",
            Conflict(_) => "conflict_error",
            Forbidden(_) => "forbidden_error",
            InvalidOperation(_) => "invalid_operation_error",
            ArchivedRoom(_) => "archived_room_error",
            Unauthenticated(_) => "unauthenticated",
            Storage(_) | Session(_) => "infrastructure_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        use AppError::*;
        match self {
            Validation(_) => StatusCode::BAD_REQUEST,
            NotFound(_) => StatusCode::NOT_FOUND,
            Conflict(_) => StatusCode::CONFLICT,
            Forbidden(_) => StatusCode::FORBIDDEN,
            InvalidOperation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ArchivedRoom(_) => StatusCode::GONE,
            Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Storage(_) | Session(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn is_infrastructure(&self) -> bool {
        matches!(self, AppError::Storage(_) | AppError::Session(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.is_infrastructure() {
            tracing::error!(error = %self, "request failed on infrastructure");
        }

        (
            self.status(),
            Json(json!({
                "success": false,
                "kind": self.kind(),
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}
