use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("no capacity at carwash {carwash_id} for window starting {window_start}")]
    CapacityExceeded {
        carwash_id: Uuid,
        window_start: DateTime<Utc>,
    },

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("verification code does not match")]
    InvalidVerificationCode,

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("assignment conflict: {0}")]
    AssignmentConflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Machine-readable code carried in every error body so clients can
    /// branch without parsing messages.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::CapacityExceeded { .. } => "capacity_exceeded",
            AppError::PreconditionFailed(_) => "precondition_failed",
            AppError::InvalidVerificationCode => "invalid_verification_code",
            AppError::StateConflict(_) => "state_conflict",
            AppError::AssignmentConflict(_) => "assignment_conflict",
            AppError::Internal(_) => "internal",
        }
    }

    /// Outcome label for the transition metrics.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            AppError::StateConflict(_) => "conflict",
            AppError::InvalidVerificationCode => "bad_code",
            AppError::CapacityExceeded { .. } => "capacity",
            _ => "rejected",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::CapacityExceeded { .. } => StatusCode::CONFLICT,
            AppError::PreconditionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidVerificationCode => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::StateConflict(_) => StatusCode::CONFLICT,
            AppError::AssignmentConflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}
