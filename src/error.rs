use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Body of every rate limit rejection.
pub const RATE_LIMIT_MESSAGE: &str =
    "Too many requests from this IP, please try again in an hour!";

/// A validation failure attributed to one input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    /// One or more input fields failed validation.
    #[error("{}", join_messages(.0))]
    Validation(Vec<FieldError>),

    /// The username or email is already taken. The write had no effect.
    #[error("{message}")]
    UniquenessConflict {
        field: &'static str,
        message: &'static str,
    },

    /// Covers absent, mismatched and expired reset tokens alike, so the
    /// response cannot be used to test whether a token exists.
    #[error("Token is invalid or has expired")]
    TokenInvalidOrExpired,

    #[error("{}", RATE_LIMIT_MESSAGE)]
    RateLimitExceeded,

    #[error("Request body is larger than {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    NotFound(&'static str),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::TokenInvalidOrExpired | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::UniquenessConflict { .. } => StatusCode::CONFLICT,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn join_messages(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join(". ")
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a [FieldError]>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (kind, message) = if status.is_server_error() {
            error!(error = %self, "request failed");
            ("error", "Something went wrong".to_string())
        } else {
            ("fail", self.to_string())
        };
        let errors = match &self {
            Self::Validation(errors) => Some(errors.as_slice()),
            _ => None,
        };
        let body = ErrorBody {
            status: kind,
            message,
            errors,
        };
        (status, Json(body)).into_response()
    }
}
