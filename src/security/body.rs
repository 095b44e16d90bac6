use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::error::AppError;

/// Request bodies the pipeline inspects and rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Form,
    Other,
}

impl BodyKind {
    pub fn of(headers: &HeaderMap) -> Self {
        let Some(content_type) = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        else {
            return Self::Other;
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if mime == "application/json" || mime.ends_with("+json") {
            Self::Json
        } else if mime == "application/x-www-form-urlencoded" {
            Self::Form
        } else {
            Self::Other
        }
    }
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Checks an already buffered body for well-formedness.
pub fn check_well_formed(kind: BodyKind, bytes: &[u8]) -> Result<(), AppError> {
    if bytes.is_empty() {
        return Ok(());
    }
    match kind {
        BodyKind::Json => serde_json::from_slice::<serde_json::Value>(bytes)
            .map(|_| ())
            .map_err(|e| AppError::BadRequest(format!("Malformed JSON body: {e}"))),
        BodyKind::Form => std::str::from_utf8(bytes)
            .map(|_| ())
            .map_err(|_| AppError::BadRequest("Form body is not valid UTF-8".into())),
        BodyKind::Other => Ok(()),
    }
}

async fn buffer(request: Request, limit: usize) -> Result<Request, AppError> {
    let kind = BodyKind::of(request.headers());
    if kind == BodyKind::Other {
        return Ok(request);
    }
    if declared_length(request.headers()).is_some_and(|len| len > limit) {
        return Err(AppError::PayloadTooLarge { limit });
    }

    let (parts, body) = request.into_parts();
    let bytes: Bytes = axum::body::to_bytes(body, limit).await.map_err(|e| {
        debug!(error = %e, "request body rejected while buffering");
        AppError::PayloadTooLarge { limit }
    })?;
    check_well_formed(kind, &bytes)?;
    Ok(Request::from_parts(parts, Body::from(bytes)))
}

/// Buffers JSON and form bodies up to `limit` bytes.
pub async fn buffer_body(State(limit): State<usize>, request: Request, next: Next) -> Response {
    match buffer(request, limit).await {
        Ok(request) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}
