use std::convert::Infallible;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use time::OffsetDateTime;

/// When the request entered the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTime(pub OffsetDateTime);

pub async fn stamp(mut request: Request, next: Next) -> Response {
    request
        .extensions_mut()
        .insert(RequestTime(OffsetDateTime::now_utc()));
    next.run(request).await
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestTime
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    /// Falls back to the current time when the stamping layer is absent.
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestTime>()
            .copied()
            .unwrap_or_else(|| RequestTime(OffsetDateTime::now_utc())))
    }
}
