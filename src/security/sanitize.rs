use std::borrow::Cow;

use axum::{
    body::Body,
    extract::Request,
    http::{header, uri::PathAndQuery, HeaderValue, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::debug;
use url::form_urlencoded;

use crate::{error::AppError, security::body::BodyKind};

/// A rewrite applied to every key and string value a client controls.
pub trait Rewrite {
    fn keep_key(&self, _key: &str) -> bool {
        true
    }

    fn rewrite_value<'a>(&self, value: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(value)
    }
}

/// Drops keys that a document store would read as query operators.
pub struct StripOperators;

impl Rewrite for StripOperators {
    /// `a[$ne]` is split into `a` and `$ne`; any segment starting with `$`
    /// or containing `.` drops the whole key.
    fn keep_key(&self, key: &str) -> bool {
        !key
            .split(['[', ']'])
            .any(|segment| segment.starts_with('$') || segment.contains('.'))
    }
}

/// HTML-escapes angle brackets in string values.
pub struct EscapeMarkup;

impl Rewrite for EscapeMarkup {
    fn rewrite_value<'a>(&self, value: &'a str) -> Cow<'a, str> {
        if !value.contains(['<', '>']) {
            return Cow::Borrowed(value);
        }
        Cow::Owned(value.replace('<', "&lt;").replace('>', "&gt;"))
    }
}

pub fn rewrite_json<R: Rewrite>(value: &mut Value, rewrite: &R) {
    match value {
        Value::Object(map) => {
            map.retain(|key, _| rewrite.keep_key(key));
            for nested in map.values_mut() {
                rewrite_json(nested, rewrite);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_json(item, rewrite);
            }
        }
        Value::String(s) => {
            let rewritten = match rewrite.rewrite_value(s) {
                Cow::Borrowed(_) => None,
                Cow::Owned(v) => Some(v),
            };
            if let Some(v) = rewritten {
                *s = v;
            }
        }
        _ => {}
    }
}

/// Rewrites `application/x-www-form-urlencoded` pairs; also used for query strings.
pub fn rewrite_pairs<R: Rewrite>(input: &str, rewrite: &R) -> String {
    let mut out = form_urlencoded::Serializer::new(String::new());
    for (key, value) in form_urlencoded::parse(input.as_bytes()) {
        if rewrite.keep_key(&key) {
            out.append_pair(&key, &rewrite.rewrite_value(&value));
        }
    }
    out.finish()
}

fn rewrite_uri<R: Rewrite>(uri: &Uri, rewrite: &R) -> Result<Option<Uri>, AppError> {
    let Some(query) = uri.query() else {
        return Ok(None);
    };
    let rewritten = rewrite_pairs(query, rewrite);
    if rewritten == query {
        return Ok(None);
    }

    let path_and_query = if rewritten.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{}", uri.path(), rewritten)
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(
        PathAndQuery::try_from(path_and_query)
            .map_err(|e| AppError::BadRequest(format!("Invalid query string: {e}")))?,
    );
    Uri::from_parts(parts)
        .map(Some)
        .map_err(|e| AppError::BadRequest(format!("Invalid request URI: {e}")))
}

async fn rewrite_request<R: Rewrite>(mut request: Request, rewrite: &R) -> Result<Request, AppError> {
    if let Some(uri) = rewrite_uri(request.uri(), rewrite)? {
        debug!(from = %request.uri(), to = %uri, "query string rewritten");
        *request.uri_mut() = uri;
    }

    let kind = BodyKind::of(request.headers());
    if kind == BodyKind::Other {
        return Ok(request);
    }

    // Already buffered and capped by the body stage.
    let (mut parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| AppError::BadRequest(format!("Unreadable request body: {e}")))?;
    if bytes.is_empty() {
        return Ok(Request::from_parts(parts, Body::from(bytes)));
    }

    let rewritten = match kind {
        BodyKind::Json => {
            let mut value: Value = serde_json::from_slice(&bytes)
                .map_err(|e| AppError::BadRequest(format!("Malformed JSON body: {e}")))?;
            rewrite_json(&mut value, rewrite);
            serde_json::to_vec(&value).map_err(anyhow::Error::from)?
        }
        BodyKind::Form => {
            let text = std::str::from_utf8(&bytes)
                .map_err(|_| AppError::BadRequest("Form body is not valid UTF-8".into()))?;
            rewrite_pairs(text, rewrite).into_bytes()
        }
        BodyKind::Other => bytes.to_vec(),
    };

    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(rewritten.len()));
    Ok(Request::from_parts(parts, Body::from(rewritten)))
}

pub async fn strip_operator_keys(request: Request, next: Next) -> Response {
    match rewrite_request(request, &StripOperators).await {
        Ok(request) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

pub async fn escape_markup(request: Request, next: Next) -> Response {
    match rewrite_request(request, &EscapeMarkup).await {
        Ok(request) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}
