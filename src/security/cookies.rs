use std::{collections::HashMap, convert::Infallible};

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use tracing::debug;
use url::form_urlencoded;

/// Prefix marking a JSON-encoded cookie value.
const JSON_PREFIX: &str = "j:";

/// Percent-decodes a cookie value. `+` is literal in cookies, unlike forms.
/// Values that do not decode to UTF-8 are kept as sent.
fn decode_value(raw: &str) -> String {
    if !raw.contains('%') {
        return raw.to_string();
    }
    let escaped = raw.replace('+', "%2B").replace('&', "%26");
    let pair = format!("v={escaped}");
    let decoded = form_urlencoded::parse(pair.as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default();
    if decoded.contains('\u{FFFD}') && !raw.contains("%EF%BF%BD") {
        return raw.to_string();
    }
    decoded
}

/// Cookies sent with the request, by name. Later duplicates do not replace
/// earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookies(HashMap<String, String>);

impl Cookies {
    pub fn parse(headers: &HeaderMap) -> Self {
        let mut jar = HashMap::new();
        for value in headers.get_all(header::COOKIE) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            for pair in value.split(';') {
                let Some((name, raw)) = pair.split_once('=') else {
                    continue;
                };
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let raw = raw.trim();
                let raw = raw
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(raw);
                jar.entry(name.to_string()).or_insert_with(|| decode_value(raw));
            }
        }
        Self(jar)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Parses a `j:`-prefixed value as JSON. Other values, and JSON that
    /// does not parse, yield `None`.
    pub fn json(&self, name: &str) -> Option<Value> {
        let raw = self.get(name)?.strip_prefix(JSON_PREFIX)?;
        serde_json::from_str(raw).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub async fn parse_cookies(mut request: Request, next: Next) -> Response {
    let cookies = Cookies::parse(request.headers());
    if !cookies.is_empty() {
        debug!(names = ?cookies.0.keys().collect::<Vec<_>>(), "cookies received");
    }
    request.extensions_mut().insert(cookies);
    next.run(request).await
}

#[async_trait]
impl<S> FromRequestParts<S> for Cookies
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Cookies>()
            .cloned()
            .unwrap_or_else(|| Cookies::parse(&parts.headers)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_pairs_across_headers() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("jwt=abc.def; theme=\"dark\""));
        headers.append(header::COOKIE, HeaderValue::from_static("jwt=other; lang=en"));
        let cookies = Cookies::parse(&headers);
        assert_eq!(cookies.get("jwt"), Some("abc.def"));
        assert_eq!(cookies.get("theme"), Some("dark"));
        assert_eq!(cookies.get("lang"), Some("en"));
        assert_eq!(cookies.0.len(), 3);
    }

    #[test]
    fn values_are_percent_decoded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("name=Ada%20Lovelace; sum=1+1%3D2; amp=a%26b; bad=%FF%FE"),
        );
        let cookies = Cookies::parse(&headers);
        assert_eq!(cookies.get("name"), Some("Ada Lovelace"));
        assert_eq!(cookies.get("sum"), Some("1+1=2"));
        assert_eq!(cookies.get("amp"), Some("a&b"));
        assert_eq!(cookies.get("bad"), Some("%FF%FE"));
    }

    #[test]
    fn json_cookies_are_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("prefs=j%3A%7B%22theme%22%3A%22dark%22%7D; plain=x; broken=j%3A%7B"),
        );
        let cookies = Cookies::parse(&headers);
        assert_eq!(cookies.get("prefs"), Some("j:{\"theme\":\"dark\"}"));
        assert_eq!(cookies.json("prefs").unwrap()["theme"], "dark");
        assert!(cookies.json("plain").is_none());
        assert!(cookies.json("broken").is_none());
        assert!(cookies.json("missing").is_none());
    }

    #[test]
    fn ignores_malformed_fragments() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("novalue; =x; ok=1;"));
        let cookies = Cookies::parse(&headers);
        assert_eq!(cookies.0.len(), 1);
        assert_eq!(cookies.get("ok"), Some("1"));
        assert!(Cookies::parse(&HeaderMap::new()).is_empty());
    }
}
