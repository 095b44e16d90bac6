//! Request hardening applied in front of every route.
//!
//! Stages run outermost first: client IP resolution, baseline response
//! headers, Content-Security-Policy, development request tracing, per-IP
//! rate limiting on the API prefix, body buffering with a size cap, cookie
//! parsing, operator-key stripping, markup escaping and request-time
//! stamping. Handlers therefore only see sanitized input.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Request},
    middleware::{from_fn, from_fn_with_state},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{info, Span};

use crate::config::{Profile, SecurityConfig};

pub mod body;
pub mod client_ip;
pub mod cookies;
pub mod headers;
pub mod rate_limit;
pub mod request_time;
pub mod sanitize;

use rate_limit::RateLimiter;

/// The stage list, built once at start-up.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: SecurityConfig,
    profile: Profile,
    limiter: RateLimiter,
}

impl Pipeline {
    pub fn new(config: SecurityConfig, profile: Profile) -> Self {
        let limiter = RateLimiter::new(
            config.rate_limit_max,
            Duration::from_secs(config.rate_limit_window_secs),
            config.api_prefix.clone(),
        );
        Self {
            config,
            profile,
            limiter,
        }
    }

    pub fn apply<S>(&self, router: Router<S>) -> anyhow::Result<Router<S>>
    where
        S: Clone + Send + Sync + 'static,
    {
        let baseline = Arc::new(headers::baseline(&self.config)?);
        let csp = HeaderValue::from_str(&self.config.content_security_policy)?;
        let tracing_enabled = self.profile.is_development();
        let body_limit = self.config.body_limit_bytes;

        info!(
            profile = ?self.profile,
            rate_limit_max = self.config.rate_limit_max,
            rate_limit_window_secs = self.config.rate_limit_window_secs,
            body_limit,
            "request pipeline configured"
        );

        let stages = ServiceBuilder::new()
            .layer(from_fn(client_ip::resolve_client_ip))
            .layer(from_fn_with_state(baseline, headers::apply_baseline))
            .layer(SetResponseHeaderLayer::overriding(
                header::CONTENT_SECURITY_POLICY,
                csp,
            ))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(move |req: &Request<Body>| {
                        if !tracing_enabled {
                            return Span::none();
                        }
                        let method = req.method().clone();
                        let uri = req.uri().clone();
                        tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                    })
                    .on_request(())
                    .on_response(
                        move |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                            if !tracing_enabled {
                                return;
                            }
                            let status = res.status();
                            span.record("status", tracing::field::display(status));
                            let latency_ms = latency.as_millis() as u64;
                            if status.is_server_error() {
                                tracing::error!(%status, latency_ms, "response");
                            } else {
                                tracing::info!(%status, latency_ms, "response");
                            }
                        },
                    )
                    .on_failure(()),
            )
            .layer(from_fn_with_state(self.limiter.clone(), rate_limit::enforce))
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(from_fn_with_state(body_limit, body::buffer_body))
            .layer(from_fn(cookies::parse_cookies))
            .layer(from_fn(sanitize::strip_operator_keys))
            .layer(from_fn(sanitize::escape_markup))
            .layer(from_fn(request_time::stamp));

        Ok(router.layer(stages))
    }
}
