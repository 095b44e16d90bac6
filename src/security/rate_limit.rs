use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::{error::AppError, security::client_ip::ClientIp};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Expired windows are swept once the map holds this many clients.
const PRUNE_THRESHOLD: usize = 10_000;

/// Minimum time between two sweeps.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug, Default)]
struct Windows {
    by_ip: HashMap<IpAddr, Window>,
    next_prune: Option<Instant>,
    sweeps: u64,
}

impl Windows {
    /// Drops expired windows, at most once per `PRUNE_INTERVAL`.
    fn prune(&mut self, now: Instant, span: Duration) {
        if self.by_ip.len() < PRUNE_THRESHOLD {
            return;
        }
        if self.next_prune.is_some_and(|next| now < next) {
            return;
        }
        self.by_ip
            .retain(|_, w| now.saturating_duration_since(w.started) < span);
        self.next_prune = Some(now + PRUNE_INTERVAL);
        self.sweeps += 1;
        debug!(clients = self.by_ip.len(), "rate limit windows pruned");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Rejected { retry_after: Duration },
}

/// Fixed-window request counter keyed by client IP.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<Windows>>,
    max: u32,
    window: Duration,
    prefix: String,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration, prefix: impl Into<String>) -> Self {
        Self {
            windows: Arc::new(Mutex::new(Windows::default())),
            max,
            window,
            prefix: prefix.into(),
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// `/api` covers `/api` and `/api/...` but not `/apis`.
    pub fn applies_to(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    pub fn check(&self, ip: IpAddr) -> Decision {
        self.check_at(ip, Instant::now())
    }

    pub fn check_at(&self, ip: IpAddr, now: Instant) -> Decision {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        windows.prune(now, self.window);

        let entry = windows.by_ip.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.max {
            let elapsed = now.saturating_duration_since(entry.started);
            return Decision::Rejected {
                retry_after: self.window.saturating_sub(elapsed),
            };
        }
        entry.count += 1;
        Decision::Allowed {
            remaining: self.max - entry.count,
        }
    }
}

pub async fn enforce(State(limiter): State<RateLimiter>, request: Request, next: Next) -> Response {
    if !limiter.applies_to(request.uri().path()) {
        return next.run(request).await;
    }

    let ip = request
        .extensions()
        .get::<ClientIp>()
        .map(|ClientIp(ip)| *ip)
        .unwrap_or(IpAddr::from([127, 0, 0, 1]));

    match limiter.check(ip) {
        Decision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limiter.max()));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
            response
        }
        Decision::Rejected { retry_after } => {
            warn!(%ip, path = %request.uri().path(), "rate limit exceeded");
            let mut response = AppError::RateLimitExceeded.into_response();
            // Round up so clients never retry a second early.
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
            response
        }
    }
}
