use crate::errors::AppError;
use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use dashmap::DashMap;
use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitEntry {
    pub count: u64,
    pub window_start: Instant,
}

/// Fixed-window limiter keyed by client address.
#[derive(Debug)]
pub struct RateLimiter {
    pub requests_per_window: u64,
    pub window_duration: Duration,
    entries: DashMap<String, RateLimitEntry>,
}

impl RateLimiter {
    pub fn new(requests_per_window: u64, window_duration: Duration) -> Self {
        Self {
            requests_per_window,
            window_duration,
            entries: DashMap::new(),
        }
    }

    pub fn check_rate_limit(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(RateLimitEntry { count: 0, window_start: now });

        if now.duration_since(entry.window_start) >= self.window_duration {
            entry.count = 0;
            entry.window_start = now;
        }
        if entry.count >= self.requests_per_window {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Drops windows that ended; called from a background task.
    pub fn prune(&self) {
        let now = Instant::now();
        self.entries
            .retain(|_, entry| now.duration_since(entry.window_start) < self.window_duration);
    }
}

pub async fn rate_limiter_middleware(
    Extension(limiter): Extension<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    // Without connection info (in-process calls) there is no client to key on.
    if let Some(ip) = ip {
        if !limiter.check_rate_limit(&ip) {
            warn!(action = "rate_limited", ip = %ip);
            return AppError::RateLimited.into_response();
        }
    }
    next.run(request).await
}

/// Opens a `request` span carrying a fresh request id for everything logged downstream.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        uri = %req.uri()
    );
    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_allows_then_blocks() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        let start = Instant::now();
        assert!(limiter.check_at("1.2.3.4", start));
        assert!(limiter.check_at("1.2.3.4", start));
        assert!(limiter.check_at("1.2.3.4", start));
        assert!(!limiter.check_at("1.2.3.4", start));
        assert!(limiter.check_at("5.6.7.8", start));
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_millis(100));
        let start = Instant::now();
        assert!(limiter.check_at("ip", start));
        assert!(!limiter.check_at("ip", start + Duration::from_millis(50)));
        assert!(limiter.check_at("ip", start + Duration::from_millis(100)));
    }
}
