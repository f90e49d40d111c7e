//! Per-client sliding-window rate limiting
//!
//! Each client IP owns an ascending list of request timestamps. On every
//! request the list is pruned to the trailing window, the admission check
//! runs, and the current instant is appended. The per-entry lock is held
//! across that whole sequence, so concurrent requests from one client
//! cannot interleave between prune, check and append.
//!
//! A periodic sweep re-prunes every client and drops empty entries. It is
//! memory reclamation only and never changes admission decisions.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::RateLimitConfig;
use crate::error::ApiError;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Instant at which the window has fully rolled past this request.
    pub reset_at: DateTime<Utc>,
}

/// Sliding-window admission control keyed by client identifier.
pub struct RateLimiter {
    windows: DashMap<String, Vec<DateTime<Utc>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_secs: i64) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window: Duration::seconds(window_secs),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, config.window_secs)
    }

    pub fn window_secs(&self) -> i64 {
        self.window.num_seconds()
    }

    /// Admit or reject a request from `client` at the current instant.
    pub fn check(&self, client: &str) -> RateDecision {
        self.check_at(client, Utc::now())
    }

    pub fn check_at(&self, client: &str, now: DateTime<Utc>) -> RateDecision {
        let cutoff = now - self.window;
        let mut entry = self.windows.entry(client.to_string()).or_default();
        let stamps = entry.value_mut();

        stamps.retain(|ts| *ts > cutoff);

        // Deliberately two-part: the count alone does not reject. A client
        // exactly at the limit whose oldest stamp has just aged out of the
        // window on this access is still admitted.
        if stamps.len() >= self.max_requests {
            if let Some(oldest) = stamps.first() {
                if *oldest > cutoff {
                    return RateDecision {
                        allowed: false,
                        limit: self.max_requests,
                        remaining: 0,
                        reset_at: now + self.window,
                    };
                }
            }
        }

        stamps.push(now);
        RateDecision {
            allowed: true,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(stamps.len()),
            reset_at: now + self.window,
        }
    }

    /// Re-prune every client and drop entries left empty. Returns the
    /// number of clients removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        let before = self.windows.len();
        self.windows.retain(|_, stamps| {
            stamps.retain(|ts| *ts > cutoff);
            !stamps.is_empty()
        });
        before - self.windows.len()
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

/// Periodic sweep loop; interval should equal the window size.
pub async fn run_sweeper(limiter: Arc<RateLimiter>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let removed = limiter.sweep();
        if removed > 0 {
            tracing::debug!(removed, "rate limiter sweep dropped idle clients");
        }
    }
}

fn client_key(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Axum middleware applying the limiter and attaching rate-limit headers.
///
/// Health checks are never throttled.
pub async fn middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let client = client_key(&request);
    let decision = limiter.check(&client);

    if !decision.allowed {
        tracing::warn!(%client, "rate limit exceeded");
        return ApiError::RateLimited {
            limit: decision.limit,
            reset: decision.reset_at.timestamp(),
        }
        .into_response();
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.reset_at.timestamp().to_string()) {
        headers.insert("X-RateLimit-Reset", v);
    }
    response
}
