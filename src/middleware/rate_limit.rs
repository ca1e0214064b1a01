use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::time::Instant;

use crate::error::ApiError;
use crate::gateway::GatewayState;

pub const GENERAL_LIMIT_MESSAGE: &str = "Too many requests from this IP, please try again later.";
pub const AUTH_LIMIT_MESSAGE: &str = "Too many login attempts, please try again after 15 minutes.";

const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

#[derive(Debug)]
struct WindowEntry {
    count: u32,
    started_at: Instant,
}

/// Outcome of counting one request against a window.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
    ip: IpAddr,
    window_started: Instant,
}

impl RateDecision {
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(RATELIMIT_RESET, HeaderValue::from(reset_secs(self.reset_after)));
    }
}

fn reset_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Fixed-window request counter keyed by client IP.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    message: String,
    entries: Mutex<HashMap<IpAddr, WindowEntry>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration, message: impl Into<String>) -> Self {
        Self {
            max_requests,
            window,
            message: message.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<IpAddr, WindowEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count a request from `ip`. Requests over the limit are still counted.
    pub fn check(&self, ip: IpAddr) -> RateDecision {
        let now = Instant::now();
        let mut entries = self.entries();

        let entry = entries.entry(ip).or_insert(WindowEntry { count: 0, started_at: now });
        if now.duration_since(entry.started_at) >= self.window {
            entry.count = 0;
            entry.started_at = now;
        }
        entry.count = entry.count.saturating_add(1);

        let elapsed = now.duration_since(entry.started_at);
        RateDecision {
            allowed: entry.count <= self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(entry.count),
            reset_after: self.window.saturating_sub(elapsed),
            ip,
            window_started: entry.started_at,
        }
    }

    /// Give back a counted request, e.g. a login attempt that succeeded.
    /// Ignored if the window it was counted in has already rolled over.
    pub fn release(&self, decision: &RateDecision) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(&decision.ip) {
            if entry.started_at == decision.window_started {
                entry.count = entry.count.saturating_sub(1);
            }
        }
    }

    /// Drop windows that have expired. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.started_at) < self.window);
        before - entries.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.entries().len()
    }

    /// 429 envelope with the standard rate-limit headers and `Retry-After`.
    pub fn reject(&self, decision: &RateDecision) -> Response {
        let mut response = ApiError::rate_limited(self.message.clone()).into_response();
        decision.apply_headers(response.headers_mut());
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(reset_secs(decision.reset_after)));
        response
    }

    /// Periodically purge expired windows until the limiter is dropped.
    pub fn spawn_cleanup(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(limiter) = weak.upgrade() else { break };
                let purged = limiter.purge_expired();
                if purged > 0 {
                    tracing::debug!("Purged {} expired rate-limit windows", purged);
                }
            }
        })
    }
}

/// Client address used for rate limiting and logs.
///
/// With `forwarded_hops == 0` this is the peer address. Otherwise each of our
/// proxies appends the address it saw to `X-Forwarded-For`, so the client is
/// the `forwarded_hops`-th entry from the right. Anything further left was
/// written by the client and is ignored.
pub fn client_ip(request: &Request, forwarded_hops: usize) -> IpAddr {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    if forwarded_hops == 0 {
        return peer;
    }

    let hops: Vec<&str> = request
        .headers()
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();

    hops.len()
        .checked_sub(forwarded_hops)
        .and_then(|i| hops[i].parse::<IpAddr>().ok())
        .unwrap_or(peer)
}

/// Global per-IP limiter; runs before anything else in the pipeline.
pub async fn rate_limit_middleware(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    let ip = state.client_ip(&request);
    let decision = state.limiter.check(ip);

    if !decision.allowed {
        tracing::warn!("Rate limit exceeded for IP: {}", ip);
        return state.limiter.reject(&decision);
    }

    let mut response = next.run(request).await;
    decision.apply_headers(response.headers_mut());
    response
}
