use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    axum::{
        extract::{ConnectInfo, State},
        http::{HeaderMap, StatusCode},
        middleware::Next,
        response::{IntoResponse, Json, Response},
    },
    dashmap::{DashMap, mapref::entry::Entry},
    homegw_protocol::API_PREFIX,
};

use crate::{
    auth_middleware::{AuthResult, check_auth},
    server::AppState,
};

const CLEANUP_EVERY_REQUESTS: u64 = 512;
const WINDOW: Duration = Duration::from_secs(60);
/// Upper bound for worker WebSocket upgrades per client per minute.
const WORKER_WS_PER_MINUTE: usize = 30;

#[derive(Clone)]
pub struct RequestThrottle {
    limits: ThrottleLimits,
    buckets: Arc<DashMap<ThrottleKey, WindowState>>,
    requests_seen: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ThrottleScope {
    Api,
    Webhook,
    WorkerWs,
}

impl ThrottleScope {
    fn from_path(path: &str) -> Option<Self> {
        let rest = path.strip_prefix(API_PREFIX)?;
        if rest == "/health" {
            return None;
        }
        if rest == "/workers/ws" {
            return Some(Self::WorkerWs);
        }
        if rest.starts_with("/webhook/") {
            return Some(Self::Webhook);
        }
        Some(Self::Api)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ThrottleKey {
    ip: IpAddr,
    scope: ThrottleScope,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started_at: Instant,
    count: usize,
}

#[derive(Debug, Clone, Copy)]
struct RateLimit {
    max_requests: usize,
    window: Duration,
}

#[derive(Debug, Clone, Copy)]
struct ThrottleLimits {
    api: RateLimit,
    webhook: RateLimit,
    worker_ws: RateLimit,
}

impl ThrottleLimits {
    fn per_minute(max_requests: usize) -> Self {
        let limit = RateLimit {
            max_requests,
            window: WINDOW,
        };
        Self {
            api: limit,
            webhook: limit,
            worker_ws: RateLimit {
                max_requests: WORKER_WS_PER_MINUTE.min(max_requests),
                window: WINDOW,
            },
        }
    }
}

enum ThrottleDecision {
    Allowed,
    Denied { retry_after: Duration },
}

impl RequestThrottle {
    /// Fixed-window limiter allowing `per_minute` requests per client IP and
    /// scope. `None` when `per_minute` is 0 (throttling disabled).
    #[must_use]
    pub fn per_minute(per_minute: u32) -> Option<Self> {
        (per_minute > 0).then(|| Self::with_limits(ThrottleLimits::per_minute(per_minute as usize)))
    }

    fn with_limits(limits: ThrottleLimits) -> Self {
        Self {
            limits,
            buckets: Arc::new(DashMap::new()),
            requests_seen: Arc::new(AtomicU64::new(0)),
        }
    }

    fn limit_for(&self, scope: ThrottleScope) -> RateLimit {
        match scope {
            ThrottleScope::Api => self.limits.api,
            ThrottleScope::Webhook => self.limits.webhook,
            ThrottleScope::WorkerWs => self.limits.worker_ws,
        }
    }

    fn check(&self, ip: IpAddr, scope: ThrottleScope) -> ThrottleDecision {
        self.check_at(ip, scope, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, scope: ThrottleScope, now: Instant) -> ThrottleDecision {
        let limit = self.limit_for(scope);
        let key = ThrottleKey { ip, scope };
        let decision = match self.buckets.entry(key) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                let elapsed = now.duration_since(state.started_at);
                if elapsed >= limit.window {
                    state.started_at = now;
                    state.count = 1;
                    ThrottleDecision::Allowed
                } else if state.count < limit.max_requests {
                    state.count += 1;
                    ThrottleDecision::Allowed
                } else {
                    ThrottleDecision::Denied {
                        retry_after: limit.window.saturating_sub(elapsed),
                    }
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(WindowState {
                    started_at: now,
                    count: 1,
                });
                ThrottleDecision::Allowed
            },
        };

        self.cleanup_if_needed(now);
        decision
    }

    fn cleanup_if_needed(&self, now: Instant) {
        let seen = self.requests_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if !seen.is_multiple_of(CLEANUP_EVERY_REQUESTS) {
            return;
        }
        let stale_after = WINDOW.saturating_mul(3);
        self.buckets
            .retain(|_, state| now.duration_since(state.started_at) <= stale_after);
    }
}

pub async fn throttle_gate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(throttle) = state.request_throttle.as_ref() else {
        return next.run(request).await;
    };
    let path = request.uri().path().to_owned();
    let Some(scope) = ThrottleScope::from_path(&path) else {
        return next.run(request).await;
    };

    // Authenticated callers bypass the limiter.
    let security = &state.gateway.security;
    if check_auth(security, request.headers()) == AuthResult::Allowed {
        return next.run(request).await;
    }

    let client_ip = resolve_client_ip(request.headers(), addr, security.behind_proxy);
    match throttle.check(client_ip, scope) {
        ThrottleDecision::Allowed => next.run(request).await,
        ThrottleDecision::Denied { retry_after } => rate_limited_response(retry_after),
    }
}

fn rate_limited_response(retry_after: Duration) -> Response {
    let retry_after_secs = retry_after.as_secs().max(1);
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "error": "too many requests",
            "retry_after_seconds": retry_after_secs
        })),
    )
        .into_response();

    if let Ok(value) = retry_after_secs.to_string().parse() {
        response
            .headers_mut()
            .insert(axum::http::header::RETRY_AFTER, value);
    }
    response
}

/// Client address, taken from proxy headers when `behind_proxy` is set.
pub(crate) fn resolve_client_ip(headers: &HeaderMap, addr: SocketAddr, behind_proxy: bool) -> IpAddr {
    if behind_proxy && let Some(ip) = extract_forwarded_ip(headers) {
        return ip;
    }
    addr.ip()
}

fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());
    if let Some(xff) = xff
        && let Some(ip) = xff
            .split(',')
            .find_map(|candidate| parse_ip(candidate.trim()))
    {
        return Some(ip);
    }

    let xri = headers.get("x-real-ip").and_then(|v| v.to_str().ok());
    if let Some(xri) = xri
        && let Some(ip) = parse_ip(xri.trim())
    {
        return Some(ip);
    }

    None
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    if value.is_empty() {
        return None;
    }
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    None
}
