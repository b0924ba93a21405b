use std::net::SocketAddr;

use {
    axum::{
        extract::{ConnectInfo, State},
        http::{HeaderMap, StatusCode, header::AUTHORIZATION},
        middleware::Next,
        response::{IntoResponse, Json, Response},
    },
    homegw_common::constant_time_eq,
    tracing::warn,
};

use crate::{request_throttle::resolve_client_ip, server::AppState, state::SecurityPolicy};

/// Outcome of checking a request's bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    /// No token is configured.
    Open,
    Allowed,
    Denied,
}

/// Check `Authorization: Bearer <token>` against the configured token.
#[must_use]
pub fn check_auth(policy: &SecurityPolicy, headers: &HeaderMap) -> AuthResult {
    let Some(expected) = policy.api_token.as_deref() else {
        return AuthResult::Open;
    };
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim);
    match provided {
        Some(token) if constant_time_eq(token, expected) => AuthResult::Allowed,
        _ => AuthResult::Denied,
    }
}

/// Middleware that protects routes behind the API token.
///
/// When no token is configured every request passes through.
pub async fn require_auth(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    match check_auth(&state.gateway.security, request.headers()) {
        AuthResult::Open | AuthResult::Allowed => next.run(request).await,
        AuthResult::Denied => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "not authenticated"})),
        )
            .into_response(),
    }
}

/// Middleware that rejects clients outside the configured allowlist.
pub async fn ip_gate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let policy = &state.gateway.security;
    if policy.allowlist.is_empty() {
        return next.run(request).await;
    }
    let ip = resolve_client_ip(request.headers(), addr, policy.behind_proxy);
    if policy.allows(ip) {
        return next.run(request).await;
    }
    warn!(client_ip = %ip, path = %request.uri().path(), "request from address outside allowlist");
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({"error": "forbidden"})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use {super::*, axum::http::HeaderValue};

    fn policy(token: Option<&str>) -> SecurityPolicy {
        SecurityPolicy {
            api_token: token.map(String::from),
            ..SecurityPolicy::default()
        }
    }

    fn bearer(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn open_without_token() {
        assert_eq!(check_auth(&policy(None), &HeaderMap::new()), AuthResult::Open);
    }

    #[test]
    fn accepts_matching_bearer() {
        assert_eq!(
            check_auth(&policy(Some("s3cret")), &bearer("Bearer s3cret")),
            AuthResult::Allowed
        );
    }

    #[test]
    fn rejects_wrong_missing_or_malformed() {
        let p = policy(Some("s3cret"));
        assert_eq!(check_auth(&p, &bearer("Bearer nope")), AuthResult::Denied);
        assert_eq!(check_auth(&p, &bearer("s3cret")), AuthResult::Denied);
        assert_eq!(check_auth(&p, &HeaderMap::new()), AuthResult::Denied);
    }
}
