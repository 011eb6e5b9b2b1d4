//! Rate limiting middleware for axum.
//!
//! Runs the dual-scope check for the route's service class before the
//! handler, using the per-IP and (when authenticated) per-plan limits from
//! the registry.
//!
//! Rate limit status is returned in standard HTTP headers:
//! - `X-RateLimit-Limit`: Maximum requests allowed in the window
//! - `X-RateLimit-Remaining`: Requests remaining in the current window
//! - `X-RateLimit-Reset`: Unix timestamp when the window resets
//! - `Retry-After`: Seconds to wait (only on 429 response)
//!
//! Identifiers blocked with `SlidingWindowLimiter::block` are answered
//! with 403. When the limiter fails closed (production, backend down) the
//! request is answered with 503 instead of reaching the handler.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::post, middleware};
//!
//! let state = RateLimitState::new(limiter, ServiceClass::Email);
//!
//! let app = Router::new()
//!     .route("/api/email/send", post(handler))
//!     .layer(middleware::from_fn_with_state(state, rate_limit_middleware));
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::application::SlidingWindowLimiter;
use crate::domain::rate_limit::{
    PlanTier, RateLimitError, RateLimitIdentifier, RateLimitResult, ServiceClass,
};

/// Identifier used when no client address can be determined.
const UNKNOWN_CLIENT: &str = "unknown";

/// Middleware state: the shared limiter and the class this route belongs to.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub limiter: Arc<SlidingWindowLimiter>,
    pub class: ServiceClass,
}

impl RateLimitState {
    pub fn new(limiter: Arc<SlidingWindowLimiter>, class: ServiceClass) -> Self {
        Self { limiter, class }
    }
}

/// Authenticated caller, inserted as a request extension by the
/// authentication layer in front of this middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    pub user_id: String,
    pub plan: PlanTier,
}

/// Standard rate limit header names.
pub mod headers {
    use super::HeaderName;

    /// Maximum requests allowed in the window.
    pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
    /// Requests remaining in the current window.
    pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
    /// Unix timestamp when the window resets.
    pub static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
}

/// Rate limiting middleware for one service class.
///
/// This middleware:
/// 1. Extracts client IP from forwarded headers or `ConnectInfo`
/// 2. Picks up the authenticated principal, if any
/// 3. Returns 403 Forbidden if the IP or user is blocked, either outright
///    or for this service class
/// 4. Checks the IP and user scopes together
/// 5. Returns 429 Too Many Requests if either limit is exceeded
/// 6. Returns 503 Service Unavailable if the limiter fails closed
/// 7. Otherwise adds rate limit headers to the handler's response
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let client_ip = extract_client_ip(&request, connect_info.as_ref())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
    let ip_identifier = RateLimitIdentifier::ip(&client_ip)
        .or_else(|_| RateLimitIdentifier::ip(UNKNOWN_CLIENT));
    let ip_identifier = match ip_identifier {
        Ok(identifier) => identifier,
        Err(e) => return limiter_unavailable(state.class, &e.to_string()),
    };

    let principal = request
        .extensions()
        .get::<AuthenticatedPrincipal>()
        .and_then(|p| {
            RateLimitIdentifier::user(&p.user_id)
                .ok()
                .map(|id| (id, p.plan))
        });

    let user_identifier = principal.as_ref().map(|(id, _)| id.as_str());
    match is_blocked(&state, ip_identifier.as_str(), user_identifier).await {
        Ok(true) => return blocked_response(state.class),
        Ok(false) => {}
        Err(e) => return limiter_unavailable(state.class, &e.to_string()),
    }

    let decision = state
        .limiter
        .check_service(
            state.class,
            ip_identifier.as_str(),
            principal.as_ref().map(|(id, plan)| (id.as_str(), *plan)),
        )
        .await;

    let combined = match decision {
        Ok(combined) => combined,
        Err(e) => return limiter_unavailable(state.class, &e.to_string()),
    };

    if !combined.success {
        return rate_limit_response(combined.deciding_result());
    }

    let mut response = next.run(request).await;
    add_rate_limit_headers(&mut response, combined.most_specific());
    response
}

/// True if any identifier carries a block, unlabelled or for this class.
///
/// Blocks are checked before the window so a blocked caller does not
/// consume quota.
async fn is_blocked(
    state: &RateLimitState,
    ip_identifier: &str,
    user_identifier: Option<&str>,
) -> Result<bool, RateLimitError> {
    let label = Some(state.class.label());
    for identifier in std::iter::once(ip_identifier).chain(user_identifier) {
        let (global, scoped) = tokio::join!(
            state.limiter.is_blocked(identifier, None),
            state.limiter.is_blocked(identifier, label),
        );
        if global? || scoped? {
            tracing::debug!(identifier, service = %state.class, "Blocked identifier rejected");
            return Ok(true);
        }
    }
    Ok(false)
}

/// Extract client IP from request, checking forwarded headers first.
///
/// Order of precedence:
/// 1. X-Forwarded-For header (first IP in list)
/// 2. X-Real-IP header
/// 3. ConnectInfo socket address
fn extract_client_ip<B>(
    request: &axum::http::Request<B>,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> Option<String> {
    if let Some(forwarded) = request
        .headers()
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
    {
        // First entry is the client, the rest are proxies
        if let Some(first_ip) = forwarded.split(',').map(str::trim).find(|ip| !ip.is_empty()) {
            return Some(first_ip.to_string());
        }
    }

    if let Some(real_ip) = request
        .headers()
        .get("X-Real-IP")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return Some(real_ip.to_string());
    }

    connect_info.map(|ci| ci.0.ip().to_string())
}

/// Create a 429 Too Many Requests response from the deciding result.
fn rate_limit_response(result: &RateLimitResult) -> Response {
    let retry_after_secs = result.retry_after.unwrap_or(0);
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "error": "Rate limit exceeded",
            "code": "RATE_LIMIT_EXCEEDED",
            "retry_after_secs": retry_after_secs
        })),
    )
        .into_response();

    add_rate_limit_headers(&mut response, result);
    response
        .headers_mut()
        .insert("Retry-After", HeaderValue::from(retry_after_secs));

    response
}

/// Create a 403 response for a blocked caller.
fn blocked_response(class: ServiceClass) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({
            "error": "Access temporarily blocked",
            "code": "RATE_LIMIT_BLOCKED",
            "service": class.label()
        })),
    )
        .into_response()
}

/// Create a 503 response for a limiter that failed closed.
fn limiter_unavailable(class: ServiceClass, error: &str) -> Response {
    tracing::error!(service = %class, error, "Rate limiter unavailable, rejecting request");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({
            "error": "Rate limiting temporarily unavailable",
            "code": "RATE_LIMIT_UNAVAILABLE"
        })),
    )
        .into_response()
}

/// Add rate limit headers to a response.
fn add_rate_limit_headers(response: &mut Response, result: &RateLimitResult) {
    let headers = response.headers_mut();
    headers.insert(
        headers::X_RATELIMIT_LIMIT.clone(),
        HeaderValue::from(result.limit),
    );
    headers.insert(
        headers::X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(result.remaining),
    );
    headers.insert(
        headers::X_RATELIMIT_RESET.clone(),
        HeaderValue::from(result.reset_time.div_euclid(1_000)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryRateLimitStore, ManualClock};
    use crate::application::DegradationPolicy;
    use crate::config::Environment;
    use crate::domain::rate_limit::{FailureClass, RateLimitRegistry};
    use axum::{body::Body, http::Request, middleware, routing::get, Router};
    use tower::ServiceExt;

    struct Fixture {
        store: Arc<InMemoryRateLimitStore>,
        limiter: Arc<SlidingWindowLimiter>,
        app: Router,
    }

    fn fixture(class: ServiceClass, environment: Environment) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(InMemoryRateLimitStore::new(clock.clone()));
        let limiter = Arc::new(
            SlidingWindowLimiter::new(store.clone(), DegradationPolicy::new(environment))
                .with_clock(clock),
        );
        let app = Router::new()
            .route("/resource", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                RateLimitState::new(limiter.clone(), class),
                rate_limit_middleware,
            ));
        Fixture {
            store,
            limiter,
            app,
        }
    }

    fn request_from(ip: &str) -> Request<Body> {
        Request::builder()
            .uri("/resource")
            .header("X-Forwarded-For", ip)
            .body(Body::empty())
            .unwrap()
    }

    // ─── IP Extraction ───────────────────────────────────────────────

    #[test]
    fn extract_ip_from_x_forwarded_for() {
        let request = Request::builder()
            .uri("/test")
            .header("X-Forwarded-For", "1.2.3.4, 5.6.7.8")
            .body(())
            .unwrap();

        let ip = extract_client_ip(&request, None);
        assert_eq!(ip, Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_ip_from_x_real_ip() {
        let request = Request::builder()
            .uri("/test")
            .header("X-Real-IP", "9.8.7.6")
            .body(())
            .unwrap();

        let ip = extract_client_ip(&request, None);
        assert_eq!(ip, Some("9.8.7.6".to_string()));
    }

    #[test]
    fn extract_ip_prefers_x_forwarded_for() {
        let request = Request::builder()
            .uri("/test")
            .header("X-Forwarded-For", "1.2.3.4")
            .header("X-Real-IP", "5.6.7.8")
            .body(())
            .unwrap();

        let ip = extract_client_ip(&request, None);
        assert_eq!(ip, Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_ip_falls_back_to_connect_info() {
        let request = Request::builder().uri("/test").body(()).unwrap();
        let info = ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 4242)));

        let ip = extract_client_ip(&request, Some(&info));
        assert_eq!(ip, Some("10.0.0.7".to_string()));
    }

    #[test]
    fn extract_ip_returns_none_without_source() {
        let request = Request::builder().uri("/test").body(()).unwrap();
        assert_eq!(extract_client_ip(&request, None), None);
    }

    // ─── Middleware ──────────────────────────────────────────────────

    #[tokio::test]
    async fn allowed_request_carries_quota_headers() {
        let f = fixture(ServiceClass::Api, Environment::Development);

        let response = f.app.oneshot(request_from("1.2.3.4")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "100");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "99");
        assert_eq!(response.headers()["x-ratelimit-reset"], "1700000060");
        assert!(!response.headers().contains_key("retry-after"));
    }

    #[tokio::test]
    async fn exceeding_the_ip_limit_returns_429() {
        let f = fixture(ServiceClass::AuthRegister, Environment::Development);

        for _ in 0..3 {
            let response = f.app.clone().oneshot(request_from("1.2.3.4")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = f.app.clone().oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(response.headers()["retry-after"], "3600");

        let other = f.app.oneshot(request_from("5.6.7.8")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn authenticated_requests_use_plan_limits() {
        let f = fixture(ServiceClass::Email, Environment::Development);

        let mut request = request_from("1.2.3.4");
        request.extensions_mut().insert(AuthenticatedPrincipal {
            user_id: "u-1".into(),
            plan: PlanTier::Pro,
        });
        let response = f.app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "100");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "99");
    }

    #[tokio::test]
    async fn fail_closed_limiter_returns_503() {
        let f = fixture(ServiceClass::Api, Environment::Production);
        f.store.simulate_outage(FailureClass::ConnectionRefused);

        let response = f.app.oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn fail_open_limiter_lets_requests_through() {
        let f = fixture(ServiceClass::Api, Environment::Development);
        f.store.simulate_outage(FailureClass::Timeout);

        let response = f.app.oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "99");
    }

    #[tokio::test]
    async fn blocked_ip_is_rejected_without_consuming_quota() {
        let f = fixture(ServiceClass::Api, Environment::Development);
        f.limiter
            .block("ip:1.2.3.4", std::time::Duration::from_secs(60), None)
            .await
            .unwrap();

        let response = f.app.clone().oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let status = f
            .limiter
            .get_status("ip:1.2.3.4", &RateLimitRegistry::ip(ServiceClass::Api).unwrap(), Some("api"))
            .await
            .unwrap();
        assert_eq!(status.total_hits, 0);

        let other = f.app.oneshot(request_from("5.6.7.8")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn class_scoped_block_only_applies_to_that_class() {
        let f = fixture(ServiceClass::Email, Environment::Development);
        f.limiter
            .block("user:u-1", std::time::Duration::from_secs(60), Some("email"))
            .await
            .unwrap();

        let mut request = request_from("1.2.3.4");
        request.extensions_mut().insert(AuthenticatedPrincipal {
            user_id: "u-1".into(),
            plan: PlanTier::Free,
        });
        let response = f.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let api = fixture(ServiceClass::Api, Environment::Development);
        api.limiter
            .block("user:u-1", std::time::Duration::from_secs(60), Some("email"))
            .await
            .unwrap();
        let mut request = request_from("1.2.3.4");
        request.extensions_mut().insert(AuthenticatedPrincipal {
            user_id: "u-1".into(),
            plan: PlanTier::Free,
        });
        let response = api.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // ─── Type Safety ─────────────────────────────────────────────────

    #[test]
    fn rate_limit_state_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RateLimitState>();
    }
}
