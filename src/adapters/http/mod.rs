//! HTTP adapters - surface limiter decisions to axum routers.

pub mod middleware;

pub use middleware::{rate_limit_middleware, AuthenticatedPrincipal, RateLimitState};
