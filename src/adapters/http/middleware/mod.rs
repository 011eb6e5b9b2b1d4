//! HTTP middleware for axum.
//!
//! - `rate_limit` - Sliding-window rate limiting per service class

pub mod rate_limit;

pub use rate_limit::{rate_limit_middleware, AuthenticatedPrincipal, RateLimitState};
