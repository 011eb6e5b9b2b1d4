//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the rate limiting core to external systems:
//! - `rate_limiter` - Store implementations (in-memory, Redis)
//! - `clock` - Manual clock for stepping through windows
//! - `http` - axum middleware surfacing limiter decisions as HTTP responses

mod clock;
pub mod http;
pub mod rate_limiter;

pub use clock::ManualClock;
pub use rate_limiter::{InMemoryRateLimitStore, RedisRateLimitStore};
