//! Rate limit store adapters.
//!
//! Implementations of the `RateLimitStore` port for different backends.
//!
//! ## Available Adapters
//!
//! - `InMemoryRateLimitStore` - In-memory for testing and single-process use
//! - `RedisRateLimitStore` - Redis-backed for production multi-instance use
//!
//! ## Usage
//!
//! ```ignore
//! use pingbuoy_ratelimit::adapters::{InMemoryRateLimitStore, RedisRateLimitStore};
//! use pingbuoy_ratelimit::ports::SystemClock;
//!
//! // For testing
//! let store = InMemoryRateLimitStore::new(Arc::new(SystemClock));
//!
//! // For production
//! let store = RedisRateLimitStore::connect(&config.redis).await?;
//! ```

mod in_memory;
mod redis;

pub use in_memory::InMemoryRateLimitStore;
pub use redis::RedisRateLimitStore;
