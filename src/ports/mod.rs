//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the rate limiting core and the outside world. Adapters implement these
//! ports.
//!
//! - `RateLimitStore` - Shared key-value backend with atomic window updates
//! - `Clock` - Wall-clock time source

mod clock;
mod rate_limit_store;

pub use clock::{Clock, SystemClock};
pub use rate_limit_store::{HitRequest, RateLimitStore, StoreError};
