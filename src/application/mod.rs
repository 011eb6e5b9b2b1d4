//! Application layer - the limiter, dual-scope coordination and the
//! degradation policy that wraps every backend call.

mod degradation;
mod dual_scope;
mod limiter;

pub use degradation::{diagnostic_hint, Degradation, DegradationPolicy};
pub use limiter::{SlidingWindowLimiter, DEFAULT_BACKEND_TIMEOUT};
