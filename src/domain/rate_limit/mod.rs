//! Rate limiting domain types.
//!
//! Pure values and arithmetic: identifiers and key composition, window
//! configuration, results, the error taxonomy and the static limit table.
//! Nothing here talks to a backend.

mod config;
mod errors;
mod identifier;
mod registry;
mod result;

pub use config::RateLimitConfig;
pub use errors::{FailureClass, RateLimitError};
pub use identifier::{
    compose_block_key, compose_window_key, IdentifierScope, RateLimitIdentifier,
    BLOCK_KEY_PREFIX, DEFAULT_KEY_PREFIX,
};
pub(crate) use identifier::ensure_identifier;
pub use registry::{PlanTier, RateLimitRegistry, ScopeKind, ServiceClass, UnknownServiceClass};
pub use result::{
    retry_after_secs, DualLimitResult, HitOutcome, RateLimitResult, RateLimitStats,
    WindowSnapshot,
};
