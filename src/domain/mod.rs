//! Domain layer containing rate limiting types and rules.
//!
//! # Module Organization
//!
//! - `rate_limit` - Identifiers, window configuration, results, errors and
//!   the static service-class table

pub mod rate_limit;
