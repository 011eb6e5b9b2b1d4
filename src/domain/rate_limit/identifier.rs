//! Rate limit identifiers and backend key composition.
//!
//! An identifier names *who* is being counted (an IP address, a user, an
//! email recipient). A backend key additionally names *where* the hits are
//! stored: a prefix and an optional service label in front of the
//! identifier. Both must compose deterministically, otherwise two calls
//! for the same caller would count against different windows.

use std::fmt;

use super::errors::RateLimitError;

/// Default prefix for sliding-window keys.
pub const DEFAULT_KEY_PREFIX: &str = "ratelimit";

/// Prefix for block flags, independent of the window prefix.
pub const BLOCK_KEY_PREFIX: &str = "blocked";

/// The dimension a quota is tracked along.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentifierScope {
    /// Network address of the caller.
    Ip,
    /// Authenticated principal.
    User,
    /// Outbound notification recipient (email address).
    Recipient,
    /// Outbound notification sender (email address).
    Sender,
    /// Any other caller-defined scope.
    Custom(String),
}

impl IdentifierScope {
    /// Returns the key fragment for this scope.
    pub fn as_str(&self) -> &str {
        match self {
            IdentifierScope::Ip => "ip",
            IdentifierScope::User => "user",
            IdentifierScope::Recipient => "recipient",
            IdentifierScope::Sender => "sender",
            IdentifierScope::Custom(scope) => scope,
        }
    }
}

impl fmt::Display for IdentifierScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A scoped identifier such as `ip:203.0.113.7` or `user:42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitIdentifier {
    scope: IdentifierScope,
    value: String,
    rendered: String,
}

impl RateLimitIdentifier {
    /// Identifier for a network address.
    pub fn ip(addr: &str) -> Result<Self, RateLimitError> {
        Self::build(IdentifierScope::Ip, addr.trim().to_string())
    }

    /// Identifier for an authenticated user id.
    pub fn user(user_id: &str) -> Result<Self, RateLimitError> {
        Self::build(IdentifierScope::User, user_id.trim().to_string())
    }

    /// Identifier for an email recipient. The address is normalized.
    pub fn recipient(email: &str) -> Result<Self, RateLimitError> {
        Self::build(IdentifierScope::Recipient, normalize_email(email))
    }

    /// Identifier for an email sender. The address is normalized.
    pub fn sender(email: &str) -> Result<Self, RateLimitError> {
        Self::build(IdentifierScope::Sender, normalize_email(email))
    }

    /// Identifier under a caller-defined scope.
    pub fn custom(scope: &str, value: &str) -> Result<Self, RateLimitError> {
        let scope = scope.trim();
        if scope.is_empty() {
            return Err(RateLimitError::InvalidKey("scope must not be empty".into()));
        }
        Self::build(
            IdentifierScope::Custom(scope.to_string()),
            value.trim().to_string(),
        )
    }

    fn build(scope: IdentifierScope, value: String) -> Result<Self, RateLimitError> {
        if value.is_empty() {
            return Err(RateLimitError::InvalidKey(format!(
                "{} identifier must not be empty",
                scope
            )));
        }
        let rendered = format!("{}:{}", scope.as_str(), value);
        Ok(Self {
            scope,
            value,
            rendered,
        })
    }

    /// The scope this identifier belongs to.
    pub fn scope(&self) -> &IdentifierScope {
        &self.scope
    }

    /// The raw value without the scope prefix.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The rendered `<scope>:<value>` form.
    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl AsRef<str> for RateLimitIdentifier {
    fn as_ref(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for RateLimitIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rendered)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Composes the sorted-set key holding the hits for an identifier.
///
/// `<prefix>[:<service_label>]:<identifier>`
pub fn compose_window_key(
    key_prefix: Option<&str>,
    service_label: Option<&str>,
    identifier: &str,
) -> String {
    let prefix = key_prefix
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_KEY_PREFIX);
    match service_label.filter(|s| !s.is_empty()) {
        Some(label) => format!("{}:{}:{}", prefix, label, identifier),
        None => format!("{}:{}", prefix, identifier),
    }
}

/// Composes the block-flag key for an identifier.
///
/// `blocked[:<service_label>]:<identifier>`
pub fn compose_block_key(service_label: Option<&str>, identifier: &str) -> String {
    match service_label.filter(|s| !s.is_empty()) {
        Some(label) => format!("{}:{}:{}", BLOCK_KEY_PREFIX, label, identifier),
        None => format!("{}:{}", BLOCK_KEY_PREFIX, identifier),
    }
}

/// Rejects empty identifiers before any backend call.
pub(crate) fn ensure_identifier(identifier: &str) -> Result<(), RateLimitError> {
    if identifier.trim().is_empty() {
        return Err(RateLimitError::InvalidKey(
            "identifier must not be empty".into(),
        ));
    }
    Ok(())
}
