//! Static rate limit table.
//!
//! Maps a service class and a scope (per IP, or per user on a given plan)
//! to a [`RateLimitConfig`]. Callers look entries up here instead of
//! writing numbers at call sites.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::config::RateLimitConfig;

/// A named category of protected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceClass {
    #[serde(rename = "auth.login")]
    AuthLogin,
    #[serde(rename = "auth.register")]
    AuthRegister,
    #[serde(rename = "auth.resetPassword")]
    AuthResetPassword,
    #[serde(rename = "contact")]
    Contact,
    #[serde(rename = "analytics")]
    Analytics,
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "monitoring")]
    Monitoring,
    #[serde(rename = "scanning")]
    Scanning,
    #[serde(rename = "performance")]
    Performance,
    #[serde(rename = "api")]
    Api,
}

impl ServiceClass {
    /// Every service class, in table order.
    pub const ALL: [ServiceClass; 10] = [
        ServiceClass::AuthLogin,
        ServiceClass::AuthRegister,
        ServiceClass::AuthResetPassword,
        ServiceClass::Contact,
        ServiceClass::Analytics,
        ServiceClass::Email,
        ServiceClass::Monitoring,
        ServiceClass::Scanning,
        ServiceClass::Performance,
        ServiceClass::Api,
    ];

    /// Label used in backend keys and configuration.
    pub fn label(&self) -> &'static str {
        match self {
            ServiceClass::AuthLogin => "auth.login",
            ServiceClass::AuthRegister => "auth.register",
            ServiceClass::AuthResetPassword => "auth.resetPassword",
            ServiceClass::Contact => "contact",
            ServiceClass::Analytics => "analytics",
            ServiceClass::Email => "email",
            ServiceClass::Monitoring => "monitoring",
            ServiceClass::Scanning => "scanning",
            ServiceClass::Performance => "performance",
            ServiceClass::Api => "api",
        }
    }

    /// True for classes that also carry per-user limits.
    pub fn has_user_limits(&self) -> bool {
        matches!(
            self,
            ServiceClass::Email
                | ServiceClass::Monitoring
                | ServiceClass::Scanning
                | ServiceClass::Performance
                | ServiceClass::Api
        )
    }
}

impl fmt::Display for ServiceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Unknown service class label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown service class: {0}")]
pub struct UnknownServiceClass(pub String);

impl FromStr for ServiceClass {
    type Err = UnknownServiceClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceClass::ALL
            .into_iter()
            .find(|class| class.label() == s)
            .ok_or_else(|| UnknownServiceClass(s.to_string()))
    }
}

/// Subscription plan of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Founder,
}

impl PlanTier {
    pub const ALL: [PlanTier; 3] = [PlanTier::Free, PlanTier::Pro, PlanTier::Founder];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Founder => "founder",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which quota a lookup is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Ip,
    User(PlanTier),
}

// Per-IP quotas. Auth and contact endpoints are brute-force targets and
// get long windows with small quotas.
const IP_LIMITS: [(ServiceClass, RateLimitConfig); 10] = [
    (ServiceClass::AuthLogin, RateLimitConfig::per_seconds(5, 15 * 60)),
    (ServiceClass::AuthRegister, RateLimitConfig::per_hour(3)),
    (ServiceClass::AuthResetPassword, RateLimitConfig::per_hour(3)),
    (ServiceClass::Contact, RateLimitConfig::per_hour(5)),
    (ServiceClass::Analytics, RateLimitConfig::per_minute(100)),
    (ServiceClass::Email, RateLimitConfig::per_hour(20)),
    (ServiceClass::Monitoring, RateLimitConfig::per_minute(60)),
    (ServiceClass::Scanning, RateLimitConfig::per_minute(10)),
    (ServiceClass::Performance, RateLimitConfig::per_minute(10)),
    (ServiceClass::Api, RateLimitConfig::per_minute(100)),
];

// Per-user quotas as (free, pro, founder).
const USER_LIMITS: [(ServiceClass, [RateLimitConfig; 3]); 5] = [
    (
        ServiceClass::Email,
        [
            RateLimitConfig::per_hour(10),
            RateLimitConfig::per_hour(100),
            RateLimitConfig::per_hour(500),
        ],
    ),
    (
        ServiceClass::Monitoring,
        [
            RateLimitConfig::per_minute(30),
            RateLimitConfig::per_minute(120),
            RateLimitConfig::per_minute(300),
        ],
    ),
    (
        ServiceClass::Scanning,
        [
            RateLimitConfig::per_hour(10),
            RateLimitConfig::per_hour(50),
            RateLimitConfig::per_hour(200),
        ],
    ),
    (
        ServiceClass::Performance,
        [
            RateLimitConfig::per_hour(10),
            RateLimitConfig::per_hour(50),
            RateLimitConfig::per_hour(200),
        ],
    ),
    (
        ServiceClass::Api,
        [
            RateLimitConfig::per_minute(60),
            RateLimitConfig::per_minute(300),
            RateLimitConfig::per_minute(1_000),
        ],
    ),
];

static REGISTRY: Lazy<HashMap<(ServiceClass, ScopeKind), RateLimitConfig>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for (class, config) in IP_LIMITS {
        table.insert((class, ScopeKind::Ip), config);
    }
    for (class, per_plan) in USER_LIMITS {
        for (tier, config) in PlanTier::ALL.into_iter().zip(per_plan) {
            table.insert((class, ScopeKind::User(tier)), config);
        }
    }
    table
});

/// Read-only lookup over the process-wide table.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitRegistry;

impl RateLimitRegistry {
    /// Entry for a class and scope, if one is defined.
    pub fn lookup(class: ServiceClass, scope: ScopeKind) -> Option<RateLimitConfig> {
        REGISTRY.get(&(class, scope)).cloned()
    }

    /// Per-IP entry. The table defines one for every class.
    pub fn ip(class: ServiceClass) -> Option<RateLimitConfig> {
        Self::lookup(class, ScopeKind::Ip)
    }

    /// Per-user entry for a plan; `None` for unauthenticated classes.
    pub fn user(class: ServiceClass, tier: PlanTier) -> Option<RateLimitConfig> {
        Self::lookup(class, ScopeKind::User(tier))
    }

    /// Number of entries in the table.
    pub fn len() -> usize {
        REGISTRY.len()
    }
}
