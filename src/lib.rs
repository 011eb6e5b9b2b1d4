//! PingBuoy rate limiting.
//!
//! Sliding-window rate limiting over a shared key-value backend, with
//! per-IP and per-user scoping and an environment-aware degradation policy
//! for backend outages.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;
