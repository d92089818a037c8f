//! Configuration constants and structures for the emulator session client
//!
//! This module centralizes the policy values (step budget, pacing, timeouts)
//! and the service endpoint resolution so they can be tuned from one place.

pub mod endpoint;
pub mod errors;
pub mod limits;
pub mod timeouts;

pub use endpoint::{ApiEndpoint, EndpointSource};

/// Parse an environment variable, falling back to `default` when it is unset or malformed.
pub(crate) fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Read a non-empty, trimmed environment variable.
pub(crate) fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
