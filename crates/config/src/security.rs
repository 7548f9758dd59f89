//! Security header configuration.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Security header and transport settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// Redirect plain HTTP requests (as reported by `X-Forwarded-Proto`) to HTTPS in production.
    pub enforce_https: bool,
    /// `max-age` of the `Strict-Transport-Security` header sent in production.
    #[serde(deserialize_with = "deserialize_duration")]
    pub hsts_max_age: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enforce_https: true,
            hsts_max_age: Duration::from_secs(365 * 24 * 60 * 60),
        }
    }
}
