use std::time::Duration;

use duration_str::deserialize_option_duration;

use crate::HttpMethod;

/// Configuration for CORS (Cross-Origin Resource Sharing)
#[derive(Clone, Default, Debug, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Origins allowed in production. Entries may be glob patterns such as `https://*.example.com`.
    /// Overridden by the `ALLOWED_ORIGINS` environment variable.
    pub allowed_origins: Vec<String>,
    /// If false (or not defined), credentials are not allowed in requests
    pub allow_credentials: bool,
    /// Maximum time between OPTIONS and the next request
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub max_age: Option<Duration>,
    /// HTTP methods allowed to the endpoint. All methods when not set.
    pub allow_methods: Option<Vec<HttpMethod>>,
    /// Headers allowed in incoming requests. All headers when not set.
    pub allow_headers: Option<Vec<String>>,
}

impl CorsConfig {
    /// Replaces the origin allowlist with a comma-separated list, as found in `ALLOWED_ORIGINS`.
    pub fn set_allowed_origins(&mut self, origins: &str) {
        self.allowed_origins = origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_separated_origins() {
        let mut config = CorsConfig::default();
        config.set_allowed_origins(" https://a.example.com,https://b.example.com , ,");

        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example.com".to_string(), "https://b.example.com".to_string()]
        );
    }
}
