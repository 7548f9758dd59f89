//! Warden configuration structures to map the warden.toml configuration.

#![deny(missing_docs)]

mod cors;
mod http_method;
mod loader;
mod rate_limit;
mod request_size;
mod security;

use std::{borrow::Cow, fmt, net::SocketAddr, path::Path, str::FromStr};

pub use cors::CorsConfig;
pub use http_method::HttpMethod;
pub use rate_limit::*;
pub use request_size::{RequestSizeConfig, SizeRoute};
pub use security::SecurityConfig;
use serde::Deserialize;

/// Main configuration structure for the Warden application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Parse the configuration file at the given path.
    ///
    /// The result is not validated, so that overrides can be applied before [`Config::validate`] runs.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates quotas, route tables and size ceilings, returning warnings for suspicious settings.
    pub fn validate(&self) -> anyhow::Result<Vec<String>> {
        loader::validate(self)
    }
}

/// HTTP server configuration settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// Deployment environment, selecting HTTPS enforcement and origin restrictions.
    pub environment: Environment,
    /// Version string reported in every response envelope.
    pub api_version: String,
    /// Health endpoint configuration.
    pub health: HealthConfig,
    /// CORS configuration.
    pub cors: CorsConfig,
    /// Security header configuration.
    pub security: SecurityConfig,
    /// Rate limiting configuration.
    pub rate_limits: RateLimitConfig,
    /// Request size guard configuration.
    pub request_size: RequestSizeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: None,
            environment: Environment::default(),
            api_version: env!("CARGO_PKG_VERSION").to_string(),
            health: HealthConfig::default(),
            cors: CorsConfig::default(),
            security: SecurityConfig::default(),
            rate_limits: RateLimitConfig::default(),
            request_size: RequestSizeConfig::default(),
        }
    }
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development: permissive CORS, no HTTPS enforcement.
    #[default]
    Development,
    /// Production: origin allowlist and HTTPS enforcement.
    Production,
    /// Automated test runs.
    Test,
}

impl Environment {
    /// Whether this is a production deployment.
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(format!("Unknown environment: {other}")),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        };

        f.write_str(name)
    }
}

/// Health endpoint configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Whether the health endpoint is enabled.
    pub enabled: bool,
    /// The path for the health endpoint.
    pub path: Cow<'static, str>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            enabled: true,
            path: Cow::Borrowed("/health"),
        }
    }
}
