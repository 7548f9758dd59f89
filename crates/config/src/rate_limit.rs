//! Rate limiting configuration structures.

use std::{fmt, time::Duration};

use duration_str::{deserialize_duration, deserialize_option_duration};
use serde::Deserialize;

use crate::HttpMethod;

/// Rate limiting configuration for the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    pub enabled: bool,
    /// Storage backend configuration.
    pub storage: StorageConfig,
    /// How often the in-memory store drops expired windows.
    #[serde(deserialize_with = "deserialize_duration")]
    pub sweep_interval: Duration,
    /// How a request is mapped to the identity its quota is tracked against.
    pub key: KeyStrategy,
    /// Emit the `RateLimit-*` headers on allowed requests.
    pub standard_headers: bool,
    /// Also emit the legacy `X-RateLimit-*` headers.
    pub legacy_headers: bool,
    /// Never count health, version and metrics requests.
    pub skip_system_endpoints: bool,
    /// Quota overrides for the named presets.
    pub presets: PresetsConfig,
    /// Ordered route table binding request paths to presets. The first match wins.
    pub routes: Vec<RateLimitRoute>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage: StorageConfig::default(),
            sweep_interval: Duration::from_secs(60),
            key: KeyStrategy::default(),
            standard_headers: true,
            legacy_headers: false,
            skip_system_endpoints: true,
            presets: PresetsConfig::default(),
            routes: default_routes(),
        }
    }
}

fn default_routes() -> Vec<RateLimitRoute> {
    vec![
        RateLimitRoute {
            path: "/api/workflows".to_string(),
            method: Some(HttpMethod::Post),
            preset: PresetName::WorkflowCreation,
        },
        RateLimitRoute {
            path: "/api/workflows/*/audit/export".to_string(),
            method: None,
            preset: PresetName::AuditExport,
        },
        RateLimitRoute {
            path: "/api/governance/**".to_string(),
            method: Some(HttpMethod::Post),
            preset: PresetName::Governance,
        },
        RateLimitRoute {
            path: "/api/workflows/*/transition".to_string(),
            method: Some(HttpMethod::Post),
            preset: PresetName::Strict,
        },
        RateLimitRoute {
            path: "/api/**".to_string(),
            method: None,
            preset: PresetName::Standard,
        },
    ]
}

/// Binds a path pattern (and optionally a method) to a rate limit preset.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitRoute {
    /// Glob pattern matched against the request path, e.g. `/api/workflows/*/audit/export`.
    pub path: String,
    /// Only match requests with this method.
    pub method: Option<HttpMethod>,
    /// The preset applied to matching requests.
    pub preset: PresetName,
}

/// How the rate limit identity is derived from a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    /// The client address alone.
    #[default]
    Address,
    /// The client address combined with a fingerprint of its user agent.
    Fingerprint,
}

/// The named rate limit presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresetName {
    /// General API traffic.
    Standard,
    /// Sensitive operations.
    Strict,
    /// Governance decision submission.
    Governance,
    /// Audit artifact export.
    AuditExport,
    /// Workflow creation.
    WorkflowCreation,
}

impl PresetName {
    /// All presets.
    pub const ALL: [PresetName; 5] = [
        PresetName::Standard,
        PresetName::Strict,
        PresetName::Governance,
        PresetName::AuditExport,
        PresetName::WorkflowCreation,
    ];

    /// The preset name as used in configuration and store keys.
    pub fn as_str(self) -> &'static str {
        match self {
            PresetName::Standard => "standard",
            PresetName::Strict => "strict",
            PresetName::Governance => "governance",
            PresetName::AuditExport => "audit_export",
            PresetName::WorkflowCreation => "workflow_creation",
        }
    }

    fn default_quota(self) -> PresetQuota {
        let (limit, window, message) = match self {
            PresetName::Standard => (
                100,
                Duration::from_secs(15 * 60),
                "Too many requests from this client, please try again later.",
            ),
            PresetName::Strict => (
                20,
                Duration::from_secs(15 * 60),
                "Too many requests for this sensitive operation, please try again later.",
            ),
            PresetName::Governance => (
                50,
                Duration::from_secs(60),
                "Too many governance decisions submitted, please slow down.",
            ),
            PresetName::AuditExport => (
                20,
                Duration::from_secs(60 * 60),
                "Too many audit export requests, please try again later.",
            ),
            PresetName::WorkflowCreation => (
                50,
                Duration::from_secs(60),
                "Too many workflows created, please slow down.",
            ),
        };

        PresetQuota {
            name: self,
            limit,
            window,
            message: message.to_string(),
            skip_successful_requests: false,
            skip_failed_requests: false,
        }
    }
}

impl fmt::Display for PresetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overrides for every preset. Unset values keep the preset defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PresetsConfig {
    /// Overrides for the `standard` preset.
    pub standard: PresetOverride,
    /// Overrides for the `strict` preset.
    pub strict: PresetOverride,
    /// Overrides for the `governance` preset.
    pub governance: PresetOverride,
    /// Overrides for the `audit_export` preset.
    pub audit_export: PresetOverride,
    /// Overrides for the `workflow_creation` preset.
    pub workflow_creation: PresetOverride,
}

impl PresetsConfig {
    /// The effective quota of a preset: its defaults with the configured overrides applied.
    pub fn resolve(&self, name: PresetName) -> PresetQuota {
        let overrides = match name {
            PresetName::Standard => &self.standard,
            PresetName::Strict => &self.strict,
            PresetName::Governance => &self.governance,
            PresetName::AuditExport => &self.audit_export,
            PresetName::WorkflowCreation => &self.workflow_creation,
        };

        let mut quota = name.default_quota();

        if let Some(limit) = overrides.limit {
            quota.limit = limit;
        }

        if let Some(window) = overrides.window {
            quota.window = window;
        }

        if let Some(message) = &overrides.message {
            quota.message = message.clone();
        }

        if let Some(skip) = overrides.skip_successful_requests {
            quota.skip_successful_requests = skip;
        }

        if let Some(skip) = overrides.skip_failed_requests {
            quota.skip_failed_requests = skip;
        }

        quota
    }
}

/// Configured values for a single preset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PresetOverride {
    /// Maximum number of requests allowed within the window.
    pub limit: Option<u32>,
    /// Length of the window.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub window: Option<Duration>,
    /// Message returned to clients that exceed the quota.
    pub message: Option<String>,
    /// Give back the quota of requests answered with a status below 400.
    pub skip_successful_requests: Option<bool>,
    /// Give back the quota of requests answered with a status of 400 or above.
    pub skip_failed_requests: Option<bool>,
}

/// The effective quota of a preset.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetQuota {
    /// Which preset this is.
    pub name: PresetName,
    /// Maximum number of requests allowed within the window.
    pub limit: u32,
    /// Length of the window.
    pub window: Duration,
    /// Message returned to clients that exceed the quota.
    pub message: String,
    /// Give back the quota of successful requests.
    pub skip_successful_requests: bool,
    /// Give back the quota of failed requests.
    pub skip_failed_requests: bool,
}

/// Storage backend configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (default).
    #[default]
    Memory,
    /// Redis storage with configuration.
    Redis(Box<RedisConfig>),
}

/// Redis storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL (redis:// or rediss:// for TLS).
    pub url: String,
    /// Connection pool configuration.
    pub pool: RedisPoolConfig,
    /// Key prefix for all rate limit keys.
    pub key_prefix: String,
    /// Response timeout for Redis commands.
    #[serde(deserialize_with = "deserialize_duration")]
    pub response_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            pool: RedisPoolConfig::default(),
            key_prefix: "warden:rate_limit:".to_string(),
            response_timeout: Duration::from_secs(1),
        }
    }
}

/// Redis connection pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Maximum number of connections.
    pub max_size: Option<usize>,
    /// Timeout for creating connections.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_create: Option<Duration>,
    /// Timeout for waiting for a connection.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_wait: Option<Duration>,
    /// Timeout before recycling idle connections.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_recycle: Option<Duration>,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: Some(16),
            timeout_create: Some(Duration::from_secs(5)),
            timeout_wait: Some(Duration::from_secs(5)),
            timeout_recycle: Some(Duration::from_secs(300)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_storage_config() {
        let config = StorageConfig::default();
        insta::assert_debug_snapshot!(config, @"Memory");
    }

    #[test]
    fn deserialize_memory_storage() {
        let toml = r#"
            type = "memory"
        "#;
        let config: StorageConfig = toml::from_str(toml).unwrap();
        insta::assert_debug_snapshot!(config, @"Memory");
    }

    #[test]
    fn deserialize_redis_storage_minimal() {
        let toml = r#"
            type = "redis"
            url = "redis://cache:6379/2"
        "#;
        let config: StorageConfig = toml::from_str(toml).unwrap();
        insta::assert_debug_snapshot!(config, @r#"
        Redis(
            RedisConfig {
                url: "redis://cache:6379/2",
                pool: RedisPoolConfig {
                    max_size: Some(
                        16,
                    ),
                    timeout_create: Some(
                        5s,
                    ),
                    timeout_wait: Some(
                        5s,
                    ),
                    timeout_recycle: Some(
                        300s,
                    ),
                },
                key_prefix: "warden:rate_limit:",
                response_timeout: 1s,
            },
        )
        "#);
    }

    #[test]
    fn preset_defaults() {
        let presets = PresetsConfig::default();

        let table: Vec<_> = PresetName::ALL
            .iter()
            .map(|name| {
                let quota = presets.resolve(*name);
                (quota.name.as_str(), quota.limit, quota.window.as_secs())
            })
            .collect();

        assert_eq!(
            table,
            vec![
                ("standard", 100, 900),
                ("strict", 20, 900),
                ("governance", 50, 60),
                ("audit_export", 20, 3600),
                ("workflow_creation", 50, 60),
            ]
        );
    }

    #[test]
    fn preset_overrides_are_partial() {
        let toml = r#"
            [strict]
            limit = 3
            skip_failed_requests = true
        "#;

        let presets: PresetsConfig = toml::from_str(toml).unwrap();
        let strict = presets.resolve(PresetName::Strict);

        insta::assert_debug_snapshot!(strict, @r#"
        PresetQuota {
            name: Strict,
            limit: 3,
            window: 900s,
            message: "Too many requests for this sensitive operation, please try again later.",
            skip_successful_requests: false,
            skip_failed_requests: true,
        }
        "#);
    }

    #[test]
    fn route_table_from_toml() {
        let toml = r#"
            [[routes]]
            path = "/api/workflows/*/outputs"
            method = "POST"
            preset = "strict"

            [[routes]]
            path = "/api/**"
            preset = "standard"
        "#;

        let config: RateLimitConfig = toml::from_str(toml).unwrap();

        assert_eq!(
            config.routes,
            vec![
                RateLimitRoute {
                    path: "/api/workflows/*/outputs".to_string(),
                    method: Some(HttpMethod::Post),
                    preset: PresetName::Strict,
                },
                RateLimitRoute {
                    path: "/api/**".to_string(),
                    method: None,
                    preset: PresetName::Standard,
                },
            ]
        );
    }

    #[test]
    fn unknown_preset_is_rejected() {
        let toml = r#"
            [[routes]]
            path = "/api/**"
            preset = "lenient"
        "#;

        let result: Result<RateLimitConfig, _> = toml::from_str(toml);
        assert!(result.is_err());
    }
}
