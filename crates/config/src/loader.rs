use std::path::Path;

use anyhow::{bail, Context};
use indoc::formatdoc;

use crate::{Config, PresetName};

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

    toml::from_str(&content).with_context(|| format!("Failed to parse configuration file {}", path.display()))
}

/// Validates the configuration and returns warnings.
pub(crate) fn validate(config: &Config) -> anyhow::Result<Vec<String>> {
    let mut warnings = Vec::new();
    let server = &config.server;

    if server.health.enabled {
        let path = server.health.path.as_ref();

        if !path.starts_with('/') {
            bail!("The health endpoint path '{path}' must start with '/'");
        }

        if path == "/version" {
            bail!("The health endpoint cannot be served at '/version', the path is taken by the version endpoint");
        }
    }

    let rate_limits = &server.rate_limits;

    for name in PresetName::ALL {
        let quota = rate_limits.presets.resolve(name);

        if quota.limit == 0 {
            bail!("Rate limit preset '{name}' must allow at least one request");
        }

        if quota.window.is_zero() {
            bail!("Rate limit preset '{name}' must have a window longer than zero");
        }

        if quota.skip_successful_requests && quota.skip_failed_requests {
            warnings.push(format!(
                "Rate limit preset '{name}' skips both successful and failed requests, it will never limit anything"
            ));
        }
    }

    if rate_limits.sweep_interval.is_zero() {
        bail!("Rate limit sweep interval must be longer than zero");
    }

    for route in &rate_limits.routes {
        validate_path_pattern(&route.path, "rate limit")?;
    }

    if rate_limits.enabled && rate_limits.routes.is_empty() {
        warnings.push("Rate limiting is enabled but no routes are configured, no request will be limited".to_string());
    }

    let request_size = &server.request_size;

    if request_size.default_max_size == 0 {
        bail!("Request size default_max_size must be larger than zero");
    }

    for route in &request_size.routes {
        validate_path_pattern(&route.path, "request size")?;

        if route.max_size == 0 {
            bail!("Request size route '{}' must have a max_size larger than zero", route.path);
        }
    }

    if server.environment.is_production() && server.cors.allowed_origins.is_empty() {
        warnings.push(formatdoc! {r#"
            Running in production without allowed origins, all cross-origin requests will be refused.
            Set ALLOWED_ORIGINS or server.cors.allowed_origins to allow browser clients."#
        });
    }

    Ok(warnings)
}

fn validate_path_pattern(pattern: &str, kind: &str) -> anyhow::Result<()> {
    if pattern.is_empty() {
        bail!("A {kind} route has an empty path pattern");
    }

    if !pattern.starts_with('/') {
        bail!("The {kind} route pattern '{pattern}' must start with '/'");
    }

    Ok(())
}
