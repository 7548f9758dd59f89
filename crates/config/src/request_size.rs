//! Request size guard configuration.

use serde::Deserialize;

use crate::HttpMethod;

/// Limits on the approximate wire size of inbound requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestSizeConfig {
    /// Whether the size guard is enabled.
    pub enabled: bool,
    /// Ceiling in bytes for requests matching no route.
    pub default_max_size: u64,
    /// Count header names and values, the URL and the method towards the size.
    pub include_headers: bool,
    /// Let a request through when its size cannot be determined instead of rejecting it.
    pub skip_on_error: bool,
    /// Message returned with a rejection.
    pub message: String,
    /// Ordered per-route ceilings. The first match wins.
    pub routes: Vec<SizeRoute>,
}

impl Default for RequestSizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_max_size: 1024 * 1024,
            include_headers: false,
            skip_on_error: true,
            message: "Request entity too large".to_string(),
            routes: default_routes(),
        }
    }
}

fn default_routes() -> Vec<SizeRoute> {
    vec![
        SizeRoute {
            path: "/api/workflows/*/outputs".to_string(),
            method: Some(HttpMethod::Post),
            max_size: 5 * 1024 * 1024,
        },
        SizeRoute {
            path: "/api/governance/**".to_string(),
            method: None,
            max_size: 512 * 1024,
        },
        SizeRoute {
            path: "/api/workflows/*/audit/export".to_string(),
            method: None,
            max_size: 64 * 1024,
        },
        SizeRoute {
            path: "/api/workflows".to_string(),
            method: Some(HttpMethod::Post),
            max_size: 100 * 1024,
        },
    ]
}

/// A size ceiling for requests matching a path pattern.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizeRoute {
    /// Glob pattern matched against the request path.
    pub path: String,
    /// Only match requests with this method.
    pub method: Option<HttpMethod>,
    /// Ceiling in bytes.
    pub max_size: u64,
}
