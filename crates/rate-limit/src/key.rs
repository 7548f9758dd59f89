//! Mapping requests to the identity their quota is tracked against.

use std::{fmt, net::IpAddr, sync::Arc};

use config::KeyStrategy;
use sha2::{Digest, Sha256};

use crate::request::RateLimitRequest;

/// Identity used when no client address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

const SYSTEM_ENDPOINTS: [&str; 3] = ["/health", "/version", "/metrics"];

type CustomKey = Arc<dyn Fn(&RateLimitRequest) -> String + Send + Sync>;

/// Derives the rate limit key of a request.
#[derive(Clone, Default)]
pub enum KeyGenerator {
    /// The client address.
    #[default]
    Address,
    /// The client address and a fingerprint of the user agent, as `{address}:{fingerprint}`.
    Fingerprint,
    /// A caller-provided function.
    Custom(CustomKey),
}

impl KeyGenerator {
    /// Wrap a custom key function.
    pub fn custom(generator: impl Fn(&RateLimitRequest) -> String + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(generator))
    }

    /// The key of a request.
    pub fn key(&self, request: &RateLimitRequest) -> String {
        match self {
            KeyGenerator::Address => client_address(request),
            KeyGenerator::Fingerprint => {
                let fingerprint = fingerprint(request.user_agent.as_deref().unwrap_or_default());
                format!("{}:{fingerprint}", client_address(request))
            }
            KeyGenerator::Custom(generator) => generator(request),
        }
    }
}

impl From<KeyStrategy> for KeyGenerator {
    fn from(strategy: KeyStrategy) -> Self {
        match strategy {
            KeyStrategy::Address => KeyGenerator::Address,
            KeyStrategy::Fingerprint => KeyGenerator::Fingerprint,
        }
    }
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyGenerator::Address => f.write_str("Address"),
            KeyGenerator::Fingerprint => f.write_str("Fingerprint"),
            KeyGenerator::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// The client address of a request.
///
/// Tries the first `X-Forwarded-For` entry, then `X-Real-IP`, then the socket address.
/// Values that do not parse as an IP address are ignored. Falls back to [`UNKNOWN_CLIENT`].
pub fn client_address(request: &RateLimitRequest) -> String {
    let forwarded = request
        .forwarded_for
        .as_deref()
        .and_then(|value| value.split(',').next())
        .and_then(parse_ip);

    let real_ip = || request.real_ip.as_deref().and_then(parse_ip);

    match forwarded.or_else(real_ip).or(request.socket_address) {
        Some(ip) => ip.to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    value.trim().parse().ok()
}

/// A stable numeric fingerprint of a user agent string.
pub fn fingerprint(user_agent: &str) -> u32 {
    let digest = Sha256::digest(user_agent.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Whether a path is an operational endpoint that is never rate limited.
pub fn skip_system_endpoints(path: &str) -> bool {
    SYSTEM_ENDPOINTS.iter().any(|endpoint| {
        path.strip_prefix(endpoint)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}
