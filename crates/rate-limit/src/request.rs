//! Request information for rate limiting.

use std::net::IpAddr;

/// The parts of an inbound request the rate limiter looks at.
///
/// Header values that are missing or not valid UTF-8 are kept as `None`.
#[derive(Debug, Clone, Default)]
pub struct RateLimitRequest {
    /// HTTP method token.
    pub method: String,
    /// Request path, without the query string.
    pub path: String,
    /// Raw `X-Forwarded-For` value.
    pub forwarded_for: Option<String>,
    /// Raw `X-Real-IP` value.
    pub real_ip: Option<String>,
    /// Address of the peer socket.
    pub socket_address: Option<IpAddr>,
    /// Raw `User-Agent` value.
    pub user_agent: Option<String>,
}

impl RateLimitRequest {
    /// Create a new builder for a rate limit request.
    pub fn builder() -> RateLimitRequestBuilder {
        RateLimitRequestBuilder::default()
    }
}

/// Builder for creating rate limit requests.
#[derive(Debug, Default)]
pub struct RateLimitRequestBuilder {
    request: RateLimitRequest,
}

impl RateLimitRequestBuilder {
    /// Set the method.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.request.method = method.into();
        self
    }

    /// Set the path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.request.path = path.into();
        self
    }

    /// Set the `X-Forwarded-For` header value.
    pub fn forwarded_for(mut self, value: impl Into<String>) -> Self {
        self.request.forwarded_for = Some(value.into());
        self
    }

    /// Set the `X-Real-IP` header value.
    pub fn real_ip(mut self, value: impl Into<String>) -> Self {
        self.request.real_ip = Some(value.into());
        self
    }

    /// Set the peer socket address.
    pub fn socket_address(mut self, ip: IpAddr) -> Self {
        self.request.socket_address = Some(ip);
        self
    }

    /// Set the `User-Agent` header value.
    pub fn user_agent(mut self, value: impl Into<String>) -> Self {
        self.request.user_agent = Some(value.into());
        self
    }

    /// Build the rate limit request.
    pub fn build(self) -> RateLimitRequest {
        self.request
    }
}
