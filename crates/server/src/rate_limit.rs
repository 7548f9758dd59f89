//! Rate limiting middleware for HTTP requests.

use std::{
    fmt::Display,
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{body::Body, extract::ConnectInfo};
use http::{HeaderMap, HeaderValue, Request, Response, header};
use rate_limit::{Decision, Denial, RateLimitManager, RateLimitRequest};
use tower::Layer;

use crate::response::{ApiError, Envelope, RateLimitDetails};

#[derive(Clone)]
pub struct RateLimitLayer {
    manager: Arc<RateLimitManager>,
    envelope: Envelope,
}

impl RateLimitLayer {
    pub(crate) fn new(manager: Arc<RateLimitManager>, envelope: Envelope) -> Self {
        Self { manager, envelope }
    }
}

impl<Service> Layer<Service> for RateLimitLayer
where
    Service: Send + Clone,
{
    type Service = RateLimitService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        RateLimitService {
            next,
            manager: self.manager.clone(),
            envelope: self.envelope.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<Service> {
    next: Service,
    manager: Arc<RateLimitManager>,
    envelope: Envelope,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for RateLimitService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = http::Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let manager = self.manager.clone();
        let envelope = self.envelope.clone();

        Box::pin(async move {
            let Some(policy) = manager.policy_for(req.method().as_str(), req.uri().path()) else {
                return next.call(req).await;
            };

            let request = rate_limit_request(&req);

            match policy.check(&request).await {
                Decision::Exempt => next.call(req).await,
                Decision::Deny(denial) => Ok(denied(&envelope, &denial)),
                Decision::Allow(state) => {
                    let mut response = next.call(req).await?;

                    for (name, value) in policy.headers(&state) {
                        if let Ok(value) = HeaderValue::from_str(&value) {
                            response.headers_mut().insert(name, value);
                        }
                    }

                    if policy.tracks_outcome() {
                        policy.record_outcome(&state, response.status().as_u16()).await;
                    }

                    Ok(response)
                }
            }
        })
    }
}

fn denied(envelope: &Envelope, denial: &Denial) -> Response<Body> {
    let error = ApiError::RateLimited {
        message: denial.message.clone(),
        details: RateLimitDetails {
            limit: denial.state.limit,
            window_ms: u64::try_from(denial.window.as_millis()).unwrap_or(u64::MAX),
            retry_after: denial.retry_after_secs,
            reset_time: denial.reset_time(),
        },
    };

    let mut response = envelope.error(&error);
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(denial.retry_after_secs));

    response
}

/// Collect what the rate limiter needs to know about a request.
fn rate_limit_request<B>(req: &Request<B>) -> RateLimitRequest {
    let headers = req.headers();

    RateLimitRequest {
        method: req.method().as_str().to_string(),
        path: req.uri().path().to_string(),
        forwarded_for: header_string(headers, "x-forwarded-for"),
        real_ip: header_string(headers, "x-real-ip"),
        socket_address: req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|connect_info| connect_info.0.ip()),
        user_agent: header_string(headers, header::USER_AGENT.as_str()),
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
