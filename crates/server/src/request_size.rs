//! Request size guard.
//!
//! The size of a request is its body length, plus the method, URL and headers when
//! configured. A declared `Content-Length` is trusted without reading the body. Otherwise
//! the body is buffered until it ends or exceeds the route ceiling, in which case the
//! reported size is the number of bytes read so far.

use std::{
    convert::Infallible,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::{Body, Bytes};
use config::RequestSizeConfig;
use futures::StreamExt;
use http::{HeaderMap, Request, Response, header, request::Parts};
use rate_limit::RouteTable;
use tower::Layer;

use crate::response::{ApiError, Envelope, SizeDetails};

/// The computed size of a request, available to handlers as an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestSize(pub u64);

type SizeObserver = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Clone)]
struct SizeGuard {
    default_max_size: u64,
    include_headers: bool,
    skip_on_error: bool,
    message: String,
    routes: RouteTable<u64>,
    envelope: Envelope,
    on_size_exceeded: Option<SizeObserver>,
}

impl SizeGuard {
    fn max_size(&self, method: &str, path: &str) -> u64 {
        self.routes
            .find(method, path)
            .copied()
            .unwrap_or(self.default_max_size)
    }

    fn too_large(&self, request_size: u64, max_size: u64) -> Response<Body> {
        if let Some(observer) = &self.on_size_exceeded {
            observer(request_size, max_size);
        }

        self.envelope.error(&ApiError::TooLarge {
            message: self.message.clone(),
            details: SizeDetails {
                request_size,
                max_size,
                size_exceeded_by: request_size.saturating_sub(max_size),
            },
        })
    }
}

#[derive(Clone)]
pub struct RequestSizeLayer(Arc<SizeGuard>);

impl RequestSizeLayer {
    pub(crate) fn new(config: &RequestSizeConfig, envelope: Envelope) -> Self {
        let mut routes = RouteTable::new();

        for route in &config.routes {
            routes.push(route.path.clone(), route.method, route.max_size);
        }

        Self(Arc::new(SizeGuard {
            default_max_size: config.default_max_size,
            include_headers: config.include_headers,
            skip_on_error: config.skip_on_error,
            message: config.message.clone(),
            routes,
            envelope,
            on_size_exceeded: None,
        }))
    }

    /// Call the observer synchronously with the request size and the ceiling for every rejected request.
    pub(crate) fn on_size_exceeded(self, observer: impl Fn(u64, u64) + Send + Sync + 'static) -> Self {
        let mut guard = Arc::unwrap_or_clone(self.0);
        guard.on_size_exceeded = Some(Arc::new(observer));

        Self(Arc::new(guard))
    }
}

impl<Service> Layer<Service> for RequestSizeLayer
where
    Service: Send + Clone,
{
    type Service = RequestSizeService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        RequestSizeService {
            next,
            guard: self.0.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequestSizeService<Service> {
    next: Service,
    guard: Arc<SizeGuard>,
}

impl<Service> tower::Service<Request<Body>> for RequestSizeService<Service>
where
    Service: tower::Service<Request<Body>, Response = Response<Body>, Error = Infallible> + Send + Clone + 'static,
    Service::Future: Send,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut next = self.next.clone();
        let guard = self.guard.clone();

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();

            let max_size = guard.max_size(parts.method.as_str(), parts.uri.path());
            let overhead = if guard.include_headers { envelope_size(&parts) } else { 0 };

            let (body_size, body) = match declared_length(&parts.headers) {
                Some(length) => (length, body),
                None => match buffer(body, max_size.saturating_sub(overhead)).await {
                    Buffered::Complete { size, body } => (size, body),
                    Buffered::Exceeded { size } => {
                        return Ok(guard.too_large(size.saturating_add(overhead), max_size));
                    }
                    Buffered::Failed { error, body } => {
                        if !guard.skip_on_error {
                            log::debug!("Failed to read request body: {error}");
                            return Ok(guard
                                .envelope
                                .error(&ApiError::validation("Unable to determine request size")));
                        }

                        log::warn!("Failed to determine request size, letting the request through: {error}");
                        return next.call(Request::from_parts(parts, body)).await;
                    }
                },
            };

            let size = body_size.saturating_add(overhead);

            if size > max_size {
                return Ok(guard.too_large(size, max_size));
            }

            parts.extensions.insert(RequestSize(size));
            next.call(Request::from_parts(parts, body)).await
        })
    }
}

enum Buffered {
    Complete { size: u64, body: Body },
    Exceeded { size: u64 },
    Failed { error: axum::Error, body: Body },
}

/// Reads the body until it ends or grows beyond `limit` bytes.
async fn buffer(body: Body, limit: u64) -> Buffered {
    let mut stream = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut size: u64 = 0;

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                size = size.saturating_add(chunk.len() as u64);
                chunks.push(chunk);

                if size > limit {
                    return Buffered::Exceeded { size };
                }
            }
            Err(error) => {
                // The handler sees the bytes received so far followed by the same failure.
                let replay = Body::from_stream(futures::stream::iter(
                    chunks
                        .into_iter()
                        .map(Ok)
                        .chain(std::iter::once(Err(axum::Error::new(error.to_string())))),
                ));

                return Buffered::Failed { error, body: replay };
            }
        }
    }

    let body = Body::from_stream(futures::stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>)));

    Buffered::Complete { size, body }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Bytes of the method token, the URL and every header name and value.
fn envelope_size(parts: &Parts) -> u64 {
    let headers: usize = parts
        .headers
        .iter()
        .map(|(name, value)| name.as_str().len() + value.as_bytes().len())
        .sum();

    (parts.method.as_str().len() + parts.uri.to_string().len() + headers) as u64
}
