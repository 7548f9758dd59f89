//! Security response headers and HTTPS enforcement.

use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
};
use config::{Environment, SecurityConfig};
use http::{HeaderName, HeaderValue, header};
use tower_http::set_header::SetResponseHeaderLayer;

const STATIC_HEADERS: [(&str, &str); 5] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "no-referrer"),
    ("content-security-policy", "default-src 'none'; frame-ancestors 'none'"),
    ("cross-origin-resource-policy", "same-origin"),
];

/// Wraps the router with the security headers, and in production with HSTS and the
/// HTTPS redirect. Headers a handler already set are kept.
pub(super) fn inject_layers(mut app: Router, environment: Environment, config: &SecurityConfig) -> Router {
    if environment.is_production() {
        if config.enforce_https {
            app = app.layer(middleware::from_fn(redirect_plain_http));
        }

        let hsts = format!("max-age={}; includeSubDomains", config.hsts_max_age.as_secs());

        match HeaderValue::from_str(&hsts) {
            Ok(value) => {
                app = app.layer(SetResponseHeaderLayer::if_not_present(
                    header::STRICT_TRANSPORT_SECURITY,
                    value,
                ));
            }
            Err(e) => log::error!("Invalid Strict-Transport-Security value: {e}"),
        }
    }

    for (name, value) in STATIC_HEADERS {
        app = app.layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ));
    }

    app
}

/// Redirects requests a proxy reports as plain HTTP to the same URL over HTTPS.
async fn redirect_plain_http(request: Request, next: Next) -> Response {
    let forwarded_plain = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("http"));

    if !forwarded_plain {
        return next.run(request).await;
    }

    let Some(host) = request.headers().get(header::HOST).and_then(|value| value.to_str().ok()) else {
        return next.run(request).await;
    };

    let path = request
        .uri()
        .path_and_query()
        .map(|path_and_query| path_and_query.as_str())
        .unwrap_or("/");

    let location = format!("https://{host}{path}");
    log::debug!("Redirecting plain HTTP request to {location}");

    Redirect::permanent(&location).into_response()
}
