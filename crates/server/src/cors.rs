use config::{CorsConfig, Environment};
use http::{HeaderName, HeaderValue};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders};

/// Quota headers browsers may read from cross-origin responses.
const EXPOSED_HEADERS: [&str; 7] = [
    "ratelimit-limit",
    "ratelimit-remaining",
    "ratelimit-reset",
    "x-ratelimit-limit",
    "x-ratelimit-remaining",
    "x-ratelimit-reset",
    "retry-after",
];

pub(super) fn generate(
    CorsConfig {
        allowed_origins,
        allow_credentials,
        max_age,
        allow_methods,
        allow_headers,
    }: &CorsConfig,
    environment: Environment,
) -> CorsLayer {
    let exposed = ExposeHeaders::list(EXPOSED_HEADERS.map(HeaderName::from_static));

    if !environment.is_production() {
        return CorsLayer::permissive().expose_headers(exposed);
    }

    let mut cors_layer = CorsLayer::new()
        .allow_credentials(*allow_credentials)
        .allow_origin(allow_origin(allowed_origins))
        .expose_headers(exposed);

    if let Some(max_age) = max_age {
        cors_layer = cors_layer.max_age(*max_age);
    }

    cors_layer = cors_layer.allow_methods(match allow_methods {
        Some(methods) => {
            let mut methods: Vec<http::Method> = methods.iter().map(|method| http::Method::from(*method)).collect();
            // Always include OPTIONS when explicit methods are configured
            if !methods.contains(&http::Method::OPTIONS) {
                methods.push(http::Method::OPTIONS);
            }
            AllowMethods::list(methods)
        }
        None => AllowMethods::mirror_request(),
    });

    cors_layer = cors_layer.allow_headers(match allow_headers {
        Some(headers) => {
            let headers = headers.iter().filter_map(|header| match HeaderName::from_bytes(header.as_bytes()) {
                Ok(name) => Some(name),
                Err(_) => {
                    log::warn!("Ignoring invalid CORS header name '{header}'");
                    None
                }
            });

            AllowHeaders::list(headers)
        }
        None => AllowHeaders::mirror_request(),
    });

    cors_layer
}

fn allow_origin(origins: &[String]) -> AllowOrigin {
    let mut constants = Vec::new();
    let mut globs = Vec::new();

    for origin in origins {
        let origin = origin.trim_end_matches('/');

        if origin.chars().any(|c| "?*[]{}!\\".contains(c)) {
            globs.push(origin.to_owned());
        } else {
            match HeaderValue::from_str(origin) {
                Ok(value) => constants.push(value),
                Err(_) => log::warn!("Ignoring invalid allowed origin '{origin}'"),
            }
        }
    }

    if globs.is_empty() {
        return AllowOrigin::list(constants);
    }

    AllowOrigin::predicate(move |origin, _| -> bool {
        if constants.iter().any(|constant| origin == constant) {
            return true;
        }

        let Ok(origin) = origin.to_str() else {
            return false;
        };

        globs.iter().any(|glob| fast_glob::glob_match(glob.as_str(), origin))
    })
}
