//! Warden server library.
//!
//! Provides a reusable server function to serve Warden either for the binary, or for the integration tests.

#![deny(missing_docs)]

mod api;
mod cors;
mod health;
mod rate_limit;
mod request_size;
mod response;
mod security;

use std::{net::SocketAddr, sync::Arc};

use ::rate_limit::{RateLimitManager, SystemClock};
use anyhow::anyhow;
use axum::{Router, extract::DefaultBodyLimit, routing::get};
use config::Config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{rate_limit::RateLimitLayer, request_size::RequestSizeLayer};

pub use crate::request_size::RequestSize;

/// Configuration for serving Warden.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized Warden TOML configuration.
    pub config: Config,
    /// Cancelling the token stops accepting connections and shuts the server down gracefully.
    pub shutdown: CancellationToken,
}

/// Starts and runs the Warden server with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown,
    }: ServeConfig,
) -> anyhow::Result<()> {
    let server = &config.server;
    let envelope = response::Envelope::new(&server.api_version);

    let rate_limit_manager = if server.rate_limits.enabled {
        log::debug!("Initializing rate limit manager with configured limits");
        let manager = RateLimitManager::new(&server.rate_limits, Arc::new(SystemClock)).await?;

        Some(Arc::new(manager))
    } else {
        log::debug!("Rate limiting disabled - no manager created");
        None
    };

    let mut app = api::router(api::Services::in_memory(), envelope.clone());

    // Rate limiting sits inside the size guard, so oversized requests are never counted.
    if let Some(manager) = &rate_limit_manager {
        app = app.layer(RateLimitLayer::new(manager.clone(), envelope.clone()));
    }

    if server.request_size.enabled {
        app = app
            .layer(
                RequestSizeLayer::new(&server.request_size, envelope.clone()).on_size_exceeded(|size, max_size| {
                    log::warn!("Rejected a request of {size} bytes, the limit is {max_size}");
                }),
            )
            .layer(DefaultBodyLimit::disable());
    }

    if server.health.enabled {
        app = app.route(&server.health.path, get(health::health));
    }

    app = app.merge(Router::new().route("/version", get(health::version)).with_state(envelope));
    app = security::inject_layers(app, server.environment, &server.security);
    app = app.layer(cors::generate(&server.cors, server.environment));

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    log::info!(
        "Warden listening on http://{listen_address} ({} environment)",
        server.environment
    );

    let result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| anyhow!("Failed to start HTTP server: {e}"));

    if let Some(manager) = rate_limit_manager {
        manager.shutdown();
    }

    result
}
