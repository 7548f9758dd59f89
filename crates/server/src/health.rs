use axum::{Json, extract::State, http::StatusCode, response::Response};
use serde::Serialize;

use crate::response::Envelope;

#[derive(Debug, serde::Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum HealthState {
    /// Indicates that the server is healthy and operational.
    Healthy,
}

/// Handles health check requests and returns the current health status of the server.
pub(crate) async fn health() -> (StatusCode, Json<HealthState>) {
    (StatusCode::OK, Json(HealthState::Healthy))
}

#[derive(Serialize)]
struct VersionInfo<'a> {
    version: &'a str,
}

/// Reports the API version.
pub(crate) async fn version(State(envelope): State<Envelope>) -> Response {
    envelope.success(
        StatusCode::OK,
        VersionInfo {
            version: envelope.version(),
        },
    )
}
