//! The JSON envelope every API response is wrapped in.

use std::sync::Arc;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::api::ServiceError;

/// API errors with a stable machine-readable code.
#[derive(Debug, Error)]
pub(crate) enum ApiError {
    /// The request payload or parameters are invalid.
    #[error("{message}")]
    Validation { message: String, details: Option<Value> },

    /// The addressed resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Something failed on our side. Details are logged, never returned.
    #[error("Internal server error")]
    Internal,

    /// The client exhausted its quota.
    #[error("{message}")]
    RateLimited { message: String, details: RateLimitDetails },

    /// The request is larger than the route allows.
    #[error("{message}")]
    TooLarge { message: String, details: SizeDetails },
}

impl ApiError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal => "INTERNAL_ERROR",
            Self::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            Self::TooLarge { .. } => "REQUEST_TOO_LARGE",
        }
    }

    fn details(&self) -> Option<Details<'_>> {
        match self {
            Self::Validation { details, .. } => details.as_ref().map(Details::Other),
            Self::RateLimited { details, .. } => Some(Details::RateLimit(details)),
            Self::TooLarge { details, .. } => Some(Details::Size(details)),
            Self::NotFound(_) | Self::Internal => None,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::NotFound(message) => Self::NotFound(message),
            ServiceError::Invalid(message) => Self::validation(message),
        }
    }
}

/// Details of a rate limit denial.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RateLimitDetails {
    pub limit: u32,
    pub window_ms: u64,
    pub retry_after: u64,
    pub reset_time: String,
}

/// Details of a size rejection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SizeDetails {
    pub request_size: u64,
    pub max_size: u64,
    pub size_exceeded_by: u64,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Details<'a> {
    RateLimit(&'a RateLimitDetails),
    Size(&'a SizeDetails),
    Other(&'a Value),
}

#[derive(Serialize)]
struct SuccessBody<'a, T> {
    success: bool,
    data: T,
    timestamp: String,
    version: &'a str,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: ErrorDetails<'a>,
    timestamp: String,
    version: &'a str,
}

#[derive(Serialize)]
struct ErrorDetails<'a> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Details<'a>>,
}

/// Renders successes and errors with the API version and a timestamp.
#[derive(Debug, Clone)]
pub(crate) struct Envelope {
    version: Arc<str>,
}

impl Envelope {
    pub fn new(version: &str) -> Self {
        Self {
            version: Arc::from(version),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn success<T: Serialize>(&self, status: StatusCode, data: T) -> Response {
        let body = SuccessBody {
            success: true,
            data,
            timestamp: timestamp(),
            version: &self.version,
        };

        (status, Json(body)).into_response()
    }

    pub fn error(&self, error: &ApiError) -> Response {
        let body = ErrorBody {
            success: false,
            error: ErrorDetails {
                code: error.code(),
                message: error.to_string(),
                details: error.details(),
            },
            timestamp: timestamp(),
            version: &self.version,
        };

        (error.status_code(), Json(body)).into_response()
    }

    /// Render a handler result, using `status` on success.
    pub fn respond<T, E>(&self, status: StatusCode, result: Result<T, E>) -> Response
    where
        T: Serialize,
        E: Into<ApiError>,
    {
        match result {
            Ok(data) => self.success(status, data),
            Err(error) => self.error(&error.into()),
        }
    }
}

fn timestamp() -> String {
    jiff::Timestamp::now().to_string()
}
