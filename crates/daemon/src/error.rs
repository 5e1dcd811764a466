use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use beacon_common::ErrorBody;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid registration: {0}")]
    Validation(String),
    #[error("instance {instance_id} of service {service} is not registered")]
    UnknownInstance { service: String, instance_id: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration for {application}/{profile} at label {label}")]
    NotFound {
        application: String,
        profile: String,
        label: String,
    },
    #[error("invalid config request: {0}")]
    Validation(String),
    /// The backing store could not be reached right now; the caller may retry.
    #[error("config store unavailable: {0}")]
    Unavailable(String),
    #[error("config store error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("failed to import {path}: {reason}")]
    Import { path: String, reason: String },
}

impl ConfigError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConfigError::Unavailable(_))
    }
}

/// Error returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Registry(RegistryError::Validation(_)) => (StatusCode::BAD_REQUEST, "validation"),
            ApiError::Registry(RegistryError::UnknownInstance { .. }) => (StatusCode::NOT_FOUND, "unknown_instance"),
            ApiError::Config(ConfigError::NotFound { .. }) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Config(ConfigError::Validation(_)) => (StatusCode::BAD_REQUEST, "validation"),
            ApiError::Config(ConfigError::Unavailable(_)) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            ApiError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        };
        let retryable = matches!(&self, ApiError::Config(e) if e.is_retryable());

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorBody {
            error: code.to_string(),
            message: self.to_string(),
            retryable,
        };
        let mut response = (status, Json(body)).into_response();
        if retryable {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}
