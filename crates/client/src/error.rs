use beacon_common::ErrorBody;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {status}: {}", .body.message)]
    Api { status: StatusCode, body: ErrorBody },
    #[error("server answered {0}")]
    Status(StatusCode),
}

impl ClientError {
    /// Timeouts, connection failures and 5xx answers flagged retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_timeout() || e.is_connect(),
            ClientError::Api { body, .. } => body.retryable,
            ClientError::Status(status) => *status == StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ClientError::Api { status, .. } | ClientError::Status(status) => *status == StatusCode::NOT_FOUND,
            ClientError::Http(_) => false,
        }
    }
}
