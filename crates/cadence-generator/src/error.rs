//! Generator client error types.

use thiserror::Error;

pub type GeneratorResult<T> = Result<T, GeneratorError>;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Generator not configured: {0}")]
    NotConfigured(String),

    #[error("Generator service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GeneratorError {
    pub fn not_configured(msg: impl Into<String>) -> Self {
        Self::NotConfigured(msg.into())
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            500..=599 | 429 => Self::ServiceUnavailable(format!("{}: {}", status, body)),
            _ => Self::RequestFailed(format!("{}: {}", status, body)),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            GeneratorError::ServiceUnavailable(_) => true,
            GeneratorError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(GeneratorError::from_http_status(503, "down").is_retryable());
        assert!(GeneratorError::from_http_status(429, "slow down").is_retryable());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        let err = GeneratorError::from_http_status(400, "bad filter");
        assert!(matches!(err, GeneratorError::RequestFailed(_)));
        assert!(!err.is_retryable());
        assert!(!GeneratorError::not_configured("missing url").is_retryable());
    }
}
