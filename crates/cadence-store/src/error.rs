//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store not configured: {0}")]
    NotConfigured(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Server error {0}: {1}")]
    ServerError(u16, String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited, retry after {0}ms")]
    RateLimited(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store client closed")]
    Closed,
}

impl StoreError {
    pub fn not_configured(msg: impl Into<String>) -> Self {
        Self::NotConfigured(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            429 => Self::RateLimited(1000),
            404 => Self::NotFound(body),
            409 => Self::AlreadyExists(body),
            500..=599 => Self::ServerError(status, body),
            _ => Self::RequestFailed(format!("{}: {}", status, body)),
        }
    }

    /// Override the delay of a rate-limit error with a server-provided value.
    pub fn with_retry_after(self, retry_after_ms: Option<u64>) -> Self {
        match (self, retry_after_ms) {
            (Self::RateLimited(_), Some(ms)) => Self::RateLimited(ms),
            (other, _) => other,
        }
    }

    /// HTTP status this error was produced from, when known.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::RateLimited(_) => Some(429),
            Self::NotFound(_) => Some(404),
            Self::AlreadyExists(_) => Some(409),
            Self::ServerError(status, _) => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Server-requested delay before retrying.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Network(_) | StoreError::RateLimited(_) | StoreError::ServerError(_, _)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_http_status_429() {
        let err = StoreError::from_http_status(429, "rate limited");
        assert!(matches!(err, StoreError::RateLimited(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_from_http_status_500() {
        let err = StoreError::from_http_status(503, "service unavailable");
        assert!(matches!(err, StoreError::ServerError(503, _)));
        assert!(err.is_retryable());
        assert_eq!(err.http_status(), Some(503));
    }

    #[test]
    fn test_error_from_http_status_4xx() {
        assert!(matches!(
            StoreError::from_http_status(404, "missing"),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            StoreError::from_http_status(409, "duplicate"),
            StoreError::AlreadyExists(_)
        ));

        let err = StoreError::from_http_status(400, "bad request");
        assert!(matches!(err, StoreError::RequestFailed(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retry_after_only_applies_to_rate_limits() {
        let err = StoreError::from_http_status(429, "").with_retry_after(Some(2500));
        assert_eq!(err.retry_after_ms(), Some(2500));

        let err = StoreError::from_http_status(500, "").with_retry_after(Some(2500));
        assert_eq!(err.retry_after_ms(), None);
    }
}
