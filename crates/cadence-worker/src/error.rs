//! Worker error types.

use thiserror::Error;

use cadence_generator::GeneratorError;
use cadence_store::StoreError;

use crate::publish::PublishError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Timeout(_) => true,
            WorkerError::Generator(e) => e.is_retryable(),
            WorkerError::Store(e) => e.is_retryable(),
            WorkerError::Publish(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Malformed records; the affected candidate is skipped, not retried.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            WorkerError::InvalidData(_)
                | WorkerError::Generator(GeneratorError::InvalidResponse(_))
                | WorkerError::Store(StoreError::InvalidResponse(_))
        )
    }
}
