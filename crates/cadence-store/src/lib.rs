//! Durable store for the publishing worker.
//!
//! This crate provides:
//! - The `Repository` contract consumed by the scheduling engine and worker
//! - The `QuotaReset` contract triggered after local midnight
//! - `RestRepository`, a PostgREST-backed implementation of both
//! - Retry with jittered exponential backoff and request metrics

pub mod client;
pub mod error;
pub mod metrics;
pub mod repository;
pub mod retry;

pub use client::{RestRepository, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use repository::{QuotaReset, Repository};
pub use retry::RetryConfig;
