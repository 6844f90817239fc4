//! Daily publishing worker.
//!
//! This crate provides:
//! - The scheduling engine that keeps one upload per account per local day
//! - Normalization of drifted future uploads onto the daily grid
//! - The worker loop that revalidates and publishes due uploads
//! - The publish action contract and its HTTP implementation
//! - Graceful shutdown

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod normalize;
pub mod publish;
pub mod schedule;
pub mod worker;

pub use config::{EngineConfig, ScheduleConfig, WorkerConfig};
pub use engine::{PassSummary, SchedulingEngine};
pub use error::{WorkerError, WorkerResult};
pub use logging::PassLogger;
pub use publish::{HttpPublisher, PublishAction, PublishConfig, PublishError, PublishReceipt};
pub use worker::{BatchStats, Worker, WorkerState};
