//! Client for the render-job generation service.
//!
//! The generation service owns generator accounts and render jobs
//! ("video projects"). This crate exposes the narrow contract the scheduling
//! engine needs: ensure an account, create jobs, list jobs by status and
//! transition a job once it has been consumed.

pub mod client;
pub mod error;
pub mod types;

pub use client::{GeneratorClient, GeneratorConfig, HttpGeneratorClient};
pub use error::{GeneratorError, GeneratorResult};
pub use types::GeneratorAccount;
