//! Shared data models for the Cadence publishing worker.
//!
//! This crate provides Serde-serializable types for:
//! - Managed accounts and their generator-account mapping
//! - Render jobs tracked by the generation service
//! - Videos, scheduled uploads and project links
//! - Asset location helpers

mod ids;

pub mod account;
pub mod project_link;
pub mod render_job;
pub mod upload;
pub mod utils;
pub mod video;

// Re-export common types
pub use account::{Account, AccountId};
pub use project_link::{NewProjectLink, ProjectLink, ProjectLinkId, ProjectLinkStatus};
pub use render_job::{GeneratorAccountId, RenderJob, RenderJobId, RenderJobStatus};
pub use upload::{NewUpload, Upload, UploadId, UploadPatch, UploadStatus};
pub use utils::{resolve_storage_path, storage_source_id};
pub use video::{NewVideo, Video, VideoId};
