//! Join records binding a render job to the upload that consumed it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::ids::string_id;
use crate::render_job::RenderJobId;
use crate::upload::UploadId;
use crate::video::VideoId;

string_id!(
    /// Unique identifier for a project link row.
    ProjectLinkId
);

/// Status mirrored on a project link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectLinkStatus {
    /// Attached to a scheduled upload
    #[default]
    Scheduled,
    /// The upload was published
    Uploaded,
    #[serde(other)]
    Unknown,
}

impl ProjectLinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectLinkStatus::Scheduled => "scheduled",
            ProjectLinkStatus::Uploaded => "uploaded",
            ProjectLinkStatus::Unknown => "unknown",
        }
    }

    /// A render job behind a consuming link cannot be selected again.
    pub fn is_consumed(&self) -> bool {
        matches!(self, ProjectLinkStatus::Scheduled | ProjectLinkStatus::Uploaded)
    }
}

/// A render job bound to an account, video and upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectLink {
    pub id: ProjectLinkId,
    pub generator_project_id: RenderJobId,
    pub account_id: AccountId,
    #[serde(default)]
    pub video_id: Option<VideoId>,
    #[serde(default)]
    pub upload_id: Option<UploadId>,
    /// Relative storage path of the rendered asset
    #[serde(default)]
    pub storage_path: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub primary_video_id: Option<String>,
    #[serde(default)]
    pub secondary_video_id: Option<String>,
    #[serde(default)]
    pub status: ProjectLinkStatus,
    /// Mirror of the upload's scheduled instant
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl ProjectLink {
    /// Whether the rendered asset behind this link exists.
    pub fn has_materialized_asset(&self) -> bool {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
        present(&self.storage_path) || present(&self.video_url)
    }
}

/// Insert payload for a project link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProjectLink {
    pub generator_project_id: RenderJobId,
    pub account_id: AccountId,
    pub video_id: VideoId,
    pub upload_id: UploadId,
    pub storage_path: String,
    pub video_url: Option<String>,
    pub primary_video_id: Option<String>,
    pub secondary_video_id: Option<String>,
    pub status: ProjectLinkStatus,
    pub scheduled_for: DateTime<Utc>,
}
