//! Scheduled uploads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::ids::string_id;
use crate::video::VideoId;

string_id!(
    /// Unique identifier for an upload.
    UploadId
);

/// Upload lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Created without a confirmed slot
    Pending,
    /// Waiting for its scheduled instant
    #[default]
    Scheduled,
    /// A previous publish attempt failed and will be retried
    Retry,
    /// Publish in progress
    Uploading,
    /// Moved to another day; runs when the new instant is due
    Skipped,
    /// Published
    Done,
    /// Publish failed permanently
    Failed,
}

impl UploadStatus {
    /// Statuses that occupy an account-local calendar day.
    pub const OCCUPYING: [UploadStatus; 6] = [
        UploadStatus::Pending,
        UploadStatus::Scheduled,
        UploadStatus::Retry,
        UploadStatus::Uploading,
        UploadStatus::Skipped,
        UploadStatus::Done,
    ];

    /// Statuses picked up by the worker once their instant is due.
    pub const DUE: [UploadStatus; 4] = [
        UploadStatus::Scheduled,
        UploadStatus::Retry,
        UploadStatus::Uploading,
        UploadStatus::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Scheduled => "scheduled",
            UploadStatus::Retry => "retry",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Skipped => "skipped",
            UploadStatus::Done => "done",
            UploadStatus::Failed => "failed",
        }
    }

    /// True for every status except a terminal failure.
    pub fn occupies_day(&self) -> bool {
        !matches!(self, UploadStatus::Failed)
    }

    /// Published or publishing uploads never move.
    pub fn is_pinned(&self) -> bool {
        matches!(self, UploadStatus::Done | UploadStatus::Uploading)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A publish-scheduling record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    pub id: UploadId,
    pub account_id: AccountId,
    pub video_id: VideoId,
    pub scheduled_for: DateTime<Utc>,
    #[serde(default)]
    pub status: UploadStatus,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub retry_count: i32,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    /// Identifier assigned by the destination platform once published
    #[serde(default)]
    pub platform_video_id: Option<String>,
}

impl Upload {
    /// Whether this upload should keep its day ahead of `other` on the same date.
    ///
    /// Pinned uploads always win; otherwise the earlier instant (then the
    /// smaller id) keeps the slot.
    pub fn takes_precedence_over(&self, other: &Upload) -> bool {
        match (self.status.is_pinned(), other.status.is_pinned()) {
            (true, false) => true,
            (false, true) => false,
            _ => (self.scheduled_for, &self.id) < (other.scheduled_for, &other.id),
        }
    }
}

/// Insert payload for an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUpload {
    pub account_id: AccountId,
    pub video_id: VideoId,
    pub scheduled_for: DateTime<Utc>,
    pub status: UploadStatus,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// Partial update for an upload. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<UploadStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_video_id: Option<String>,
}

impl UploadPatch {
    /// Move an upload to a new instant without changing its status.
    pub fn reschedule(to: DateTime<Utc>) -> Self {
        Self {
            scheduled_for: Some(to),
            ..Default::default()
        }
    }

    /// Move an upload and mark it as rescheduled.
    pub fn skip_to(to: DateTime<Utc>) -> Self {
        Self {
            scheduled_for: Some(to),
            status: Some(UploadStatus::Skipped),
            ..Default::default()
        }
    }

    /// Change only the status.
    pub fn status(status: UploadStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Apply this patch to an in-memory upload.
    pub fn apply_to(&self, upload: &mut Upload) {
        if let Some(at) = self.scheduled_for {
            upload.scheduled_for = at;
        }
        if let Some(status) = self.status {
            upload.status = status;
        }
        if let Some(count) = self.retry_count {
            upload.retry_count = count;
        }
        if let Some(error) = &self.error {
            upload.error = Some(error.clone());
        }
        if let Some(run_id) = &self.run_id {
            upload.run_id = Some(run_id.clone());
        }
        if let Some(platform_id) = &self.platform_video_id {
            upload.platform_video_id = Some(platform_id.clone());
        }
    }
}
