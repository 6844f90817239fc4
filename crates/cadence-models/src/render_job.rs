//! Render jobs tracked by the generation service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::string_id;

string_id!(
    /// Identifier of a render job (a "video project" on the generation service).
    RenderJobId
);

string_id!(
    /// Identifier of an account on the generation service.
    GeneratorAccountId
);

/// Render job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderJobStatus {
    /// Job accepted, rendering not started
    Generating,
    /// Rendering in progress
    Processing,
    /// Asset rendered and available
    Completed,
    /// Consumed by an upload
    Assigned,
    /// Any status this worker does not act on
    #[serde(other)]
    Unknown,
}

impl RenderJobStatus {
    /// Statuses counted towards the in-flight buffer.
    pub const IN_FLIGHT: [RenderJobStatus; 2] =
        [RenderJobStatus::Generating, RenderJobStatus::Processing];

    pub fn as_str(&self) -> &'static str {
        match self {
            RenderJobStatus::Generating => "generating",
            RenderJobStatus::Processing => "processing",
            RenderJobStatus::Completed => "completed",
            RenderJobStatus::Assigned => "assigned",
            RenderJobStatus::Unknown => "unknown",
        }
    }

    pub fn is_in_flight(&self) -> bool {
        Self::IN_FLIGHT.contains(self)
    }
}

impl std::fmt::Display for RenderJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A render job as returned by the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJob {
    pub id: RenderJobId,
    /// Owning generator account
    pub account_id: GeneratorAccountId,
    pub status: RenderJobStatus,
    /// Public location of the rendered asset
    #[serde(default)]
    pub video_url: Option<String>,
    /// Primary source clip used in the render
    #[serde(default)]
    pub primary_video_id: Option<String>,
    /// Secondary source clip used in the render
    #[serde(default)]
    pub secondary_video_id: Option<String>,
    /// Duration in seconds
    #[serde(default)]
    pub video_duration: Option<i32>,
    #[serde(default)]
    pub top_text: Option<String>,
    #[serde(default)]
    pub bottom_text: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl RenderJob {
    /// Source clip identifiers present on this job.
    pub fn clip_ids(&self) -> impl Iterator<Item = &str> {
        self.primary_video_id
            .iter()
            .chain(self.secondary_video_id.iter())
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}
