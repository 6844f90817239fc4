//! Video records created when a render job is selected.

use serde::{Deserialize, Serialize};

use crate::ids::string_id;

string_id!(
    /// Unique identifier for a video record.
    VideoId
);

/// A publishable video, deduplicated by `source_video_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: VideoId,
    /// Deduplication key derived from the asset location
    pub source_video_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub theme_slug: String,
    #[serde(default)]
    pub source_platform: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<i32>,
    #[serde(default)]
    pub picked: bool,
}

/// Insert/upsert payload for a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVideo {
    pub source_video_id: String,
    pub title: Option<String>,
    pub theme_slug: String,
    pub source_platform: Option<String>,
    pub duration_seconds: Option<i32>,
}
