//! Generation service request/response types.

use serde::{Deserialize, Serialize};

use cadence_models::{GeneratorAccountId, RenderJobStatus};

/// An account on the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorAccount {
    pub id: GeneratorAccountId,
    pub name: String,
    #[serde(default)]
    pub background_url: Option<String>,
}

/// Request body for creating a generator account.
#[derive(Debug, Clone, Serialize)]
pub struct CreateAccountRequest<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_url: Option<&'a str>,
}

/// Request body for queueing a new render job.
#[derive(Debug, Clone, Serialize)]
pub struct CreateJobRequest<'a> {
    pub account_id: &'a str,
    pub top_text: &'a str,
    pub bottom_text: &'a str,
    pub video_duration: u32,
    pub status: RenderJobStatus,
}

/// Request body for a job status transition.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusUpdate {
    pub status: RenderJobStatus,
}

/// Rows are returned either as an array or, for single-row writes, an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Rows<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Rows<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            Rows::Many(rows) => rows,
            Rows::One(row) => vec![row],
        }
    }
}

/// Build a PostgREST `in.(..)` filter for job statuses.
pub(crate) fn status_filter(statuses: &[RenderJobStatus]) -> String {
    let joined: Vec<&str> = statuses.iter().map(RenderJobStatus::as_str).collect();
    format!("in.({})", joined.join(","))
}
