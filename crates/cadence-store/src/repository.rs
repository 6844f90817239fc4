//! Contracts the scheduling engine and worker need from the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cadence_models::{
    Account, AccountId, GeneratorAccountId, NewProjectLink, NewUpload, NewVideo, ProjectLink,
    ProjectLinkId, ProjectLinkStatus, RenderJobId, Upload, UploadId, UploadPatch, UploadStatus,
    Video, VideoId,
};

use crate::error::StoreResult;

/// Durable records for accounts, uploads, videos and project links.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Active accounts publishing under `theme`.
    async fn list_active_accounts(&self, theme: &str) -> StoreResult<Vec<Account>>;

    async fn get_account(&self, id: &AccountId) -> StoreResult<Option<Account>>;

    /// Persist the account's generator-account mapping.
    async fn set_generator_mapping(
        &self,
        account_id: &AccountId,
        generator_account_id: &GeneratorAccountId,
    ) -> StoreResult<()>;

    /// Uploads for `account_id` with `scheduled_for` in `[from, to)` and a
    /// status in `statuses`, ordered by `scheduled_for` ascending.
    async fn query_uploads(
        &self,
        account_id: &AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        statuses: &[UploadStatus],
    ) -> StoreResult<Vec<Upload>>;

    /// Uploads the worker should look at now: every `pending` upload plus
    /// due-status uploads scheduled at or before `now`, for active accounts,
    /// earliest first.
    async fn fetch_due_uploads(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Upload>>;

    async fn get_upload(&self, id: &UploadId) -> StoreResult<Option<Upload>>;

    async fn create_upload(&self, upload: &NewUpload) -> StoreResult<Upload>;

    async fn update_upload(&self, id: &UploadId, patch: &UploadPatch) -> StoreResult<()>;

    /// Bump an upload's retry counter and return the new value.
    async fn increment_upload_retry(&self, id: &UploadId) -> StoreResult<i32>;

    /// Insert a video or return the existing row with the same source id.
    async fn upsert_video(&self, video: &NewVideo) -> StoreResult<Video>;

    async fn mark_video_picked(&self, id: &VideoId) -> StoreResult<()>;

    async fn insert_project_link(&self, link: &NewProjectLink) -> StoreResult<ProjectLink>;

    /// Link for a render job, if one was recorded.
    async fn get_project_link(&self, job_id: &RenderJobId) -> StoreResult<Option<ProjectLink>>;

    async fn get_project_link_by_upload(
        &self,
        upload_id: &UploadId,
    ) -> StoreResult<Option<ProjectLink>>;

    async fn update_project_link_schedule(
        &self,
        id: &ProjectLinkId,
        scheduled_for: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn update_project_link_status(
        &self,
        id: &ProjectLinkId,
        status: ProjectLinkStatus,
    ) -> StoreResult<()>;

    /// Whether any of the account's project links references `clip_id`.
    async fn has_account_used_clip(&self, account_id: &AccountId, clip_id: &str)
        -> StoreResult<bool>;

    /// Release pooled resources. Called once when the worker stops.
    async fn close(&self) {}
}

/// Resets per-account daily publishing quotas.
#[async_trait]
pub trait QuotaReset: Send + Sync {
    async fn reset_daily_quotas(&self) -> StoreResult<()>;
}
