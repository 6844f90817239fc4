//! In-memory collaborators for engine and worker tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};

use cadence_generator::{GeneratorAccount, GeneratorClient, GeneratorError, GeneratorResult};
use cadence_models::{
    Account, AccountId, GeneratorAccountId, NewProjectLink, NewUpload, NewVideo, ProjectLink,
    ProjectLinkId, ProjectLinkStatus, RenderJob, RenderJobId, RenderJobStatus, Upload, UploadId,
    UploadPatch, UploadStatus, Video, VideoId,
};
use cadence_store::{QuotaReset, Repository, StoreError, StoreResult};
use cadence_worker::{
    EngineConfig, PublishAction, PublishError, PublishReceipt, ScheduleConfig, WorkerConfig,
};

pub const PARIS: chrono_tz::Tz = chrono_tz::Europe::Paris;

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn schedule_config() -> ScheduleConfig {
    ScheduleConfig {
        timezone: PARIS,
        publish_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        horizon_days: 150,
    }
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        schedule: schedule_config(),
        ..EngineConfig::default()
    }
}

pub fn worker_config() -> WorkerConfig {
    WorkerConfig {
        schedule: schedule_config(),
        ..WorkerConfig::default()
    }
}

pub fn account(id: &str, generator_account: Option<&str>) -> Account {
    Account {
        id: AccountId::from(id),
        display_name: format!("Account {}", id),
        theme_slug: "roblox".to_string(),
        generator_account_id: generator_account.map(GeneratorAccountId::from),
        active: true,
        publish_time: None,
    }
}

pub fn upload(id: &str, account_id: &str, at: DateTime<Utc>, status: UploadStatus) -> Upload {
    Upload {
        id: UploadId::from(id),
        account_id: AccountId::from(account_id),
        video_id: VideoId::from(format!("vid-{}", id)),
        scheduled_for: at,
        status,
        title: "Roblox Short".to_string(),
        description: String::new(),
        tags: Vec::new(),
        retry_count: 0,
        error: None,
        run_id: None,
        platform_video_id: None,
    }
}

pub fn link_for(upload: &Upload, job_id: &str, storage_path: Option<&str>) -> ProjectLink {
    ProjectLink {
        id: ProjectLinkId::from(format!("link-{}", upload.id)),
        generator_project_id: RenderJobId::from(job_id),
        account_id: upload.account_id.clone(),
        video_id: Some(upload.video_id.clone()),
        upload_id: Some(upload.id.clone()),
        storage_path: storage_path.map(str::to_string),
        video_url: None,
        primary_video_id: None,
        secondary_video_id: None,
        status: ProjectLinkStatus::Scheduled,
        scheduled_for: Some(upload.scheduled_for),
    }
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Default)]
struct RepoState {
    accounts: Vec<Account>,
    uploads: Vec<Upload>,
    videos: Vec<Video>,
    links: Vec<ProjectLink>,
    failing_accounts: HashSet<AccountId>,
    failing_due_fetches: usize,
    due_fetches: usize,
    account_listing_down: bool,
    closed: bool,
}

/// Repository backed by vectors behind a mutex.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<RepoState>,
    next_id: AtomicUsize,
}

impl InMemoryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn add_account(&self, account: Account) {
        self.state.lock().unwrap().accounts.push(account);
    }

    pub fn add_upload(&self, upload: Upload) {
        self.state.lock().unwrap().uploads.push(upload);
    }

    pub fn add_link(&self, link: ProjectLink) {
        self.state.lock().unwrap().links.push(link);
    }

    /// Make the next `count` due-upload fetches fail with a server error.
    pub fn fail_due_fetches(&self, count: usize) {
        self.state.lock().unwrap().failing_due_fetches = count;
    }

    pub fn due_fetches(&self) -> usize {
        self.state.lock().unwrap().due_fetches
    }

    pub fn fail_account_listing(&self) {
        self.state.lock().unwrap().account_listing_down = true;
    }

    /// Make every upload query for `account_id` fail.
    pub fn fail_queries_for(&self, account_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_accounts
            .insert(AccountId::from(account_id));
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.state.lock().unwrap().accounts.clone()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        let mut uploads = self.state.lock().unwrap().uploads.clone();
        uploads.sort_by(|a, b| (a.scheduled_for, &a.id).cmp(&(b.scheduled_for, &b.id)));
        uploads
    }

    pub fn uploads_for(&self, account_id: &str) -> Vec<Upload> {
        self.uploads()
            .into_iter()
            .filter(|u| u.account_id.as_str() == account_id)
            .collect()
    }

    pub fn upload(&self, id: &str) -> Upload {
        self.uploads()
            .into_iter()
            .find(|u| u.id.as_str() == id)
            .unwrap_or_else(|| panic!("upload {} not found", id))
    }

    pub fn videos(&self) -> Vec<Video> {
        self.state.lock().unwrap().videos.clone()
    }

    pub fn links(&self) -> Vec<ProjectLink> {
        self.state.lock().unwrap().links.clone()
    }

    pub fn link_for_upload(&self, upload_id: &UploadId) -> Option<ProjectLink> {
        self.links()
            .into_iter()
            .find(|l| l.upload_id.as_ref() == Some(upload_id))
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn check_account(&self, account_id: &AccountId) -> StoreResult<()> {
        if self
            .state
            .lock()
            .unwrap()
            .failing_accounts
            .contains(account_id)
        {
            return Err(StoreError::from_http_status(503, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn list_active_accounts(&self, theme: &str) -> StoreResult<Vec<Account>> {
        let state = self.state.lock().unwrap();
        if state.account_listing_down {
            return Err(StoreError::from_http_status(503, "accounts unavailable"));
        }
        Ok(state
            .accounts
            .iter()
            .filter(|a| a.active && a.theme_slug == theme)
            .cloned()
            .collect())
    }

    async fn get_account(&self, id: &AccountId) -> StoreResult<Option<Account>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .accounts
            .iter()
            .find(|a| &a.id == id)
            .cloned())
    }

    async fn set_generator_mapping(
        &self,
        account_id: &AccountId,
        generator_account_id: &GeneratorAccountId,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let account = state
            .accounts
            .iter_mut()
            .find(|a| &a.id == account_id)
            .ok_or_else(|| StoreError::not_found(account_id.to_string()))?;
        account.generator_account_id = Some(generator_account_id.clone());
        Ok(())
    }

    async fn query_uploads(
        &self,
        account_id: &AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        statuses: &[UploadStatus],
    ) -> StoreResult<Vec<Upload>> {
        self.check_account(account_id)?;
        Ok(self
            .uploads()
            .into_iter()
            .filter(|u| {
                &u.account_id == account_id
                    && u.scheduled_for >= from
                    && u.scheduled_for < to
                    && statuses.contains(&u.status)
            })
            .collect())
    }

    async fn fetch_due_uploads(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Upload>> {
        {
            let mut state = self.state.lock().unwrap();
            state.due_fetches += 1;
            if state.failing_due_fetches > 0 {
                state.failing_due_fetches -= 1;
                return Err(StoreError::from_http_status(502, "bad gateway"));
            }
        }

        let active: HashSet<AccountId> = self
            .accounts()
            .into_iter()
            .filter(|a| a.active)
            .map(|a| a.id)
            .collect();

        Ok(self
            .uploads()
            .into_iter()
            .filter(|u| active.contains(&u.account_id))
            .filter(|u| {
                u.status == UploadStatus::Pending
                    || (UploadStatus::DUE.contains(&u.status) && u.scheduled_for <= now)
            })
            .take(limit)
            .collect())
    }

    async fn get_upload(&self, id: &UploadId) -> StoreResult<Option<Upload>> {
        Ok(self.uploads().into_iter().find(|u| &u.id == id))
    }

    async fn create_upload(&self, upload: &NewUpload) -> StoreResult<Upload> {
        let created = Upload {
            id: UploadId::from(self.next_id("upload")),
            account_id: upload.account_id.clone(),
            video_id: upload.video_id.clone(),
            scheduled_for: upload.scheduled_for,
            status: upload.status,
            title: upload.title.clone(),
            description: upload.description.clone(),
            tags: upload.tags.clone(),
            retry_count: 0,
            error: None,
            run_id: None,
            platform_video_id: None,
        };
        self.state.lock().unwrap().uploads.push(created.clone());
        Ok(created)
    }

    async fn update_upload(&self, id: &UploadId, patch: &UploadPatch) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .iter_mut()
            .find(|u| &u.id == id)
            .ok_or_else(|| StoreError::not_found(id.to_string()))?;
        patch.apply_to(upload);
        Ok(())
    }

    async fn increment_upload_retry(&self, id: &UploadId) -> StoreResult<i32> {
        let mut state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .iter_mut()
            .find(|u| &u.id == id)
            .ok_or_else(|| StoreError::not_found(id.to_string()))?;
        upload.retry_count += 1;
        Ok(upload.retry_count)
    }

    async fn upsert_video(&self, video: &NewVideo) -> StoreResult<Video> {
        let id = self.next_id("video");
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .videos
            .iter()
            .find(|v| v.source_video_id == video.source_video_id)
        {
            return Ok(existing.clone());
        }

        let created = Video {
            id: VideoId::from(id),
            source_video_id: video.source_video_id.clone(),
            title: video.title.clone(),
            theme_slug: video.theme_slug.clone(),
            source_platform: video.source_platform.clone(),
            duration_seconds: video.duration_seconds,
            picked: false,
        };
        state.videos.push(created.clone());
        Ok(created)
    }

    async fn mark_video_picked(&self, id: &VideoId) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(video) = state.videos.iter_mut().find(|v| &v.id == id) {
            video.picked = true;
        }
        Ok(())
    }

    async fn insert_project_link(&self, link: &NewProjectLink) -> StoreResult<ProjectLink> {
        let created = ProjectLink {
            id: ProjectLinkId::from(self.next_id("link")),
            generator_project_id: link.generator_project_id.clone(),
            account_id: link.account_id.clone(),
            video_id: Some(link.video_id.clone()),
            upload_id: Some(link.upload_id.clone()),
            storage_path: Some(link.storage_path.clone()),
            video_url: link.video_url.clone(),
            primary_video_id: link.primary_video_id.clone(),
            secondary_video_id: link.secondary_video_id.clone(),
            status: link.status,
            scheduled_for: Some(link.scheduled_for),
        };
        self.state.lock().unwrap().links.push(created.clone());
        Ok(created)
    }

    async fn get_project_link(&self, job_id: &RenderJobId) -> StoreResult<Option<ProjectLink>> {
        Ok(self
            .links()
            .into_iter()
            .find(|l| &l.generator_project_id == job_id))
    }

    async fn get_project_link_by_upload(
        &self,
        upload_id: &UploadId,
    ) -> StoreResult<Option<ProjectLink>> {
        Ok(self.link_for_upload(upload_id))
    }

    async fn update_project_link_schedule(
        &self,
        id: &ProjectLinkId,
        scheduled_for: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(link) = state.links.iter_mut().find(|l| &l.id == id) {
            link.scheduled_for = Some(scheduled_for);
        }
        Ok(())
    }

    async fn update_project_link_status(
        &self,
        id: &ProjectLinkId,
        status: ProjectLinkStatus,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(link) = state.links.iter_mut().find(|l| &l.id == id) {
            link.status = status;
        }
        Ok(())
    }

    async fn has_account_used_clip(
        &self,
        account_id: &AccountId,
        clip_id: &str,
    ) -> StoreResult<bool> {
        Ok(self.links().iter().any(|l| {
            &l.account_id == account_id
                && (l.primary_video_id.as_deref() == Some(clip_id)
                    || l.secondary_video_id.as_deref() == Some(clip_id))
        }))
    }

    async fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }
}

// =============================================================================
// Generator
// =============================================================================

#[derive(Default)]
struct GeneratorState {
    accounts: Vec<GeneratorAccount>,
    jobs: Vec<RenderJob>,
    jobs_created: usize,
}

/// Generation service holding accounts and jobs in memory.
#[derive(Default)]
pub struct FakeGenerator {
    state: Mutex<GeneratorState>,
}

impl FakeGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push_job(
        &self,
        account: &str,
        id: &str,
        status: RenderJobStatus,
        video_url: Option<String>,
        clips: (Option<&str>, Option<&str>),
    ) {
        let mut state = self.state.lock().unwrap();
        let created_at = utc(2023, 12, 1, 0, 0) + Duration::minutes(state.jobs.len() as i64);
        state.jobs.push(RenderJob {
            id: RenderJobId::from(id),
            account_id: GeneratorAccountId::from(account),
            status,
            video_url,
            primary_video_id: clips.0.map(str::to_string),
            secondary_video_id: clips.1.map(str::to_string),
            video_duration: Some(60),
            top_text: Some("ROBLOX".to_string()),
            bottom_text: Some("LIKE".to_string()),
            created_at: Some(created_at),
        });
    }

    /// Add a completed job whose asset lives at `videos/{id}.mp4`.
    pub fn add_completed(&self, account: &str, id: &str, primary: &str, secondary: &str) {
        let url = format!(
            "https://demo.supabase.co/storage/v1/object/public/videos/{}.mp4",
            id
        );
        self.push_job(
            account,
            id,
            RenderJobStatus::Completed,
            Some(url),
            (Some(primary), Some(secondary)),
        );
    }

    /// Add a completed job with no asset location.
    pub fn add_completed_without_asset(&self, account: &str, id: &str) {
        self.push_job(account, id, RenderJobStatus::Completed, None, (None, None));
    }

    pub fn add_in_flight(&self, account: &str, count: usize) {
        for n in 0..count {
            self.push_job(
                account,
                &format!("inflight-{}-{}", account, n),
                RenderJobStatus::Processing,
                None,
                (None, None),
            );
        }
    }

    pub fn add_account(&self, id: &str, name: &str) {
        self.state.lock().unwrap().accounts.push(GeneratorAccount {
            id: GeneratorAccountId::from(id),
            name: name.to_string(),
            background_url: None,
        });
    }

    pub fn accounts(&self) -> Vec<GeneratorAccount> {
        self.state.lock().unwrap().accounts.clone()
    }

    pub fn job(&self, id: &str) -> RenderJob {
        self.state
            .lock()
            .unwrap()
            .jobs
            .iter()
            .find(|j| j.id.as_str() == id)
            .cloned()
            .unwrap_or_else(|| panic!("job {} not found", id))
    }

    pub fn jobs_created(&self) -> usize {
        self.state.lock().unwrap().jobs_created
    }

    pub fn in_flight(&self, account: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .jobs
            .iter()
            .filter(|j| j.account_id.as_str() == account && j.status.is_in_flight())
            .count()
    }
}

#[async_trait]
impl GeneratorClient for FakeGenerator {
    async fn get_account(&self, id: &GeneratorAccountId) -> GeneratorResult<Option<GeneratorAccount>> {
        Ok(self.accounts().into_iter().find(|a| &a.id == id))
    }

    async fn get_account_by_name(&self, name: &str) -> GeneratorResult<Option<GeneratorAccount>> {
        Ok(self.accounts().into_iter().find(|a| a.name == name))
    }

    async fn create_account(
        &self,
        name: &str,
        background_url: Option<&str>,
    ) -> GeneratorResult<GeneratorAccount> {
        let mut state = self.state.lock().unwrap();
        let account = GeneratorAccount {
            id: GeneratorAccountId::from(format!("gen-new-{}", state.accounts.len() + 1)),
            name: name.to_string(),
            background_url: background_url.map(str::to_string),
        };
        state.accounts.push(account.clone());
        Ok(account)
    }

    async fn create_job(&self, account_id: &GeneratorAccountId) -> GeneratorResult<RenderJob> {
        let id = {
            let mut state = self.state.lock().unwrap();
            state.jobs_created += 1;
            format!("queued-{}", state.jobs_created)
        };
        self.push_job(account_id.as_str(), &id, RenderJobStatus::Generating, None, (None, None));
        Ok(self.job(&id))
    }

    async fn list_jobs_by_status(
        &self,
        account_id: &GeneratorAccountId,
        statuses: &[RenderJobStatus],
        limit: usize,
    ) -> GeneratorResult<Vec<RenderJob>> {
        let mut jobs: Vec<RenderJob> = self
            .state
            .lock()
            .unwrap()
            .jobs
            .iter()
            .filter(|j| &j.account_id == account_id && statuses.contains(&j.status))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn update_job_status(
        &self,
        job_id: &RenderJobId,
        status: RenderJobStatus,
    ) -> GeneratorResult<RenderJob> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .iter_mut()
            .find(|j| &j.id == job_id)
            .ok_or_else(|| GeneratorError::RequestFailed(format!("no job {}", job_id)))?;
        job.status = status;
        Ok(job.clone())
    }
}

// =============================================================================
// Publish action and quota reset
// =============================================================================

/// Publisher that marks uploads done in the repository and records calls.
pub struct RecordingPublisher {
    repository: Arc<InMemoryRepository>,
    published: Mutex<Vec<UploadId>>,
    failing: Mutex<HashSet<UploadId>>,
}

impl RecordingPublisher {
    pub fn new(repository: Arc<InMemoryRepository>) -> Arc<Self> {
        Arc::new(Self {
            repository,
            published: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail_for(&self, upload_id: &str) {
        self.failing.lock().unwrap().insert(UploadId::from(upload_id));
    }

    pub fn published(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|id| id.to_string())
            .collect()
    }
}

#[async_trait]
impl PublishAction for RecordingPublisher {
    async fn publish(&self, upload: &Upload) -> Result<PublishReceipt, PublishError> {
        if self.failing.lock().unwrap().contains(&upload.id) {
            self.repository
                .update_upload(
                    &upload.id,
                    &UploadPatch::status(UploadStatus::Retry).with_error("rejected"),
                )
                .await?;
            return Err(PublishError::Rejected("400: rejected".to_string()));
        }

        let patch = UploadPatch {
            platform_video_id: Some(format!("yt-{}", upload.id)),
            ..UploadPatch::status(UploadStatus::Done)
        };
        self.repository.update_upload(&upload.id, &patch).await?;
        self.published.lock().unwrap().push(upload.id.clone());

        Ok(PublishReceipt {
            upload_id: upload.id.clone(),
            run_id: "run-test".to_string(),
            platform_video_id: format!("yt-{}", upload.id),
        })
    }
}

/// Quota reset that only counts invocations.
#[derive(Default)]
pub struct CountingQuota {
    calls: AtomicUsize,
}

impl CountingQuota {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuotaReset for CountingQuota {
    async fn reset_daily_quotas(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
