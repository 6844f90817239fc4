//! Scheduling engine: keeps one upload per account per local day.
//!
//! A pass walks every active account of the configured theme and, for each:
//! 1. resolves the account's generator-account mapping,
//! 2. repairs drifted future uploads (see [`crate::normalize`]),
//! 3. attaches a completed render job to the next free slot when needed,
//! 4. tops up the buffer of in-flight render jobs.
//!
//! Failures are contained per account.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tracing::{info, Instrument};

use cadence_generator::GeneratorClient;
use cadence_models::{
    resolve_storage_path, storage_source_id, Account, AccountId, GeneratorAccountId,
    NewProjectLink, NewUpload, NewVideo, ProjectLinkStatus, RenderJob, RenderJobStatus, Upload,
    UploadId, UploadPatch, UploadStatus,
};
use cadence_store::{Repository, StoreResult};

use crate::config::EngineConfig;
use crate::error::WorkerResult;
use crate::logging::PassLogger;
use crate::metrics;
use crate::normalize::plan_normalization;
use crate::schedule::{add_days, day_bounds, local_date, next_schedule_instant};

const SOURCE_PLATFORM: &str = "generator";

/// Totals for one engine pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub accounts_processed: usize,
    pub accounts_failed: usize,
    pub uploads_created: usize,
    pub jobs_requested: usize,
    pub corrections: usize,
}

#[derive(Debug, Default)]
struct AccountOutcome {
    uploads_created: usize,
    jobs_requested: usize,
    corrections: usize,
}

impl PassSummary {
    fn absorb(&mut self, outcome: AccountOutcome) {
        self.accounts_processed += 1;
        self.uploads_created += outcome.uploads_created;
        self.jobs_requested += outcome.jobs_requested;
        self.corrections += outcome.corrections;
    }
}

/// Memoized "was this clip used by the account" answers for one pass.
struct ClipUsageCache {
    account_id: AccountId,
    used: HashMap<String, bool>,
}

impl ClipUsageCache {
    fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            used: HashMap::new(),
        }
    }

    async fn is_used(&mut self, repository: &dyn Repository, clip_id: &str) -> StoreResult<bool> {
        if let Some(used) = self.used.get(clip_id) {
            return Ok(*used);
        }
        let used = repository
            .has_account_used_clip(&self.account_id, clip_id)
            .await?;
        self.used.insert(clip_id.to_string(), used);
        Ok(used)
    }

    async fn any_used(&mut self, repository: &dyn Repository, job: &RenderJob) -> StoreResult<bool> {
        for clip_id in job.clip_ids() {
            if self.is_used(repository, clip_id).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Copy an upload's new instant onto its project link, if it has one.
pub(crate) async fn sync_link_schedule(
    repository: &dyn Repository,
    upload_id: &UploadId,
    scheduled_for: DateTime<Utc>,
) -> StoreResult<()> {
    if let Some(link) = repository.get_project_link_by_upload(upload_id).await? {
        repository
            .update_project_link_schedule(&link.id, scheduled_for)
            .await?;
    }
    Ok(())
}

/// Per-account daily content scheduler.
pub struct SchedulingEngine {
    config: EngineConfig,
    repository: Arc<dyn Repository>,
    generator: Arc<dyn GeneratorClient>,
}

impl SchedulingEngine {
    pub fn new(
        config: EngineConfig,
        repository: Arc<dyn Repository>,
        generator: Arc<dyn GeneratorClient>,
    ) -> Self {
        Self {
            config,
            repository,
            generator,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one pass over every active account of the configured theme.
    pub async fn ensure_daily_content(&self, now: DateTime<Utc>) -> WorkerResult<PassSummary> {
        let accounts = self
            .repository
            .list_active_accounts(&self.config.theme)
            .await?;

        info!(
            theme = %self.config.theme,
            accounts = accounts.len(),
            "Starting daily content pass"
        );

        let mut summary = PassSummary::default();
        for account in &accounts {
            let logger = PassLogger::for_account(account, &self.config.theme);

            match self
                .process_account(account, now, &logger)
                .instrument(logger.span())
                .await
            {
                Ok(outcome) => summary.absorb(outcome),
                Err(e) if e.is_data_error() => {
                    summary.accounts_failed += 1;
                    logger.log_warning(&format!("skipped on malformed data: {}", e));
                }
                Err(e) => {
                    summary.accounts_failed += 1;
                    logger.log_error(&e.to_string());
                }
            }
        }

        info!(
            accounts_processed = summary.accounts_processed,
            accounts_failed = summary.accounts_failed,
            uploads_created = summary.uploads_created,
            jobs_requested = summary.jobs_requested,
            corrections = summary.corrections,
            "Daily content pass finished"
        );

        Ok(summary)
    }

    async fn process_account(
        &self,
        account: &Account,
        now: DateTime<Utc>,
        logger: &PassLogger,
    ) -> WorkerResult<AccountOutcome> {
        let mut outcome = AccountOutcome::default();

        if !account.active {
            logger.log_progress("account inactive, skipping");
            return Ok(outcome);
        }

        let generator_account = self.resolve_generator_account(account, logger).await?;
        logger.record_generator_account(&generator_account);

        let tz = self.config.schedule.timezone;
        let time = account.publish_time_or(self.config.schedule.publish_time);
        logger.record_publish_time(time);
        let today = local_date(now, tz);

        outcome.corrections = self.normalize_schedule(account, today, time).await?;

        let (day_start, day_end) = day_bounds(today, tz);
        let today_uploads = self
            .repository
            .query_uploads(&account.id, day_start, day_end, &UploadStatus::OCCUPYING)
            .await?;

        let lookahead = now
            + chrono::Duration::from_std(self.config.due_lookahead)
                .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let has_upload_today = !today_uploads.is_empty();
        let needs_content = self.needs_content(&today_uploads, lookahead).await?;

        let (in_flight, shortfall) = self.buffer_shortfall(&generator_account).await?;

        let mut urgent = 0;
        if !has_upload_today || needs_content {
            let target = next_schedule_instant(time, now, has_upload_today, tz);
            let due_immediately = needs_content || target <= lookahead;

            if !self.day_is_free(&account.id, target).await? {
                logger.log_progress(&format!("slot {} already taken", target));
            } else if self
                .select_and_attach(account, &generator_account, target, logger)
                .await?
            {
                outcome.uploads_created = 1;
            } else if due_immediately {
                self.generator.create_job(&generator_account).await?;
                metrics::record_render_jobs_requested("urgent", 1);
                logger.log_warning("no usable content for an imminent slot, requested urgent render");
                urgent = 1;
            }
        } else {
            logger.log_progress("today already has content");
        }

        outcome.jobs_requested = urgent
            + self
                .top_up_buffer(&generator_account, in_flight, shortfall, logger)
                .await?;

        logger.log_completion(
            outcome.uploads_created,
            outcome.jobs_requested,
            outcome.corrections,
        );

        Ok(outcome)
    }

    /// The account's generator account, created and persisted when missing.
    async fn resolve_generator_account(
        &self,
        account: &Account,
        logger: &PassLogger,
    ) -> WorkerResult<GeneratorAccountId> {
        if let Some(id) = &account.generator_account_id {
            return Ok(id.clone());
        }

        let generator_account = self
            .generator
            .ensure_account(None, account.generator_name())
            .await?;
        self.repository
            .set_generator_mapping(&account.id, &generator_account.id)
            .await?;

        logger.log_progress(&format!("mapped to generator account {}", generator_account.id));
        Ok(generator_account.id)
    }

    /// Move future uploads onto the daily grid. Returns the number moved.
    async fn normalize_schedule(
        &self,
        account: &Account,
        today: NaiveDate,
        time: NaiveTime,
    ) -> WorkerResult<usize> {
        let tz = self.config.schedule.timezone;
        let horizon = self.config.schedule.horizon_days;
        let (from, _) = day_bounds(today, tz);
        let (_, to) = day_bounds(add_days(today, u64::from(horizon)), tz);

        let uploads = self
            .repository
            .query_uploads(&account.id, from, to, &UploadStatus::OCCUPYING)
            .await?;

        let corrections = plan_normalization(&uploads, today, time, tz, horizon);
        for correction in &corrections {
            self.repository
                .update_upload(&correction.upload_id, &UploadPatch::reschedule(correction.to))
                .await?;
            sync_link_schedule(self.repository.as_ref(), &correction.upload_id, correction.to)
                .await?;

            info!(
                account_id = %account.id,
                upload_id = %correction.upload_id,
                from = %correction.from,
                to = %correction.to,
                "Normalized upload schedule"
            );
        }

        metrics::record_schedule_corrections(corrections.len());
        Ok(corrections.len())
    }

    /// Whether an upload due before `lookahead` still lacks rendered content.
    async fn needs_content(
        &self,
        today_uploads: &[Upload],
        lookahead: DateTime<Utc>,
    ) -> WorkerResult<bool> {
        for upload in today_uploads {
            if upload.status == UploadStatus::Done || upload.scheduled_for > lookahead {
                continue;
            }

            let materialized = self
                .repository
                .get_project_link_by_upload(&upload.id)
                .await?
                .is_some_and(|link| link.has_materialized_asset());
            if !materialized {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn day_is_free(&self, account_id: &AccountId, target: DateTime<Utc>) -> WorkerResult<bool> {
        let tz = self.config.schedule.timezone;
        let (start, end) = day_bounds(local_date(target, tz), tz);
        let occupying = self
            .repository
            .query_uploads(account_id, start, end, &UploadStatus::OCCUPYING)
            .await?;
        Ok(occupying.is_empty())
    }

    /// Attach one completed render job to `target`. Returns false when none is usable.
    async fn select_and_attach(
        &self,
        account: &Account,
        generator_account: &GeneratorAccountId,
        target: DateTime<Utc>,
        logger: &PassLogger,
    ) -> WorkerResult<bool> {
        let mut candidates = self
            .generator
            .list_jobs_by_status(
                generator_account,
                &[RenderJobStatus::Completed],
                self.config.candidate_limit,
            )
            .await?;
        // Listed newest first; consume oldest first
        candidates.reverse();

        let mut usable: Vec<(RenderJob, String)> = Vec::new();
        for job in candidates {
            if let Some(link) = self.repository.get_project_link(&job.id).await? {
                if link.status.is_consumed() {
                    continue;
                }
            }

            let path = job.video_url.as_deref().and_then(resolve_storage_path);
            match path {
                Some(path) => usable.push((job, path)),
                None => logger.log_warning(&format!("job {} has no storage path, skipping", job.id)),
            }
        }

        let mut usage = ClipUsageCache::new(account.id.clone());
        let mut chosen = None;
        for (index, (job, _)) in usable.iter().enumerate() {
            if !usage.any_used(self.repository.as_ref(), job).await? {
                chosen = Some(index);
                break;
            }
        }

        if chosen.is_none() && !usable.is_empty() {
            logger.log_warning("every candidate reuses a clip, falling back to a used one");
            chosen = Some(0);
        }

        let Some(index) = chosen else {
            logger.log_progress("no completed render jobs available");
            return Ok(false);
        };

        let (job, path) = usable.swap_remove(index);
        self.attach(account, &job, path, target, logger).await?;
        Ok(true)
    }

    async fn attach(
        &self,
        account: &Account,
        job: &RenderJob,
        storage_path: String,
        target: DateTime<Utc>,
        logger: &PassLogger,
    ) -> WorkerResult<()> {
        let title = job
            .top_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(self.config.default_title.as_str())
            .to_string();
        let theme_slug = if account.theme_slug.is_empty() {
            self.config.theme.clone()
        } else {
            account.theme_slug.clone()
        };

        let video = self
            .repository
            .upsert_video(&NewVideo {
                source_video_id: storage_source_id(&storage_path),
                title: Some(title.clone()),
                theme_slug,
                source_platform: Some(SOURCE_PLATFORM.to_string()),
                duration_seconds: job.video_duration,
            })
            .await?;
        self.repository.mark_video_picked(&video.id).await?;

        let upload = self
            .repository
            .create_upload(&NewUpload {
                account_id: account.id.clone(),
                video_id: video.id.clone(),
                scheduled_for: target,
                status: UploadStatus::Scheduled,
                title: video.title.clone().unwrap_or(title),
                description: self.config.default_description.clone(),
                tags: self.config.default_tags.clone(),
            })
            .await?;

        self.repository
            .insert_project_link(&NewProjectLink {
                generator_project_id: job.id.clone(),
                account_id: account.id.clone(),
                video_id: video.id.clone(),
                upload_id: upload.id.clone(),
                storage_path,
                video_url: job.video_url.clone(),
                primary_video_id: job.primary_video_id.clone(),
                secondary_video_id: job.secondary_video_id.clone(),
                status: ProjectLinkStatus::Scheduled,
                scheduled_for: target,
            })
            .await?;

        if let Err(e) = self
            .generator
            .update_job_status(&job.id, RenderJobStatus::Assigned)
            .await
        {
            logger.log_warning(&format!("failed to mark job {} assigned: {}", job.id, e));
        }

        metrics::record_upload_created();
        logger.log_progress(&format!(
            "scheduled job {} as upload {} at {}",
            job.id, upload.id, target
        ));
        Ok(())
    }

    /// In-flight render jobs and how many are missing to reach the floor.
    ///
    /// Measured before any urgent render so that one comes on top of the floor.
    async fn buffer_shortfall(
        &self,
        generator_account: &GeneratorAccountId,
    ) -> WorkerResult<(usize, usize)> {
        let in_flight = self
            .generator
            .list_jobs_by_status(
                generator_account,
                &RenderJobStatus::IN_FLIGHT,
                self.config.candidate_limit.max(self.config.buffer_floor),
            )
            .await?
            .len();

        Ok((in_flight, self.config.buffer_floor.saturating_sub(in_flight)))
    }

    async fn top_up_buffer(
        &self,
        generator_account: &GeneratorAccountId,
        in_flight: usize,
        missing: usize,
        logger: &PassLogger,
    ) -> WorkerResult<usize> {
        for _ in 0..missing {
            self.generator.create_job(generator_account).await?;
        }

        if missing > 0 {
            metrics::record_render_jobs_requested("buffer", missing);
            logger.log_progress(&format!(
                "buffer had {} in flight, requested {}",
                in_flight, missing
            ));
        }
        Ok(missing)
    }
}
