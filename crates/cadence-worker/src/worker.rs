//! Worker loop.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use cadence_models::{AccountId, Upload, UploadPatch, UploadStatus};
use cadence_store::{QuotaReset, Repository};

use crate::config::WorkerConfig;
use crate::engine::{sync_link_schedule, SchedulingEngine};
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::publish::PublishAction;
use crate::schedule::{add_days, combine, day_bounds, is_on_grid, local_date};

/// Process lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
    ShuttingDown,
}

/// Per-iteration batch counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub rescheduled: usize,
    /// Fetched but not yet due
    pub waiting: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadOutcome {
    Published,
    Rescheduled,
    Waiting,
}

/// Polls for due uploads and drives the scheduling engine.
pub struct Worker {
    config: WorkerConfig,
    repository: Arc<dyn Repository>,
    quota: Arc<dyn QuotaReset>,
    publisher: Arc<dyn PublishAction>,
    engine: Option<SchedulingEngine>,
    state: WorkerState,
    last_sync: Option<DateTime<Utc>>,
    last_quota_reset: Option<NaiveDate>,
}

impl Worker {
    /// Create a worker. Without an engine, only due uploads are processed.
    pub fn new(
        config: WorkerConfig,
        repository: Arc<dyn Repository>,
        quota: Arc<dyn QuotaReset>,
        publisher: Arc<dyn PublishAction>,
        engine: Option<SchedulingEngine>,
    ) -> Self {
        if engine.is_none() {
            warn!("Scheduling engine disabled for this process; only due uploads will be processed");
        }

        Self {
            config,
            repository,
            quota,
            publisher,
            engine,
            state: WorkerState::Stopped,
            last_sync: None,
            last_quota_reset: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// When the scheduling engine was last started.
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    ///
    /// The flag is only observed between iterations; a batch in progress
    /// always finishes.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        self.state = WorkerState::Running;
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            sync_interval_secs = self.config.sync_interval.as_secs(),
            "Worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = Utc::now();
            let pause = match AssertUnwindSafe(self.run_iteration(now)).catch_unwind().await {
                Ok(Ok(_)) => self.config.poll_interval,
                Ok(Err(e)) => {
                    error!(error = %e, "Worker iteration failed, backing off");
                    self.config.error_backoff
                }
                Err(panic) => {
                    error!(panic = %panic_message(panic.as_ref()), "Worker iteration panicked, backing off");
                    self.config.error_backoff
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        self.state = WorkerState::ShuttingDown;
        info!("Shutdown signal received, stopping worker");

        self.repository.close().await;

        self.state = WorkerState::Stopped;
        info!("Worker stopped");
        Ok(())
    }

    /// One poll cycle at `now`.
    pub async fn run_iteration(&mut self, now: DateTime<Utc>) -> WorkerResult<BatchStats> {
        self.maybe_sync(now).await;
        self.maybe_reset_quotas(now).await;

        let uploads = self
            .repository
            .fetch_due_uploads(now, self.config.batch_size)
            .await?;

        if uploads.is_empty() {
            debug!("No due uploads");
            return Ok(BatchStats::default());
        }

        let mut stats = BatchStats::default();
        let mut publish_times: HashMap<AccountId, NaiveTime> = HashMap::new();

        for upload in &uploads {
            stats.processed += 1;
            match self.process_upload(upload, now, &mut publish_times).await {
                Ok(UploadOutcome::Published) => {
                    stats.successful += 1;
                    metrics::record_upload_outcome("published");
                }
                Ok(UploadOutcome::Rescheduled) => {
                    stats.rescheduled += 1;
                    metrics::record_upload_outcome("rescheduled");
                }
                Ok(UploadOutcome::Waiting) => stats.waiting += 1,
                Err(e) => {
                    stats.failed += 1;
                    metrics::record_upload_outcome("failed");
                    warn!(
                        upload_id = %upload.id,
                        account_id = %upload.account_id,
                        retryable = e.is_retryable(),
                        "Upload failed: {}",
                        e
                    );
                }
            }
        }

        info!(
            processed = stats.processed,
            successful = stats.successful,
            failed = stats.failed,
            rescheduled = stats.rescheduled,
            waiting = stats.waiting,
            "Batch complete"
        );

        Ok(stats)
    }

    async fn maybe_sync(&mut self, now: DateTime<Utc>) {
        let due = match self.last_sync {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .map(|elapsed| elapsed >= self.config.sync_interval)
                .unwrap_or(true),
        };
        if !due {
            return;
        }

        self.last_sync = Some(now);

        let Some(engine) = &self.engine else {
            return;
        };

        match engine.ensure_daily_content(now).await {
            Ok(summary) => debug!(?summary, "Scheduling engine pass complete"),
            Err(e) => error!(error = %e, "Scheduling engine pass failed"),
        }
    }

    async fn maybe_reset_quotas(&mut self, now: DateTime<Utc>) {
        let local = now.with_timezone(&self.config.schedule.timezone);
        let today = local.date_naive();

        let in_window =
            u64::from(local.time().num_seconds_from_midnight()) < self.config.quota_reset_window.as_secs();
        if !in_window || self.last_quota_reset == Some(today) {
            return;
        }

        match self.quota.reset_daily_quotas().await {
            Ok(()) => {
                self.last_quota_reset = Some(today);
                info!(date = %today, "Daily quotas reset");
            }
            Err(e) => warn!(error = %e, "Quota reset failed, will retry within the window"),
        }
    }

    async fn publish_time_for(
        &self,
        account_id: &AccountId,
        cache: &mut HashMap<AccountId, NaiveTime>,
    ) -> WorkerResult<NaiveTime> {
        if let Some(time) = cache.get(account_id) {
            return Ok(*time);
        }

        let default = self.config.schedule.publish_time;
        let time = self
            .repository
            .get_account(account_id)
            .await?
            .map(|account| account.publish_time_or(default))
            .unwrap_or(default);

        cache.insert(account_id.clone(), time);
        Ok(time)
    }

    async fn process_upload(
        &self,
        upload: &Upload,
        now: DateTime<Utc>,
        publish_times: &mut HashMap<AccountId, NaiveTime>,
    ) -> WorkerResult<UploadOutcome> {
        let tz = self.config.schedule.timezone;
        let time = self.publish_time_for(&upload.account_id, publish_times).await?;
        let date = local_date(upload.scheduled_for, tz);

        let conflict = self.has_conflict(upload, date).await?;
        let on_grid = is_on_grid(upload.scheduled_for, time, tz);

        if conflict || !on_grid {
            let today = local_date(now, tz);
            let start = if conflict {
                add_days(date, 1).max(today)
            } else {
                date.max(today)
            };

            let new_date = self.first_free_day(upload, start).await?.ok_or_else(|| {
                WorkerError::invalid_data(format!(
                    "no free day within {} days of {}",
                    self.config.schedule.horizon_days, start
                ))
            })?;
            let new_instant = combine(new_date, time, tz);

            self.repository
                .update_upload(&upload.id, &UploadPatch::skip_to(new_instant))
                .await?;
            if let Err(e) = sync_link_schedule(self.repository.as_ref(), &upload.id, new_instant).await {
                warn!(upload_id = %upload.id, "Failed to move project link: {}", e);
            }

            info!(
                upload_id = %upload.id,
                account_id = %upload.account_id,
                from = %upload.scheduled_for,
                to = %new_instant,
                conflict,
                on_grid,
                "Rescheduled upload"
            );
            return Ok(UploadOutcome::Rescheduled);
        }

        if upload.scheduled_for > now {
            return Ok(UploadOutcome::Waiting);
        }

        match tokio::time::timeout(self.config.publish_timeout, self.publisher.publish(upload)).await {
            Ok(Ok(receipt)) => {
                debug!(upload_id = %receipt.upload_id, run_id = %receipt.run_id, "Publish finished");
                Ok(UploadOutcome::Published)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(WorkerError::timeout(format!(
                "publish of upload {} exceeded {}s",
                upload.id,
                self.config.publish_timeout.as_secs()
            ))),
        }
    }

    /// Whether another upload with precedence occupies the same local day.
    async fn has_conflict(&self, upload: &Upload, date: NaiveDate) -> WorkerResult<bool> {
        let (start, end) = day_bounds(date, self.config.schedule.timezone);
        let same_day = self
            .repository
            .query_uploads(&upload.account_id, start, end, &UploadStatus::OCCUPYING)
            .await?;

        Ok(same_day
            .iter()
            .any(|other| other.id != upload.id && other.takes_precedence_over(upload)))
    }

    /// Earliest local day from `start` not occupied by any other upload.
    async fn first_free_day(&self, upload: &Upload, start: NaiveDate) -> WorkerResult<Option<NaiveDate>> {
        let tz = self.config.schedule.timezone;
        let horizon = u64::from(self.config.schedule.horizon_days);
        let (from, _) = day_bounds(start, tz);
        let (_, to) = day_bounds(add_days(start, horizon), tz);

        let occupied: HashSet<NaiveDate> = self
            .repository
            .query_uploads(&upload.account_id, from, to, &UploadStatus::OCCUPYING)
            .await?
            .iter()
            .filter(|other| other.id != upload.id)
            .map(|other| local_date(other.scheduled_for, tz))
            .collect();

        Ok((0..=horizon)
            .map(|offset| add_days(start, offset))
            .find(|day| !occupied.contains(day)))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
