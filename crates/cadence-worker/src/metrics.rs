//! Worker metrics.

use metrics::counter;

/// Metric name constants for consistency.
pub mod names {
    /// Uploads created by the scheduling engine.
    pub const UPLOADS_CREATED: &str = "cadence_uploads_created_total";

    /// Render jobs requested from the generation service, by reason.
    pub const RENDER_JOBS_REQUESTED: &str = "cadence_render_jobs_requested_total";

    /// Scheduled instants moved by normalization.
    pub const SCHEDULE_CORRECTIONS: &str = "cadence_schedule_corrections_total";

    /// Uploads processed by the worker loop, by outcome.
    pub const UPLOADS_PROCESSED: &str = "cadence_uploads_processed_total";
}

pub fn record_upload_created() {
    counter!(names::UPLOADS_CREATED).increment(1);
}

pub fn record_render_jobs_requested(reason: &'static str, count: usize) {
    counter!(names::RENDER_JOBS_REQUESTED, "reason" => reason).increment(count as u64);
}

pub fn record_schedule_corrections(count: usize) {
    counter!(names::SCHEDULE_CORRECTIONS).increment(count as u64);
}

/// Record one upload outcome: `published`, `failed` or `rescheduled`.
pub fn record_upload_outcome(outcome: &'static str) {
    counter!(names::UPLOADS_PROCESSED, "outcome" => outcome).increment(1);
}
