//! Structured logging for scheduling passes.
//!
//! Each account visited by the engine gets an `account_pass` span. The span
//! starts with the account and theme; the generator account and publish time
//! are recorded on it once they are resolved, so every event emitted inside
//! the pass carries them.

use chrono::NaiveTime;
use tracing::{error, field, info, info_span, warn, Span};

use cadence_models::{Account, GeneratorAccountId};

#[derive(Debug, Clone)]
pub struct PassLogger {
    account_id: String,
    span: Span,
}

impl PassLogger {
    pub fn for_account(account: &Account, theme: &str) -> Self {
        let span = info_span!(
            "account_pass",
            account_id = %account.id,
            display_name = %account.generator_name(),
            theme = %theme,
            generator_account = field::Empty,
            publish_time = field::Empty,
        );
        Self {
            account_id: account.id.to_string(),
            span,
        }
    }

    /// Span to instrument the pass with.
    pub fn span(&self) -> Span {
        self.span.clone()
    }

    pub fn record_generator_account(&self, id: &GeneratorAccountId) {
        self.span.record("generator_account", id.as_str());
    }

    pub fn record_publish_time(&self, time: NaiveTime) {
        self.span
            .record("publish_time", field::display(time.format("%H:%M")));
    }

    pub fn log_progress(&self, message: &str) {
        info!(account_id = %self.account_id, "{}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(account_id = %self.account_id, "{}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(account_id = %self.account_id, "Account pass failed: {}", message);
    }

    /// Final per-account counters.
    pub fn log_completion(&self, uploads_created: usize, jobs_requested: usize, corrections: usize) {
        info!(
            account_id = %self.account_id,
            uploads_created,
            jobs_requested,
            corrections,
            "Account pass complete"
        );
    }
}
