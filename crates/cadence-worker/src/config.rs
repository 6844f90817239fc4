//! Worker configuration.

use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use chrono_tz::Tz;
use tracing::warn;

use crate::error::{WorkerError, WorkerResult};
use crate::schedule::parse_publish_time;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(env_or(name, default))
}

/// Calendar settings shared by the engine and the worker loop.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Operating timezone used for local days and wall-clock targets
    pub timezone: Tz,
    /// Default local publish time when an account has none
    pub publish_time: NaiveTime,
    /// How many local days ahead normalization and rescheduling look
    pub horizon_days: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Europe::Madrid,
            publish_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            horizon_days: 150,
        }
    }
}

impl ScheduleConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let timezone = match std::env::var("CADENCE_TIMEZONE") {
            Ok(name) => Tz::from_str(name.trim()).unwrap_or_else(|_| {
                warn!(timezone = %name, "Unknown timezone, using {}", defaults.timezone);
                defaults.timezone
            }),
            Err(_) => defaults.timezone,
        };

        let publish_time = std::env::var("CADENCE_PUBLISH_TIME")
            .ok()
            .and_then(|s| parse_publish_time(&s))
            .unwrap_or(defaults.publish_time);

        Self {
            timezone,
            publish_time,
            horizon_days: env_or("CADENCE_NORMALIZE_DAYS", defaults.horizon_days),
        }
    }
}

/// Scheduling engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Theme whose active accounts are processed
    pub theme: String,
    /// Minimum render jobs kept in flight per account
    pub buffer_floor: usize,
    /// Completed render jobs fetched per selection
    pub candidate_limit: usize,
    /// Window within which an upload counts as due now
    pub due_lookahead: Duration,
    pub default_title: String,
    pub default_description: String,
    pub default_tags: Vec<String>,
    pub schedule: ScheduleConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            theme: "roblox".to_string(),
            buffer_floor: 2,
            candidate_limit: 20,
            due_lookahead: Duration::from_secs(300),
            default_title: "Roblox Short".to_string(),
            default_description: "Susbcribete! #pov #roblox".to_string(),
            default_tags: vec!["#pov".to_string(), "#roblox".to_string()],
            schedule: ScheduleConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let default_tags = std::env::var("CADENCE_DEFAULT_TAGS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|tag| tag.trim().to_string())
                    .filter(|tag| !tag.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|tags| !tags.is_empty())
            .unwrap_or(defaults.default_tags);

        Self {
            theme: std::env::var("CADENCE_THEME").unwrap_or(defaults.theme),
            buffer_floor: env_or("CADENCE_BUFFER_FLOOR", defaults.buffer_floor),
            candidate_limit: env_or("CADENCE_CANDIDATE_LIMIT", defaults.candidate_limit),
            due_lookahead: env_secs("CADENCE_DUE_LOOKAHEAD_SECS", 300),
            default_title: std::env::var("CADENCE_DEFAULT_TITLE").unwrap_or(defaults.default_title),
            default_description: std::env::var("CADENCE_DEFAULT_DESCRIPTION")
                .unwrap_or(defaults.default_description),
            default_tags,
            schedule: ScheduleConfig::from_env(),
        }
    }
}

/// Worker loop configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between iterations
    pub poll_interval: Duration,
    /// Maximum due uploads fetched per iteration
    pub batch_size: usize,
    /// Minimum spacing between scheduling engine passes
    pub sync_interval: Duration,
    /// Pause after an iteration-level failure
    pub error_backoff: Duration,
    /// Window after local midnight in which quotas are reset
    pub quota_reset_window: Duration,
    /// Upper bound on a single publish action
    pub publish_timeout: Duration,
    pub schedule: ScheduleConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            batch_size: 5,
            sync_interval: Duration::from_secs(300),
            error_backoff: Duration::from_secs(30),
            quota_reset_window: Duration::from_secs(120),
            publish_timeout: Duration::from_secs(900),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            poll_interval: env_secs("WORKER_POLL_INTERVAL_SECS", 60),
            batch_size: env_or("WORKER_BATCH_SIZE", 5),
            sync_interval: env_secs("WORKER_SYNC_INTERVAL_SECS", 300),
            error_backoff: env_secs("WORKER_ERROR_BACKOFF_SECS", 30),
            quota_reset_window: env_secs("WORKER_QUOTA_RESET_WINDOW_SECS", 120),
            publish_timeout: env_secs("WORKER_PUBLISH_TIMEOUT_SECS", 900),
            schedule: ScheduleConfig::from_env(),
        }
    }

    /// Reject values that would make the loop spin or never publish.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.batch_size == 0 {
            return Err(WorkerError::config_error("WORKER_BATCH_SIZE must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(WorkerError::config_error(
                "WORKER_POLL_INTERVAL_SECS must be at least 1",
            ));
        }
        if self.publish_timeout.is_zero() {
            return Err(WorkerError::config_error(
                "WORKER_PUBLISH_TIMEOUT_SECS must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_worker_config_defaults() {
        std::env::remove_var("WORKER_POLL_INTERVAL_SECS");
        std::env::remove_var("WORKER_BATCH_SIZE");
        std::env::remove_var("CADENCE_TIMEZONE");
        std::env::remove_var("CADENCE_PUBLISH_TIME");

        let config = WorkerConfig::from_env();
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.sync_interval, Duration::from_secs(300));
        assert_eq!(config.schedule.timezone, chrono_tz::Europe::Madrid);
        assert_eq!(
            config.schedule.publish_time,
            NaiveTime::from_hms_opt(18, 0, 0).unwrap()
        );
    }

    #[test]
    #[serial]
    fn test_schedule_config_from_env() {
        std::env::set_var("CADENCE_TIMEZONE", "America/New_York");
        std::env::set_var("CADENCE_PUBLISH_TIME", "09:30");

        let config = ScheduleConfig::from_env();
        assert_eq!(config.timezone, chrono_tz::America::New_York);
        assert_eq!(config.publish_time, NaiveTime::from_hms_opt(9, 30, 0).unwrap());

        std::env::remove_var("CADENCE_TIMEZONE");
        std::env::remove_var("CADENCE_PUBLISH_TIME");
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back_to_defaults() {
        std::env::set_var("CADENCE_TIMEZONE", "Mars/Olympus");
        std::env::set_var("CADENCE_PUBLISH_TIME", "25:99");
        std::env::set_var("WORKER_BATCH_SIZE", "lots");

        let config = WorkerConfig::from_env();
        assert_eq!(config.schedule.timezone, chrono_tz::Europe::Madrid);
        assert_eq!(
            config.schedule.publish_time,
            NaiveTime::from_hms_opt(18, 0, 0).unwrap()
        );
        assert_eq!(config.batch_size, 5);

        std::env::remove_var("CADENCE_TIMEZONE");
        std::env::remove_var("CADENCE_PUBLISH_TIME");
        std::env::remove_var("WORKER_BATCH_SIZE");
    }

    #[test]
    fn test_validate_rejects_empty_batches() {
        assert!(WorkerConfig::default().validate().is_ok());

        let config = WorkerConfig {
            batch_size: 0,
            ..WorkerConfig::default()
        };
        assert!(matches!(config.validate(), Err(WorkerError::ConfigError(_))));
    }

    #[test]
    #[serial]
    fn test_engine_config_tags() {
        std::env::set_var("CADENCE_DEFAULT_TAGS", "#a, #b,,");
        let config = EngineConfig::from_env();
        assert_eq!(config.default_tags, vec!["#a", "#b"]);
        std::env::remove_var("CADENCE_DEFAULT_TAGS");
    }
}
