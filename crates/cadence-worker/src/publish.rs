//! Publish action: hands a due upload to the publishing service.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use cadence_models::{ProjectLinkStatus, Upload, UploadId, UploadPatch, UploadStatus};
use cadence_store::{Repository, StoreError};

pub type PublishResult<T> = Result<T, PublishError>;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Publisher not configured: {0}")]
    NotConfigured(String),

    #[error("Publish rejected: {0}")]
    Rejected(String),

    #[error("Publishing service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl PublishError {
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            429 | 500..=599 => Self::ServiceUnavailable(format!("{}: {}", status, body)),
            _ => Self::Rejected(format!("{}: {}", status, body)),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PublishError::ServiceUnavailable(_) | PublishError::Network(_) => true,
            PublishError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishReceipt {
    pub upload_id: UploadId,
    pub run_id: String,
    /// Identifier assigned by the destination platform
    pub platform_video_id: String,
}

/// Publishes one upload and records its status transitions.
///
/// Implementations own the `uploading` → `done` / `retry` / `failed`
/// transitions; callers only count outcomes.
#[async_trait]
pub trait PublishAction: Send + Sync {
    async fn publish(&self, upload: &Upload) -> PublishResult<PublishReceipt>;
}

/// Publishing service configuration.
#[derive(Clone)]
pub struct PublishConfig {
    pub base_url: String,
    pub service_key: Option<String>,
    pub timeout: Duration,
    /// Attempts after which an upload is marked failed
    pub max_retries: i32,
    pub visibility: String,
}

impl fmt::Debug for PublishConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishConfig")
            .field("base_url", &self.base_url)
            .field("service_key", &self.service_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("visibility", &self.visibility)
            .finish()
    }
}

impl PublishConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: None,
            timeout: Duration::from_secs(600),
            max_retries: 3,
            visibility: "unlisted".to_string(),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> PublishResult<Self> {
        let base_url = std::env::var("PUBLISH_SERVICE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| PublishError::NotConfigured("PUBLISH_SERVICE_URL must be set".into()))?;

        let mut config = Self::new(base_url);
        config.service_key = std::env::var("PUBLISH_SERVICE_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty());
        config.timeout = Duration::from_secs(
            std::env::var("PUBLISH_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(600),
        );
        config.max_retries = std::env::var("PUBLISH_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3);
        if let Ok(visibility) = std::env::var("PUBLISH_VISIBILITY") {
            config.visibility = visibility;
        }

        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    upload_id: &'a str,
    account_id: &'a str,
    video_id: &'a str,
    run_id: &'a str,
    title: &'a str,
    description: &'a str,
    tags: &'a [String],
    visibility: &'a str,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    video_id: String,
}

/// Publishes through the publishing service's HTTP API.
pub struct HttpPublisher {
    http: Client,
    config: PublishConfig,
    repository: Arc<dyn Repository>,
}

impl HttpPublisher {
    pub fn new(config: PublishConfig, repository: Arc<dyn Repository>) -> PublishResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("cadence-worker/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            config,
            repository,
        })
    }

    async fn send(&self, upload: &Upload, run_id: &str) -> PublishResult<String> {
        let body = PublishRequest {
            upload_id: upload.id.as_str(),
            account_id: upload.account_id.as_str(),
            video_id: upload.video_id.as_str(),
            run_id,
            title: &upload.title,
            description: &upload.description,
            tags: &upload.tags,
            visibility: &self.config.visibility,
        };

        let mut request = self
            .http
            .post(format!("{}/publish", self.config.base_url))
            .json(&body);
        if let Some(key) = &self.config.service_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::from_http_status(status.as_u16(), body));
        }

        let parsed: PublishResponse = response
            .json()
            .await
            .map_err(|e| PublishError::InvalidResponse(e.to_string()))?;
        Ok(parsed.video_id)
    }

    async fn mark_link_uploaded(&self, upload_id: &UploadId) {
        let link = match self.repository.get_project_link_by_upload(upload_id).await {
            Ok(Some(link)) => link,
            Ok(None) => return,
            Err(e) => {
                warn!(upload_id = %upload_id, "Failed to load project link: {}", e);
                return;
            }
        };

        if let Err(e) = self
            .repository
            .update_project_link_status(&link.id, ProjectLinkStatus::Uploaded)
            .await
        {
            warn!(upload_id = %upload_id, link_id = %link.id, "Failed to mark project link uploaded: {}", e);
        }
    }

    async fn record_failure(&self, upload: &Upload, run_id: &str, error: &PublishError) {
        let attempts = match self.repository.increment_upload_retry(&upload.id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(upload_id = %upload.id, "Failed to increment retry count: {}", e);
                upload.retry_count + 1
            }
        };

        let status = if attempts >= self.config.max_retries {
            UploadStatus::Failed
        } else {
            UploadStatus::Retry
        };

        let patch = UploadPatch::status(status)
            .with_run_id(run_id)
            .with_error(error.to_string());
        if let Err(e) = self.repository.update_upload(&upload.id, &patch).await {
            warn!(upload_id = %upload.id, "Failed to record publish failure: {}", e);
        }

        warn!(
            upload_id = %upload.id,
            run_id = %run_id,
            attempts,
            status = %status,
            "Publish failed: {}",
            error
        );
    }
}

#[async_trait]
impl PublishAction for HttpPublisher {
    async fn publish(&self, upload: &Upload) -> PublishResult<PublishReceipt> {
        let run_id = Uuid::new_v4().to_string();
        info!(upload_id = %upload.id, run_id = %run_id, "Publishing upload");

        self.repository
            .update_upload(
                &upload.id,
                &UploadPatch::status(UploadStatus::Uploading).with_run_id(&run_id),
            )
            .await?;

        match self.send(upload, &run_id).await {
            Ok(platform_video_id) => {
                let patch = UploadPatch {
                    platform_video_id: Some(platform_video_id.clone()),
                    ..UploadPatch::status(UploadStatus::Done).with_run_id(&run_id)
                };
                self.repository.update_upload(&upload.id, &patch).await?;
                self.mark_link_uploaded(&upload.id).await;

                info!(
                    upload_id = %upload.id,
                    run_id = %run_id,
                    platform_video_id = %platform_video_id,
                    "Upload published"
                );

                Ok(PublishReceipt {
                    upload_id: upload.id.clone(),
                    run_id,
                    platform_video_id,
                })
            }
            Err(e) => {
                self.record_failure(upload, &run_id, &e).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_error_classification() {
        assert!(PublishError::from_http_status(503, "busy").is_retryable());
        assert!(PublishError::from_http_status(429, "slow down").is_retryable());
        assert!(!PublishError::from_http_status(403, "forbidden").is_retryable());
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let mut config = PublishConfig::new("http://localhost:8080/");
        config.service_key = Some("super-secret".to_string());

        assert_eq!(config.base_url, "http://localhost:8080");
        assert!(!format!("{:?}", config).contains("super-secret"));
    }

    #[test]
    #[serial]
    fn test_config_requires_url() {
        std::env::remove_var("PUBLISH_SERVICE_URL");
        assert!(matches!(
            PublishConfig::from_env(),
            Err(PublishError::NotConfigured(_))
        ));
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        std::env::set_var("PUBLISH_SERVICE_URL", "http://publisher");
        std::env::remove_var("PUBLISH_MAX_RETRIES");
        std::env::remove_var("PUBLISH_VISIBILITY");

        let config = PublishConfig::from_env().unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.visibility, "unlisted");
        assert_eq!(config.timeout, Duration::from_secs(600));

        std::env::remove_var("PUBLISH_SERVICE_URL");
    }
}
