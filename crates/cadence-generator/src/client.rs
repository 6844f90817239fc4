//! Generation service HTTP client.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use cadence_models::{GeneratorAccountId, RenderJob, RenderJobId, RenderJobStatus};

use crate::error::{GeneratorError, GeneratorResult};
use crate::types::{
    status_filter, CreateAccountRequest, CreateJobRequest, GeneratorAccount, JobStatusUpdate, Rows,
};

/// Columns requested when listing render jobs.
const JOB_COLUMNS: &str = "id,account_id,status,video_url,created_at,updated_at,\
primary_video_id,secondary_video_id,top_text,bottom_text,video_duration";

/// Contract the scheduling engine needs from the generation service.
#[async_trait]
pub trait GeneratorClient: Send + Sync {
    /// Fetch a generator account by id.
    async fn get_account(&self, id: &GeneratorAccountId) -> GeneratorResult<Option<GeneratorAccount>>;

    /// Fetch a generator account by its display name.
    async fn get_account_by_name(&self, name: &str) -> GeneratorResult<Option<GeneratorAccount>>;

    /// Create a generator account.
    async fn create_account(
        &self,
        name: &str,
        background_url: Option<&str>,
    ) -> GeneratorResult<GeneratorAccount>;

    /// Queue a new render job for an account.
    async fn create_job(&self, account_id: &GeneratorAccountId) -> GeneratorResult<RenderJob>;

    /// List an account's render jobs in any of `statuses`, most recent first.
    async fn list_jobs_by_status(
        &self,
        account_id: &GeneratorAccountId,
        statuses: &[RenderJobStatus],
        limit: usize,
    ) -> GeneratorResult<Vec<RenderJob>>;

    /// Transition a render job to `status`.
    async fn update_job_status(
        &self,
        job_id: &RenderJobId,
        status: RenderJobStatus,
    ) -> GeneratorResult<RenderJob>;

    /// Return the account with `id`, else the one named `name`, else a new one.
    async fn ensure_account(
        &self,
        id: Option<&GeneratorAccountId>,
        name: &str,
    ) -> GeneratorResult<GeneratorAccount> {
        if let Some(id) = id {
            if let Some(account) = self.get_account(id).await? {
                return Ok(account);
            }
        }

        if let Some(account) = self.get_account_by_name(name).await? {
            return Ok(account);
        }

        self.create_account(name, None).await
    }
}

/// Configuration for the generation service client.
#[derive(Clone)]
pub struct GeneratorConfig {
    /// Base URL of the generation service
    pub base_url: String,
    /// Service key sent as `apikey` and bearer token
    pub service_key: String,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries for transient failures
    pub max_retries: u32,
    /// Caption defaults for newly queued jobs
    pub default_top_text: String,
    pub default_bottom_text: String,
    /// Target duration for newly queued jobs, in seconds
    pub default_duration_secs: u32,
}

impl fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("base_url", &self.base_url)
            .field("service_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("default_duration_secs", &self.default_duration_secs)
            .finish()
    }
}

impl GeneratorConfig {
    /// Create a config with defaults for everything but the endpoint.
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            timeout: Duration::from_secs(30),
            max_retries: 2,
            default_top_text: "ROBLOX".to_string(),
            default_bottom_text: "LIKE".to_string(),
            default_duration_secs: 60,
        }
    }

    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Create config from environment variables.
    ///
    /// Fails when the service URL or key is missing.
    pub fn from_env() -> GeneratorResult<Self> {
        let base_url = env_any(&["GENERATOR_URL", "SUPABASE_URL"]).ok_or_else(|| {
            GeneratorError::not_configured("GENERATOR_URL or SUPABASE_URL must be set")
        })?;
        let service_key = env_any(&["GENERATOR_SERVICE_KEY", "SUPABASE_SERVICE_ROLE"])
            .ok_or_else(|| {
                GeneratorError::not_configured(
                    "GENERATOR_SERVICE_KEY or SUPABASE_SERVICE_ROLE must be set",
                )
            })?;

        let mut config = Self::new(base_url, service_key);
        config.timeout = Duration::from_secs(
            std::env::var("GENERATOR_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        );
        config.max_retries = std::env::var("GENERATOR_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);
        if let Ok(text) = std::env::var("GENERATOR_TOP_TEXT") {
            config.default_top_text = text;
        }
        if let Ok(text) = std::env::var("GENERATOR_BOTTOM_TEXT") {
            config.default_bottom_text = text;
        }
        config.default_duration_secs = std::env::var("GENERATOR_VIDEO_DURATION_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        Ok(config)
    }
}

/// First non-empty value among the given environment variables.
fn env_any(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

/// REST client for the generation service.
pub struct HttpGeneratorClient {
    http: Client,
    config: GeneratorConfig,
}

impl HttpGeneratorClient {
    /// Create a new generator client.
    pub fn new(config: GeneratorConfig) -> GeneratorResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("cadence-generator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(GeneratorError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> GeneratorResult<Self> {
        Self::new(GeneratorConfig::from_env()?)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/rest/v1/{}", self.config.base_url, table))
            .header("apikey", &self.config.service_key)
            .bearer_auth(&self.config.service_key)
            .header("Prefer", "return=representation")
    }

    /// Send a request built by `build` and decode the returned rows.
    async fn fetch_rows<T: DeserializeOwned>(
        &self,
        operation: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> GeneratorResult<Vec<T>> {
        debug!(operation = %operation, "Generator request");

        let body = self
            .with_retry(operation, || {
                let request = build();
                async move {
                    let response = request.send().await?;
                    let status = response.status();
                    if status.is_success() {
                        Ok(response.text().await?)
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        Err(GeneratorError::from_http_status(status.as_u16(), body))
                    }
                }
            })
            .await?;

        if body.trim().is_empty() {
            return Ok(Vec::new());
        }

        let rows: Rows<T> = serde_json::from_str(&body)?;
        Ok(rows.into_vec())
    }

    async fn fetch_one<T: DeserializeOwned>(
        &self,
        operation: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> GeneratorResult<T> {
        self.fetch_rows(operation, build)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                GeneratorError::InvalidResponse(format!("{} returned no rows", operation))
            })
    }

    /// Retry transient failures, doubling a half-second wait each time.
    async fn with_retry<F, Fut, T>(&self, operation: &str, op: F) -> GeneratorResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = GeneratorResult<T>>,
    {
        let mut attempt: u32 = 0;
        let mut wait = Duration::from_millis(500);
        loop {
            match op().await {
                Ok(result) => return Ok(result),
                Err(e) if !e.is_retryable() || attempt == self.config.max_retries => return Err(e),
                Err(e) => {
                    attempt += 1;
                    warn!(
                        operation = %operation,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "Generator call failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(wait).await;
                    wait *= 2;
                }
            }
        }
    }
}

#[async_trait]
impl GeneratorClient for HttpGeneratorClient {
    async fn get_account(&self, id: &GeneratorAccountId) -> GeneratorResult<Option<GeneratorAccount>> {
        let rows: Vec<GeneratorAccount> = self
            .fetch_rows("get_account", || {
                self.request(Method::GET, "accounts").query(&[
                    ("id", format!("eq.{}", id)),
                    ("select", "*".to_string()),
                    ("limit", "1".to_string()),
                ])
            })
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn get_account_by_name(&self, name: &str) -> GeneratorResult<Option<GeneratorAccount>> {
        let rows: Vec<GeneratorAccount> = self
            .fetch_rows("get_account_by_name", || {
                self.request(Method::GET, "accounts").query(&[
                    ("name", format!("eq.{}", name)),
                    ("select", "*".to_string()),
                    ("limit", "1".to_string()),
                ])
            })
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn create_account(
        &self,
        name: &str,
        background_url: Option<&str>,
    ) -> GeneratorResult<GeneratorAccount> {
        let body = CreateAccountRequest {
            name,
            background_url,
        };
        self.fetch_one("create_account", || {
            self.request(Method::POST, "accounts").json(&body)
        })
        .await
    }

    async fn create_job(&self, account_id: &GeneratorAccountId) -> GeneratorResult<RenderJob> {
        let body = CreateJobRequest {
            account_id: account_id.as_str(),
            top_text: &self.config.default_top_text,
            bottom_text: &self.config.default_bottom_text,
            video_duration: self.config.default_duration_secs,
            status: RenderJobStatus::Generating,
        };
        self.fetch_one("create_job", || {
            self.request(Method::POST, "video_projects").json(&body)
        })
        .await
    }

    async fn list_jobs_by_status(
        &self,
        account_id: &GeneratorAccountId,
        statuses: &[RenderJobStatus],
        limit: usize,
    ) -> GeneratorResult<Vec<RenderJob>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        self.fetch_rows("list_jobs_by_status", || {
            self.request(Method::GET, "video_projects").query(&[
                ("account_id", format!("eq.{}", account_id)),
                ("status", status_filter(statuses)),
                ("select", JOB_COLUMNS.to_string()),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ])
        })
        .await
    }

    async fn update_job_status(
        &self,
        job_id: &RenderJobId,
        status: RenderJobStatus,
    ) -> GeneratorResult<RenderJob> {
        let body = JobStatusUpdate { status };
        self.fetch_one("update_job_status", || {
            self.request(Method::PATCH, "video_projects")
                .query(&[("id", format!("eq.{}", job_id)), ("select", "*".to_string())])
                .json(&body)
        })
        .await
    }
}
