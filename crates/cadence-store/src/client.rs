//! PostgREST-backed repository.
//!
//! Production-grade client with:
//! - HTTP client tuning (pooling, timeouts)
//! - Exponential backoff with jitter
//! - Observability (tracing spans, metrics)

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, info_span, Instrument};

use cadence_models::{
    Account, AccountId, GeneratorAccountId, NewProjectLink, NewUpload, NewVideo, ProjectLink,
    ProjectLinkId, ProjectLinkStatus, RenderJobId, Upload, UploadId, UploadPatch, UploadStatus,
    Video, VideoId,
};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_request;
use crate::repository::{QuotaReset, Repository};
use crate::retry::{with_retry, RetryConfig};

const ACCOUNTS: &str = "accounts";
const UPLOADS: &str = "uploads";
const VIDEOS: &str = "videos";
const PROJECT_LINKS: &str = "project_links";
const RESET_QUOTAS_RPC: &str = "rpc/reset_daily_quotas";

// =============================================================================
// Configuration
// =============================================================================

/// Store client configuration.
#[derive(Clone)]
pub struct StoreConfig {
    /// Base URL of the REST endpoint (without `/rest/v1`)
    pub base_url: String,
    /// Service key sent as `apikey` and bearer token
    pub service_key: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("base_url", &self.base_url)
            .field("service_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl StoreConfig {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Create config from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        let base_url = env_any(&["STORE_URL", "SUPABASE_URL"])
            .ok_or_else(|| StoreError::not_configured("STORE_URL or SUPABASE_URL must be set"))?;
        let service_key = env_any(&["STORE_SERVICE_KEY", "SUPABASE_SERVICE_ROLE"]).ok_or_else(
            || StoreError::not_configured("STORE_SERVICE_KEY or SUPABASE_SERVICE_ROLE must be set"),
        )?;

        let timeout_secs: u64 = std::env::var("STORE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let connect_timeout_secs: u64 = std::env::var("STORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
            ..Self::new(base_url, service_key)
        })
    }
}

fn env_any(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

// =============================================================================
// Client
// =============================================================================

/// PostgREST responses are usually arrays but single-object payloads occur
/// when a request asks for one row.
#[derive(Deserialize)]
#[serde(untagged)]
enum Rows<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Rows<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Rows::Many(rows) => rows,
            Rows::One(row) => vec![row],
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn in_filter(statuses: &[UploadStatus]) -> String {
    let values: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    format!("in.({})", values.join(","))
}

/// Repository over the store's REST interface.
///
/// Clones share one connection pool; `close` releases it for all of them.
#[derive(Clone)]
pub struct RestRepository {
    http: Arc<RwLock<Option<Client>>>,
    config: StoreConfig,
}

impl RestRepository {
    /// Create a new repository client.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("cadence-store/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StoreError::Network)?;

        Ok(Self {
            http: Arc::new(RwLock::new(Some(http))),
            config,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(StoreConfig::from_env()?)
    }

    /// The pooled HTTP client, or `Closed` once `close` has run.
    fn client(&self) -> StoreResult<Client> {
        self.http
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(StoreError::Closed)
    }

    fn request(&self, http: &Client, method: Method, resource: &str) -> RequestBuilder {
        self.request_with_preference(http, method, resource, "return=representation")
    }

    fn request_with_preference(
        &self,
        http: &Client,
        method: Method,
        resource: &str,
        prefer: &str,
    ) -> RequestBuilder {
        http.request(method, format!("{}/rest/v1/{}", self.config.base_url, resource))
            .header("apikey", &self.config.service_key)
            .bearer_auth(&self.config.service_key)
            .header("Prefer", prefer)
    }

    /// Send a request built by `build` with retry and metrics; return the body.
    async fn send(
        &self,
        operation: &str,
        resource: &str,
        build: impl Fn(&Client) -> RequestBuilder,
    ) -> StoreResult<String> {
        let span = info_span!("store_request", operation = %operation, resource = %resource);

        let http = self.client()?;
        let start = Instant::now();
        let result = with_retry(&self.config.retry, operation, || {
            let request = build(&http);
            async move {
                let response = request.send().await?;
                let status = response.status();
                if status.is_success() {
                    Ok(response.text().await?)
                } else {
                    Err(Self::handle_error_response(status, response).await)
                }
            }
        })
        .instrument(span)
        .await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }

    async fn fetch_rows<T: DeserializeOwned>(
        &self,
        operation: &str,
        resource: &str,
        build: impl Fn(&Client) -> RequestBuilder,
    ) -> StoreResult<Vec<T>> {
        let body = self.send(operation, resource, build).await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }

        let rows: Rows<T> = serde_json::from_str(&body)?;
        Ok(rows.into_vec())
    }

    async fn fetch_optional<T: DeserializeOwned>(
        &self,
        operation: &str,
        resource: &str,
        build: impl Fn(&Client) -> RequestBuilder,
    ) -> StoreResult<Option<T>> {
        Ok(self
            .fetch_rows(operation, resource, build)
            .await?
            .into_iter()
            .next())
    }

    async fn fetch_one<T: DeserializeOwned>(
        &self,
        operation: &str,
        resource: &str,
        build: impl Fn(&Client) -> RequestBuilder,
    ) -> StoreResult<T> {
        self.fetch_optional(operation, resource, build)
            .await?
            .ok_or_else(|| StoreError::InvalidResponse(format!("{} returned no rows", operation)))
    }

    async fn handle_error_response(status: StatusCode, response: reqwest::Response) -> StoreError {
        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs * 1000);
        let url = response.url().path().to_string();
        let body = response.text().await.unwrap_or_default();

        StoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
            .with_retry_after(retry_after_ms)
    }
}

#[async_trait]
impl Repository for RestRepository {
    async fn list_active_accounts(&self, theme: &str) -> StoreResult<Vec<Account>> {
        self.fetch_rows("list_active_accounts", ACCOUNTS, |http| {
            self.request(http, Method::GET, ACCOUNTS).query(&[
                ("active", "eq.true".to_string()),
                ("theme_slug", format!("eq.{}", theme)),
                ("select", "*".to_string()),
                ("order", "id.asc".to_string()),
            ])
        })
        .await
    }

    async fn get_account(&self, id: &AccountId) -> StoreResult<Option<Account>> {
        self.fetch_optional("get_account", ACCOUNTS, |http| {
            self.request(http, Method::GET, ACCOUNTS).query(&[
                ("id", format!("eq.{}", id)),
                ("select", "*".to_string()),
                ("limit", "1".to_string()),
            ])
        })
        .await
    }

    async fn set_generator_mapping(
        &self,
        account_id: &AccountId,
        generator_account_id: &GeneratorAccountId,
    ) -> StoreResult<()> {
        let body = json!({ "generator_account_id": generator_account_id });
        self.send("set_generator_mapping", ACCOUNTS, |http| {
            self.request(http, Method::PATCH, ACCOUNTS)
                .query(&[("id", format!("eq.{}", account_id))])
                .json(&body)
        })
        .await?;
        Ok(())
    }

    async fn query_uploads(
        &self,
        account_id: &AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        statuses: &[UploadStatus],
    ) -> StoreResult<Vec<Upload>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        self.fetch_rows("query_uploads", UPLOADS, |http| {
            self.request(http, Method::GET, UPLOADS).query(&[
                ("account_id", format!("eq.{}", account_id)),
                ("scheduled_for", format!("gte.{}", timestamp(from))),
                ("scheduled_for", format!("lt.{}", timestamp(to))),
                ("status", in_filter(statuses)),
                ("select", "*".to_string()),
                ("order", "scheduled_for.asc,id.asc".to_string()),
            ])
        })
        .await
    }

    async fn fetch_due_uploads(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Upload>> {
        let due = format!(
            "(status.eq.{},and(status.{},scheduled_for.lte.{}))",
            UploadStatus::Pending.as_str(),
            in_filter(&UploadStatus::DUE),
            timestamp(now)
        );

        self.fetch_rows("fetch_due_uploads", UPLOADS, |http| {
            self.request(http, Method::GET, UPLOADS).query(&[
                ("select", "*,accounts!inner(active)".to_string()),
                ("accounts.active", "eq.true".to_string()),
                ("or", due.clone()),
                ("order", "scheduled_for.asc,id.asc".to_string()),
                ("limit", limit.to_string()),
            ])
        })
        .await
    }

    async fn get_upload(&self, id: &UploadId) -> StoreResult<Option<Upload>> {
        self.fetch_optional("get_upload", UPLOADS, |http| {
            self.request(http, Method::GET, UPLOADS).query(&[
                ("id", format!("eq.{}", id)),
                ("select", "*".to_string()),
                ("limit", "1".to_string()),
            ])
        })
        .await
    }

    async fn create_upload(&self, upload: &NewUpload) -> StoreResult<Upload> {
        self.fetch_one("create_upload", UPLOADS, |http| {
            self.request(http, Method::POST, UPLOADS).json(upload)
        })
        .await
    }

    async fn update_upload(&self, id: &UploadId, patch: &UploadPatch) -> StoreResult<()> {
        self.send("update_upload", UPLOADS, |http| {
            self.request_with_preference(http, Method::PATCH, UPLOADS, "return=minimal")
                .query(&[("id", format!("eq.{}", id))])
                .json(patch)
        })
        .await?;
        Ok(())
    }

    async fn increment_upload_retry(&self, id: &UploadId) -> StoreResult<i32> {
        let upload = self
            .get_upload(id)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("upload {}", id)))?;

        let next = upload.retry_count + 1;
        let patch = UploadPatch {
            retry_count: Some(next),
            ..Default::default()
        };
        self.update_upload(id, &patch).await?;

        debug!(upload_id = %id, retry_count = next, "Incremented upload retry count");
        Ok(next)
    }

    async fn upsert_video(&self, video: &NewVideo) -> StoreResult<Video> {
        self.fetch_one("upsert_video", VIDEOS, |http| {
            self.request_with_preference(
                http,
                Method::POST,
                VIDEOS,
                "resolution=merge-duplicates,return=representation",
            )
            .query(&[("on_conflict", "source_video_id")])
            .json(video)
        })
        .await
    }

    async fn mark_video_picked(&self, id: &VideoId) -> StoreResult<()> {
        let body = json!({ "picked": true });
        self.send("mark_video_picked", VIDEOS, |http| {
            self.request_with_preference(http, Method::PATCH, VIDEOS, "return=minimal")
                .query(&[("id", format!("eq.{}", id))])
                .json(&body)
        })
        .await?;
        Ok(())
    }

    async fn insert_project_link(&self, link: &NewProjectLink) -> StoreResult<ProjectLink> {
        self.fetch_one("insert_project_link", PROJECT_LINKS, |http| {
            self.request(http, Method::POST, PROJECT_LINKS).json(link)
        })
        .await
    }

    async fn get_project_link(&self, job_id: &RenderJobId) -> StoreResult<Option<ProjectLink>> {
        self.fetch_optional("get_project_link", PROJECT_LINKS, |http| {
            self.request(http, Method::GET, PROJECT_LINKS).query(&[
                ("generator_project_id", format!("eq.{}", job_id)),
                ("select", "*".to_string()),
                ("limit", "1".to_string()),
            ])
        })
        .await
    }

    async fn get_project_link_by_upload(
        &self,
        upload_id: &UploadId,
    ) -> StoreResult<Option<ProjectLink>> {
        self.fetch_optional("get_project_link_by_upload", PROJECT_LINKS, |http| {
            self.request(http, Method::GET, PROJECT_LINKS).query(&[
                ("upload_id", format!("eq.{}", upload_id)),
                ("select", "*".to_string()),
                ("limit", "1".to_string()),
            ])
        })
        .await
    }

    async fn update_project_link_schedule(
        &self,
        id: &ProjectLinkId,
        scheduled_for: DateTime<Utc>,
    ) -> StoreResult<()> {
        let body = json!({ "scheduled_for": timestamp(scheduled_for) });
        self.send("update_project_link_schedule", PROJECT_LINKS, |http| {
            self.request_with_preference(http, Method::PATCH, PROJECT_LINKS, "return=minimal")
                .query(&[("id", format!("eq.{}", id))])
                .json(&body)
        })
        .await?;
        Ok(())
    }

    async fn update_project_link_status(
        &self,
        id: &ProjectLinkId,
        status: ProjectLinkStatus,
    ) -> StoreResult<()> {
        let body = json!({ "status": status });
        self.send("update_project_link_status", PROJECT_LINKS, |http| {
            self.request_with_preference(http, Method::PATCH, PROJECT_LINKS, "return=minimal")
                .query(&[("id", format!("eq.{}", id))])
                .json(&body)
        })
        .await?;
        Ok(())
    }

    async fn has_account_used_clip(
        &self,
        account_id: &AccountId,
        clip_id: &str,
    ) -> StoreResult<bool> {
        let quoted = clip_id.replace('"', "\\\"");
        let filter = format!(
            "(primary_video_id.eq.\"{0}\",secondary_video_id.eq.\"{0}\")",
            quoted
        );

        let rows: Vec<serde_json::Value> = self
            .fetch_rows("has_account_used_clip", PROJECT_LINKS, |http| {
                self.request(http, Method::GET, PROJECT_LINKS).query(&[
                    ("account_id", format!("eq.{}", account_id)),
                    ("or", filter.clone()),
                    ("select", "id".to_string()),
                    ("limit", "1".to_string()),
                ])
            })
            .await?;
        Ok(!rows.is_empty())
    }

    async fn close(&self) {
        let released = match self.http.write() {
            Ok(mut guard) => guard.take().is_some(),
            Err(_) => false,
        };
        if released {
            info!(base_url = %self.config.base_url, "Store connection pool released");
        }
    }
}

#[async_trait]
impl QuotaReset for RestRepository {
    async fn reset_daily_quotas(&self) -> StoreResult<()> {
        let body = json!({});
        self.send("reset_daily_quotas", RESET_QUOTAS_RPC, |http| {
            self.request_with_preference(http, Method::POST, RESET_QUOTAS_RPC, "return=minimal")
                .json(&body)
        })
        .await?;
        info!("Daily quotas reset");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
