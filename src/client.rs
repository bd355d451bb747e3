use crate::models::{
    AttachmentContent, AttachmentMeta, DashboardStats, RawEmail, ScheduleEvent,
};
use crate::poller::EmailSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server responded with {0}")]
    Status(StatusCode),
    #[error("server reported an error: {0}")]
    Api(String),
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Client for the producer's HTTP API.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, path: &str) -> Result<Value, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "GET");
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        let body = response.text().await?;
        let value: Value = serde_json::from_str(&body)?;
        check_api_error(&value)?;
        Ok(value)
    }

    pub async fn categorized_emails(&self) -> Result<Vec<RawEmail>, FetchError> {
        let value = self.get_json("/api/categorized-emails").await?;
        decode_categorized(value)
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats, FetchError> {
        let value = self.get_json("/api/dashboard-stats").await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn schedules(&self) -> Result<Vec<ScheduleEvent>, FetchError> {
        let value = self.get_json("/api/schedules").await?;
        decode_schedules(value)
    }

    pub async fn attachments(&self) -> Result<Vec<AttachmentMeta>, FetchError> {
        let value = self.get_json("/api/attachments").await?;
        match value.get("attachments") {
            Some(Value::Array(items)) => Ok(decode_items(items)),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn attachment(&self, id: &str) -> Result<AttachmentContent, FetchError> {
        let value = self.get_json(&format!("/api/attachment/{}", id)).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fetches one attachment and writes its decoded bytes into `dir`.
    pub async fn download_attachment(&self, id: &str, dir: &Path) -> Result<PathBuf> {
        let attachment = self
            .attachment(id)
            .await
            .context(format!("Failed to fetch attachment {}", id))?;

        use base64::{Engine as _, engine::general_purpose};
        let bytes = general_purpose::STANDARD
            .decode(attachment.content.trim())
            .context("Attachment content is not valid base64")?;

        let file_name = Path::new(&attachment.filename)
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| format!("attachment-{}.pdf", id).into());

        tokio::fs::create_dir_all(dir)
            .await
            .context("Failed to create download directory")?;
        let path = dir.join(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .context(format!("Failed to write {}", path.display()))?;

        tracing::info!(path = %path.display(), "attachment downloaded");
        Ok(path)
    }
}

#[async_trait]
impl EmailSource for BackendClient {
    async fn fetch_emails(&self) -> Result<Vec<RawEmail>, FetchError> {
        self.categorized_emails().await
    }
}

/// A non-empty `error` field marks the whole body as a failure.
fn check_api_error(value: &Value) -> Result<(), FetchError> {
    match value.get("error") {
        Some(Value::String(message)) if !message.is_empty() => {
            Err(FetchError::Api(message.clone()))
        }
        Some(Value::Null) | None => Ok(()),
        Some(Value::String(_)) | Some(Value::Bool(false)) => Ok(()),
        Some(other) => Err(FetchError::Api(other.to_string())),
    }
}

/// Decodes `{ emails: [...] }`. A missing `emails` list is a failure; null
/// entries and non-object entries are skipped.
pub fn decode_categorized(value: Value) -> Result<Vec<RawEmail>, FetchError> {
    check_api_error(&value)?;
    let emails = match value.get("emails") {
        Some(Value::Array(items)) => items,
        _ => return Err(FetchError::Api("response has no emails list".to_string())),
    };
    Ok(emails
        .iter()
        .filter(|item| item.is_object())
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect())
}

/// Accepts the flat event array or the `{ schedules: [...] }` wrapper.
pub fn decode_schedules(value: Value) -> Result<Vec<ScheduleEvent>, FetchError> {
    check_api_error(&value)?;
    match &value {
        Value::Array(items) => Ok(decode_items(items)),
        Value::Object(map) => match map.get("schedules") {
            Some(Value::Array(items)) => Ok(decode_items(items)),
            _ => Ok(Vec::new()),
        },
        _ => Err(FetchError::Api("unexpected schedules payload".to_string())),
    }
}

fn decode_items<T: DeserializeOwned>(items: &[Value]) -> Vec<T> {
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::debug!(error = %e, "skipping undecodable item");
                None
            }
        })
        .collect()
}
