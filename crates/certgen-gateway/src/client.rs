//! HTTP client for the file gateway.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use uuid::Uuid;

use certgen_core::ports::{FileGateway, GatewayError, StoredFile, UploadRequest};

use crate::sign::sign;

/// Connection settings for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Public base URL; may carry a `/public` suffix for downloads.
    pub base_url: String,
    pub access_key: String,
    pub secret_key: String,
    pub project_id: String,
    pub download_timeout: Duration,
    pub upload_timeout: Duration,
}

/// `FileGateway` port implementation over reqwest.
pub struct HttpFileGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpFileGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::network(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn signed_headers(&self, method: &str, path: &str) -> [(&'static str, String); 3] {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string();
        let signature = sign(&self.config.secret_key, method, path, &timestamp);
        [
            ("X-Access-Key", self.config.access_key.clone()),
            ("X-Signature", signature),
            ("X-Timestamp", timestamp),
        ]
    }

    fn map_send_error(error: &reqwest::Error, timeout: Duration) -> GatewayError {
        if error.is_timeout() {
            GatewayError::Timeout {
                seconds: timeout.as_secs(),
            }
        } else {
            GatewayError::network(error.to_string())
        }
    }
}

/// Strip a trailing `/public` to reach the API root used for uploads.
fn api_root(base_url: &str) -> &str {
    let trimmed = base_url.trim_end_matches('/');
    trimmed.strip_suffix("/public").unwrap_or(trimmed)
}

fn download_url(base_url: &str, file_id: Uuid) -> String {
    format!("{}/files/{file_id}", base_url.trim_end_matches('/'))
}

/// The path covered by the signature, without any `/public` prefix.
fn signed_download_path(file_id: Uuid) -> String {
    format!("/files/{file_id}")
}

const UPLOAD_PATH: &str = "/api/v1/files";

#[async_trait]
impl FileGateway for HttpFileGateway {
    async fn download(&self, file_id: Uuid) -> Result<Vec<u8>, GatewayError> {
        let url = download_url(&self.config.base_url, file_id);
        let mut request = self
            .client
            .get(&url)
            .timeout(self.config.download_timeout);
        for (name, value) in self.signed_headers("GET", &signed_download_path(file_id)) {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::map_send_error(&e, self.config.download_timeout))?;
        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::status(status.as_u16(), truncate(&body)));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::network(e.to_string()))?;
        tracing::debug!(file_id = %file_id, size = bytes.len(), "file downloaded");
        Ok(bytes.to_vec())
    }

    async fn upload(&self, upload: UploadRequest) -> Result<StoredFile, GatewayError> {
        let url = format!("{}{UPLOAD_PATH}", api_root(&self.config.base_url));
        let size = upload.content.len();

        let part = Part::bytes(upload.content)
            .file_name(upload.file_name.clone())
            .mime_str(&upload.mime_type)
            .map_err(|e| GatewayError::network(e.to_string()))?;
        let form = Form::new()
            .text("project_id", self.config.project_id.clone())
            .text("user_id", upload.user_id.to_string())
            .text("is_public", if upload.is_public { "true" } else { "false" })
            .part("file", part);

        let mut request = self
            .client
            .post(&url)
            .multipart(form)
            .timeout(self.config.upload_timeout);
        for (name, value) in self.signed_headers("POST", UPLOAD_PATH) {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::map_send_error(&e, self.config.upload_timeout))?;
        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::status(status.as_u16(), truncate(&body)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::invalid_response(e.to_string()))?;
        let stored = extract_descriptor(&body, &upload.file_name, size as u64)?;
        tracing::info!(file_id = %stored.file_id, file_name = %stored.file_name, size, "file uploaded");
        Ok(stored)
    }
}

/// Pull the file descriptor out of the upload response.
///
/// Upstream variants nest it at `data.file`, `data`, or the top level, and
/// name the id `id` or `file_id`; search them in that order.
fn extract_descriptor(
    body: &Value,
    fallback_name: &str,
    fallback_size: u64,
) -> Result<StoredFile, GatewayError> {
    let candidates = [
        body.pointer("/data/file"),
        body.get("data"),
        Some(body),
    ];
    let descriptor = candidates
        .into_iter()
        .flatten()
        .find(|v| v.get("id").is_some() || v.get("file_id").is_some())
        .ok_or_else(|| GatewayError::invalid_response("no file id in upload response"))?;

    let file_id = descriptor
        .get("id")
        .or_else(|| descriptor.get("file_id"))
        .and_then(value_to_string)
        .ok_or_else(|| GatewayError::invalid_response("file id is not a string"))?;
    let file_name = descriptor
        .get("file_name")
        .or_else(|| descriptor.get("name"))
        .and_then(value_to_string)
        .unwrap_or_else(|| fallback_name.to_string());
    let file_size = descriptor
        .get("file_size")
        .or_else(|| descriptor.get("size"))
        .and_then(Value::as_u64)
        .or(Some(fallback_size));
    let mime_type = descriptor
        .get("mime_type")
        .and_then(value_to_string)
        .unwrap_or_else(|| "application/pdf".to_string());
    let download_url = descriptor
        .get("download_url")
        .or_else(|| descriptor.get("url"))
        .and_then(value_to_string);
    let created_at = descriptor
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc));

    Ok(StoredFile {
        file_id,
        file_name,
        file_size,
        mime_type,
        download_url,
        created_at,
    })
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 256;
    if body.len() <= LIMIT {
        body.to_string()
    } else {
        let mut end = LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}
