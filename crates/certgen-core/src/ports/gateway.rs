//! File gateway port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Error type for gateway operations.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The gateway answered with a non-success status.
    #[error("gateway returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Transport-level failure.
    #[error("gateway request failed: {message}")]
    Network { message: String },

    /// The request did not complete within its deadline.
    #[error("gateway request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The gateway answered, but the body was not usable.
    #[error("unusable gateway response: {message}")]
    InvalidResponse { message: String },
}

impl GatewayError {
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}

/// Upload request handed to the gateway.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub mime_type: String,
    pub user_id: Uuid,
    pub is_public: bool,
    pub content: Vec<u8>,
}

/// Descriptor of a stored file, as reported by the gateway.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub file_id: String,
    pub file_name: String,
    pub file_size: Option<u64>,
    pub mime_type: String,
    pub download_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Content-addressed file gateway.
#[async_trait]
pub trait FileGateway: Send + Sync {
    /// Fetch the raw bytes of a stored file.
    async fn download(&self, file_id: Uuid) -> Result<Vec<u8>, GatewayError>;

    /// Store a new file and return its descriptor.
    async fn upload(&self, request: UploadRequest) -> Result<StoredFile, GatewayError>;
}
