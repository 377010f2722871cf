//! Outbound event envelopes and payloads.
//!
//! Every outbound message shares the same envelope: a fresh event id, the
//! subject name as `event_type`, an ISO-8601 UTC timestamp, a constant
//! source string, and the event-specific payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::batch::{
    BatchItem, BatchJob, BatchStatus, ErrorCode, ItemArtifact, ItemError, ItemStatus,
};

/// Constant identifying this service in outbound envelopes.
pub const SOURCE: &str = "certgen";

/// Bus subjects.
pub mod subjects {
    /// Inbound batch requests.
    pub const BATCH_REQUESTED: &str = "pdf.batch.requested";
    /// Early acknowledgement after accept.
    pub const BATCH_ACCEPTED: &str = "pdf.batch.accepted";
    /// Terminal batch outcome, carrying the item roster.
    pub const BATCH_COMPLETED: &str = "pdf.batch.completed";
    /// Abort-only: validation failures and non-item-scoped faults.
    pub const BATCH_FAILED: &str = "pdf.batch.failed";
    /// One per item reaching `completed`.
    pub const ITEM_COMPLETED: &str = "pdf.item.completed";
    /// One per item reaching `failed`.
    pub const ITEM_FAILED: &str = "pdf.item.failed";
    /// Inbound status queries.
    pub const JOB_STATUS_REQUESTED: &str = "pdf.job.status.requested";
    /// Status replies when the query carries no reply subject.
    pub const JOB_STATUS_RESPONSE: &str = "pdf.job.status.response";
}

/// Common envelope for every outbound event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub payload: Value,
}

impl EventEnvelope {
    /// Wrap a payload, minting a fresh event id.
    pub fn new(event_type: &str, payload: impl Serialize) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            source: SOURCE.to_string(),
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }
}

/// Payload of `pdf.batch.accepted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchAcceptedPayload {
    pub pdf_job_id: Uuid,
    pub job_id: Uuid,
    pub total_items: u32,
    /// True when this acknowledges a duplicate submission of an already
    /// accepted batch.
    pub duplicate: bool,
}

/// Payload of `pdf.batch.failed` (abort-only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailedPayload {
    pub pdf_job_id: Option<Uuid>,
    pub code: ErrorCode,
    pub message: String,
}

/// Terminal item record embedded in item and batch events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReport {
    pub item_id: Uuid,
    pub user_id: Uuid,
    pub serial_code: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<ItemArtifact>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ItemError>,
}

impl From<&BatchItem> for ItemReport {
    fn from(item: &BatchItem) -> Self {
        Self {
            item_id: item.item_id,
            user_id: item.user_id,
            serial_code: item.serial_code.clone(),
            status: item.status,
            data: item.result.clone(),
            error: item.error.clone(),
        }
    }
}

/// Payload of `pdf.item.completed` / `pdf.item.failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemEventPayload {
    pub pdf_job_id: Uuid,
    pub job_id: Uuid,
    #[serde(flatten)]
    pub item: ItemReport,
}

/// Payload of `pdf.batch.completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCompletedPayload {
    pub pdf_job_id: Uuid,
    pub job_id: Uuid,
    pub status: BatchStatus,
    pub total_items: u32,
    pub success_count: u32,
    pub failed_count: u32,
    pub items: Vec<ItemReport>,
    pub processing_time_ms: u64,
}

impl BatchCompletedPayload {
    /// Build from a finalized job; item order preserves submission order.
    #[must_use]
    pub fn from_job(job: &BatchJob) -> Self {
        Self {
            pdf_job_id: job.external_id,
            job_id: job.internal_id,
            status: job.status,
            total_items: job.total,
            success_count: job.success,
            failed_count: job.failed,
            items: job.items.iter().map(ItemReport::from).collect(),
            processing_time_ms: job.processing_time_ms.unwrap_or(0),
        }
    }
}

/// Payload of `pdf.job.status.requested`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusRequestPayload {
    #[serde(default)]
    pub job_id: Option<Uuid>,
    #[serde(default)]
    pub pdf_job_id: Option<Uuid>,
}

/// Per-item line in a status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemStatusLine {
    pub item_id: Uuid,
    pub user_id: Uuid,
    pub serial_code: String,
    pub status: ItemStatus,
    pub progress_pct: u8,
}

/// Snapshot of a job for status replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub pdf_job_id: Uuid,
    pub job_id: Uuid,
    pub status: BatchStatus,
    pub total_items: u32,
    pub success_count: u32,
    pub failed_count: u32,
    pub items: Vec<ItemStatusLine>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub processing_time_ms: Option<u64>,
}

impl StatusSnapshot {
    #[must_use]
    pub fn from_job(job: &BatchJob) -> Self {
        Self {
            pdf_job_id: job.external_id,
            job_id: job.internal_id,
            status: job.status,
            total_items: job.total,
            success_count: job.success,
            failed_count: job.failed,
            items: job
                .items
                .iter()
                .map(|item| ItemStatusLine {
                    item_id: item.item_id,
                    user_id: item.user_id,
                    serial_code: item.serial_code.clone(),
                    status: item.status,
                    progress_pct: item.progress_pct,
                })
                .collect(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            processing_time_ms: job.processing_time_ms,
        }
    }
}

/// Payload of `pdf.job.status.response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponsePayload {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pdf_job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub job: Option<StatusSnapshot>,
}
