//! Job store, work queue and lock ports.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::batch::{BatchJob, BatchStatus};

/// Error type for store-backed operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Connection or command failure.
    #[error("store operation failed: {message}")]
    Connection { message: String },

    /// The operation did not complete within its deadline.
    #[error("store operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Stored state could not be encoded or decoded.
    #[error("failed to encode job state: {message}")]
    Encoding { message: String },
}

impl StoreError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }
}

/// One unit of queued work in the staged layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub batch_internal_id: Uuid,
    pub item_id: Uuid,
}

/// Durable, TTL-scoped state for batch jobs.
///
/// Writes refresh the TTL so an active job never expires while making
/// progress. The orchestrator serializes its own writes per job id; the
/// store only has to tolerate concurrent readers.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Upsert the whole job, refreshing its TTL.
    async fn save_job(&self, job: &BatchJob) -> Result<(), StoreError>;

    /// Point read of a whole job, items included.
    async fn get_job(&self, internal_id: Uuid) -> Result<Option<BatchJob>, StoreError>;

    /// Cheap presence check.
    async fn exists(&self, internal_id: Uuid) -> Result<bool, StoreError>;

    /// Single-field status update. A missing job is not an error.
    async fn update_status(
        &self,
        internal_id: Uuid,
        status: BatchStatus,
    ) -> Result<(), StoreError>;

    /// Record the external→internal id mapping if absent (NX semantics).
    ///
    /// Returns `None` when this call claimed the mapping, or the previously
    /// recorded internal id when a job with this external id already exists
    /// inside the TTL window.
    async fn claim_external_id(
        &self,
        external_id: Uuid,
        internal_id: Uuid,
    ) -> Result<Option<Uuid>, StoreError>;

    /// Resolve an external id to its internal id, if known.
    async fn lookup_external_id(&self, external_id: Uuid) -> Result<Option<Uuid>, StoreError>;
}

/// FIFO work queue for the staged layout.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, queue: &str, entry: &QueueEntry) -> Result<(), StoreError>;

    /// Blocking pop; returns `None` on timeout. The preferred idle state
    /// for workers.
    async fn dequeue_blocking(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<QueueEntry>, StoreError>;
}

/// Short-lived named locks with TTL.
///
/// Non-reentrant; `acquire` is an atomic test-and-set with expiry.
#[async_trait]
pub trait LockManager: Send + Sync {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
    async fn release(&self, key: &str) -> Result<(), StoreError>;
}
