//! Batch and item domain types.
//!
//! These types are serializable and carry the observable state of a batch:
//! the job record persisted in the store, the per-item state machine, and
//! the failure taxonomy used to attribute errors to pipeline stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::request::{Placeholder, QrConfig, QrPlacement};

/// Aggregate status of a batch job.
///
/// Transitions are monotonic: `Pending` → `Processing` → one of the three
/// terminal states. A terminal job is never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Partial,
    Failed,
}

impl BatchStatus {
    /// Whether this status ends the batch lifecycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Failed)
    }
}

/// Per-item pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Downloading,
    Downloaded,
    Rendering,
    Rendered,
    GeneratingQr,
    QrGenerated,
    InsertingQr,
    QrInserted,
    Uploading,
    Completed,
    Failed,
}

impl ItemStatus {
    /// Whether this status ends the item lifecycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Progress percentage derived from the status.
    ///
    /// `Failed` has no fixed percentage: a failed item keeps the progress it
    /// had reached, which is why `BatchItem` stores the percentage separately.
    #[must_use]
    pub const fn progress_pct(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Downloading => Some(10),
            Self::Downloaded => Some(20),
            Self::Rendering => Some(30),
            Self::Rendered => Some(50),
            Self::GeneratingQr => Some(60),
            Self::QrGenerated => Some(70),
            Self::InsertingQr => Some(80),
            Self::QrInserted => Some(85),
            Self::Uploading => Some(90),
            Self::Completed => Some(100),
            Self::Failed => None,
        }
    }
}

/// Pipeline stage at which a failure is attributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Render,
    QrGeneration,
    QrInsertion,
    Upload,
    Validation,
    Orchestration,
}

/// Machine-readable error codes carried in failure envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    DownloadError,
    RenderError,
    QrError,
    InsertError,
    UploadError,
    StoreError,
}

/// Failure envelope attached to a failed item.
///
/// The `user_id` echo is part of the contract: consumers route failure
/// notifications by user without rejoining against the item record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub user_id: Uuid,
    pub status: String,
    pub message: String,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<ErrorCode>,
}

impl ItemError {
    pub fn new(
        user_id: Uuid,
        stage: Stage,
        code: Option<ErrorCode>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            status: "failed".to_string(),
            message: message.into(),
            stage,
            code,
        }
    }
}

/// Result record attached to a completed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemArtifact {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: String,
    pub mime_type: String,
    pub is_public: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub download_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processing_time_ms: u64,
}

/// One certificate within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub item_id: Uuid,
    pub user_id: Uuid,
    pub template_id: Uuid,
    pub serial_code: String,
    pub is_public: bool,
    pub placeholders: Vec<Placeholder>,
    pub qr: QrConfig,
    pub placement: QrPlacement,
    pub status: ItemStatus,
    pub progress_pct: u8,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<ItemArtifact>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ItemError>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchItem {
    /// Whether the item reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Advance the state machine.
    ///
    /// Terminal states are sticky: further transitions are ignored.
    pub fn set_status(&mut self, status: ItemStatus) {
        if self.is_terminal() {
            return;
        }
        self.status = status;
        if let Some(pct) = status.progress_pct() {
            self.progress_pct = pct;
        }
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }

    /// Mark the item completed with its artifact.
    pub fn complete(&mut self, artifact: ItemArtifact) {
        if self.is_terminal() {
            return;
        }
        self.result = Some(artifact);
        self.set_status(ItemStatus::Completed);
    }

    /// Mark the item failed, attributing the failure to `stage`.
    pub fn fail(&mut self, stage: Stage, code: Option<ErrorCode>, message: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.error = Some(ItemError::new(self.user_id, stage, code, message));
        self.set_status(ItemStatus::Failed);
    }
}

/// The outer unit of work: a client-submitted batch of certificates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Caller-supplied id, echoed in every outbound event.
    pub external_id: Uuid,
    /// Service-assigned id, primary key in the job store.
    pub internal_id: Uuid,
    pub status: BatchStatus,
    pub total: u32,
    pub success: u32,
    pub failed: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub processing_time_ms: Option<u64>,
    pub items: Vec<BatchItem>,
}

impl BatchJob {
    /// Build a pending job from its accepted items.
    #[must_use]
    pub fn new(external_id: Uuid, internal_id: Uuid, items: Vec<BatchItem>) -> Self {
        let total = u32::try_from(items.len()).unwrap_or(u32::MAX);
        Self {
            external_id,
            internal_id,
            status: BatchStatus::Pending,
            total,
            success: 0,
            failed: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            processing_time_ms: None,
            items,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Transition `Pending` → `Processing` and stamp `started_at`.
    pub fn mark_processing(&mut self) {
        if self.status == BatchStatus::Pending {
            self.status = BatchStatus::Processing;
            self.started_at = Some(Utc::now());
        }
    }

    /// Record one terminal item outcome.
    ///
    /// The counters never exceed `total`; excess outcomes are ignored.
    pub fn record_outcome(&mut self, completed: bool) {
        if self.is_terminal() || self.success + self.failed >= self.total {
            return;
        }
        if completed {
            self.success += 1;
        } else {
            self.failed += 1;
        }
    }

    /// Whether every item reached a terminal state.
    #[must_use]
    pub fn all_items_terminal(&self) -> bool {
        self.items.iter().all(BatchItem::is_terminal)
    }

    /// Finalize the batch from its counters.
    ///
    /// `success = total` ⇒ `Completed`; `failed = total` ⇒ `Failed`;
    /// any mixture ⇒ `Partial`.
    pub fn finalize(&mut self) -> BatchStatus {
        if self.is_terminal() {
            return self.status;
        }
        self.status = if self.success == self.total {
            BatchStatus::Completed
        } else if self.failed == self.total {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        };
        let now = Utc::now();
        self.completed_at = Some(now);
        let since = self.started_at.unwrap_or(self.created_at);
        self.processing_time_ms =
            Some(u64::try_from((now - since).num_milliseconds().max(0)).unwrap_or(0));
        self.status
    }
}
