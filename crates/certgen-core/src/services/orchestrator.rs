//! Batch orchestrator: accept → fan out → aggregate → finalize.
//!
//! Inline layout: items are dispatched to worker tasks bounded by a
//! semaphore of size `concurrency_per_batch`; no intermediate queues. Each
//! terminal item is committed under a per-job mutex (counter update, job
//! persist, per-item event), and `batch.completed` is published only after
//! every item is terminal.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::batch::{BatchItem, BatchJob, ErrorCode, ItemStatus, Stage};
use crate::config::CoreConfig;
use crate::events::{
    subjects, BatchAcceptedPayload, BatchCompletedPayload, EventEnvelope, ItemEventPayload,
    ItemReport,
};
use crate::ports::{EventPublisher, JobStore, StoreError};
use crate::request::BatchRequest;
use crate::services::pipeline::{self, PipelineDeps};

/// Outcome of the accept protocol.
#[derive(Debug)]
pub enum AcceptOutcome {
    /// A new job was created and persisted.
    Accepted(BatchJob),
    /// The external id was already accepted inside the TTL window.
    Duplicate {
        external_id: Uuid,
        internal_id: Uuid,
    },
}

/// Accept-time failures. These abort the batch before any item runs.
#[derive(Debug, Error)]
pub enum AcceptError {
    #[error("{message}")]
    Validation { message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AcceptError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Drives batches from accept to finalize.
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    publisher: Arc<dyn EventPublisher>,
    pipeline: PipelineDeps,
    config: CoreConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        publisher: Arc<dyn EventPublisher>,
        pipeline: PipelineDeps,
        config: CoreConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            pipeline,
            config,
        }
    }

    /// Accept protocol: validate the envelope, claim the external id, mint
    /// ids, persist the pending job, transition to processing and persist
    /// again.
    ///
    /// Duplicate submissions of an already accepted external id return the
    /// prior internal id instead of creating a second job.
    pub async fn accept(&self, request: BatchRequest) -> Result<AcceptOutcome, AcceptError> {
        let external_id = request
            .pdf_job_id
            .ok_or_else(|| AcceptError::validation("pdf_job_id is required"))?;
        if request.items.is_empty() {
            return Err(AcceptError::validation("items must not be empty"));
        }

        let internal_id = Uuid::new_v4();
        if let Some(prior) = self.store.claim_external_id(external_id, internal_id).await? {
            tracing::info!(
                pdf_job_id = %external_id,
                job_id = %prior,
                "duplicate batch submission, echoing prior accept"
            );
            return Ok(AcceptOutcome::Duplicate {
                external_id,
                internal_id: prior,
            });
        }

        let items: Vec<BatchItem> = request
            .items
            .into_iter()
            .map(crate::request::ItemRequest::into_item)
            .collect();
        let mut job = BatchJob::new(external_id, internal_id, items);
        self.store.save_job(&job).await?;
        job.mark_processing();
        self.store.save_job(&job).await?;

        tracing::info!(
            pdf_job_id = %external_id,
            job_id = %internal_id,
            total_items = job.total,
            "batch accepted"
        );
        Ok(AcceptOutcome::Accepted(job))
    }

    /// Publish the early acknowledgement for an accept outcome.
    pub async fn publish_accepted(&self, outcome: &AcceptOutcome) {
        let payload = match outcome {
            AcceptOutcome::Accepted(job) => BatchAcceptedPayload {
                pdf_job_id: job.external_id,
                job_id: job.internal_id,
                total_items: job.total,
                duplicate: false,
            },
            AcceptOutcome::Duplicate {
                external_id,
                internal_id,
            } => BatchAcceptedPayload {
                pdf_job_id: *external_id,
                job_id: *internal_id,
                total_items: 0,
                duplicate: true,
            },
        };
        self.publish(subjects::BATCH_ACCEPTED, &EventEnvelope::new(subjects::BATCH_ACCEPTED, payload))
            .await;
    }

    /// Dispatch loop and finalization. Never fails: every fault is folded
    /// into item or batch state.
    pub async fn process(&self, job: BatchJob) -> BatchJob {
        let total = job.items.len();
        let external_id = job.external_id;
        let internal_id = job.internal_id;
        let shared = Arc::new(Mutex::new(job));
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_per_batch));
        let mut tasks: JoinSet<(usize, BatchItem)> = JoinSet::new();

        for idx in 0..total {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let mut item = { shared.lock().await.items[idx].clone() };
            let deps = self.pipeline.clone();
            tasks.spawn(async move {
                pipeline::run_item(&deps, &mut item).await;
                drop(permit);
                (idx, item)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, item)) => self.commit_item(&shared, idx, item).await,
                Err(error) => {
                    tracing::error!(job_id = %internal_id, %error, "item task aborted");
                }
            }
        }

        let (final_job, completed_payload) = {
            let mut job = shared.lock().await;
            // A panicked task leaves its item non-terminal; attribute it to
            // the orchestration stage so the counters still close.
            for idx in 0..job.items.len() {
                if !job.items[idx].is_terminal() {
                    job.items[idx].fail(Stage::Orchestration, None, "item task aborted");
                    job.record_outcome(false);
                }
            }
            job.finalize();
            if let Err(error) = self.store.save_job(&job).await {
                tracing::error!(job_id = %internal_id, %error, "final job persist failed");
            }
            (job.clone(), BatchCompletedPayload::from_job(&job))
        };

        tracing::info!(
            pdf_job_id = %external_id,
            job_id = %internal_id,
            status = ?final_job.status,
            success = final_job.success,
            failed = final_job.failed,
            processing_time_ms = final_job.processing_time_ms.unwrap_or(0),
            "batch finalized"
        );
        self.publish(
            subjects::BATCH_COMPLETED,
            &EventEnvelope::new(subjects::BATCH_COMPLETED, completed_payload),
        )
        .await;
        final_job
    }

    /// Commit one terminal item: counters, persist, per-item event.
    async fn commit_item(&self, shared: &Arc<Mutex<BatchJob>>, idx: usize, item: BatchItem) {
        let (subject, payload) = {
            let mut job = shared.lock().await;
            let completed = item.status == ItemStatus::Completed;
            job.items[idx] = item;
            job.record_outcome(completed);

            if let Err(error) = self.store.save_job(&job).await {
                // A persistent store failure is fatal to the item, not the
                // batch: flip the item to an orchestration failure and move
                // its outcome from success to failed.
                tracing::error!(job_id = %job.internal_id, %error, "job persist failed");
                if completed {
                    let message = format!("job state could not be persisted: {error}");
                    let target = &mut job.items[idx];
                    target.status = ItemStatus::Failed;
                    target.result = None;
                    target.error = Some(crate::batch::ItemError::new(
                        target.user_id,
                        Stage::Orchestration,
                        Some(ErrorCode::StoreError),
                        message,
                    ));
                    job.success = job.success.saturating_sub(1);
                    job.failed += 1;
                }
            }

            let item_ref = &job.items[idx];
            let subject = if item_ref.status == ItemStatus::Completed {
                subjects::ITEM_COMPLETED
            } else {
                subjects::ITEM_FAILED
            };
            let payload = ItemEventPayload {
                pdf_job_id: job.external_id,
                job_id: job.internal_id,
                item: ItemReport::from(item_ref),
            };
            (subject, payload)
        };
        self.publish(subject, &EventEnvelope::new(subject, payload)).await;
    }

    async fn publish(&self, subject: &str, envelope: &EventEnvelope) {
        if let Err(error) = self.publisher.publish(subject, envelope).await {
            tracing::warn!(subject, %error, "event publish failed");
        }
    }
}
