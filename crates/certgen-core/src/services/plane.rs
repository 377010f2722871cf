//! Event plane: inbound validation, dispatch and status queries.
//!
//! The plane never throws past its handlers: malformed payloads become
//! `pdf.batch.failed` events with `VALIDATION_ERROR`, and every other fault
//! is folded into job state by the orchestrator.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::batch::ErrorCode;
use crate::events::{
    subjects, BatchFailedPayload, EventEnvelope, StatusRequestPayload, StatusResponsePayload,
    StatusSnapshot,
};
use crate::ports::{EventPublisher, JobStore};
use crate::request::BatchRequest;
use crate::services::orchestrator::{AcceptError, AcceptOutcome, Orchestrator};

/// Front door for bus traffic.
pub struct EventPlane {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn JobStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl EventPlane {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        store: Arc<dyn JobStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            orchestrator,
            store,
            publisher,
        }
    }

    /// Handle one `pdf.batch.requested` message end to end.
    ///
    /// Accepts either a full envelope (`{event_type, payload: {…}}`) or a
    /// bare payload object.
    pub async fn handle_batch_request(&self, raw: &[u8]) {
        let request = match parse_batch_request(raw) {
            Ok(request) => request,
            Err(message) => {
                tracing::warn!(error = %message, "malformed batch request");
                self.publish_batch_failed(
                    extract_external_id(raw),
                    ErrorCode::ValidationError,
                    message,
                )
                .await;
                return;
            }
        };
        let external_id = request.pdf_job_id;

        match self.orchestrator.accept(request).await {
            Ok(outcome) => {
                self.orchestrator.publish_accepted(&outcome).await;
                if let AcceptOutcome::Accepted(job) = outcome {
                    self.orchestrator.process(job).await;
                }
            }
            Err(AcceptError::Validation { message }) => {
                self.publish_batch_failed(external_id, ErrorCode::ValidationError, message)
                    .await;
            }
            Err(AcceptError::Store(error)) => {
                tracing::error!(%error, "store outage at accept");
                self.publish_batch_failed(
                    external_id,
                    ErrorCode::StoreError,
                    format!("batch could not be accepted: {error}"),
                )
                .await;
            }
        }
    }

    /// Answer one `pdf.job.status.requested` message.
    ///
    /// Returns the reply envelope; the transport decides whether it goes to
    /// the request's reply subject or to `pdf.job.status.response`.
    pub async fn handle_status_request(&self, raw: &[u8]) -> EventEnvelope {
        let query: StatusRequestPayload = parse_payload(raw).unwrap_or_default();

        let internal_id = match (query.job_id, query.pdf_job_id) {
            (Some(id), _) => Some(id),
            (None, Some(external)) => self
                .store
                .lookup_external_id(external)
                .await
                .unwrap_or_else(|error| {
                    tracing::warn!(%error, "external id lookup failed");
                    None
                }),
            (None, None) => None,
        };

        let job = match internal_id {
            Some(id) => self.store.get_job(id).await.unwrap_or_else(|error| {
                tracing::warn!(job_id = %id, %error, "status read failed");
                None
            }),
            None => None,
        };

        let payload = StatusResponsePayload {
            found: job.is_some(),
            job_id: job.as_ref().map(|j| j.internal_id).or(query.job_id),
            pdf_job_id: job.as_ref().map(|j| j.external_id).or(query.pdf_job_id),
            job: job.as_ref().map(StatusSnapshot::from_job),
        };
        EventEnvelope::new(subjects::JOB_STATUS_RESPONSE, payload)
    }

    async fn publish_batch_failed(
        &self,
        pdf_job_id: Option<Uuid>,
        code: ErrorCode,
        message: String,
    ) {
        let envelope = EventEnvelope::new(
            subjects::BATCH_FAILED,
            BatchFailedPayload {
                pdf_job_id,
                code,
                message,
            },
        );
        if let Err(error) = self.publisher.publish(subjects::BATCH_FAILED, &envelope).await {
            tracing::warn!(%error, "batch.failed publish failed");
        }
    }
}

fn parse_batch_request(raw: &[u8]) -> Result<BatchRequest, String> {
    parse_payload(raw)
}

/// Deserialize the payload object out of `raw`, unwrapping an envelope if
/// one is present.
fn parse_payload<T: serde::de::DeserializeOwned>(raw: &[u8]) -> Result<T, String> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| format!("payload is not valid JSON: {e}"))?;
    let payload = match value.get("payload") {
        Some(inner) if inner.is_object() => inner.clone(),
        _ => value,
    };
    serde_json::from_value(payload).map_err(|e| format!("payload has an invalid shape: {e}"))
}

/// Best-effort extraction of the external id from an unparseable message.
fn extract_external_id(raw: &[u8]) -> Option<Uuid> {
    let value: Value = serde_json::from_slice(raw).ok()?;
    let id = value
        .pointer("/payload/pdf_job_id")
        .or_else(|| value.get("pdf_job_id"))?;
    serde_json::from_value(id.clone()).ok()
}
