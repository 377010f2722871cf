//! End-to-end orchestration scenarios against in-memory port fakes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use certgen_core::batch::{BatchJob, BatchStatus, ItemStatus, Stage};
use certgen_core::config::CoreConfig;
use certgen_core::events::{subjects, EventEnvelope};
use certgen_core::ports::{
    EventPublisher, FileGateway, GatewayError, JobStore, PdfRenderer, PublishError, QrError,
    QrGenerator, RenderError, StampError, StoreError, StoredFile, UploadRequest,
};
use certgen_core::request::{Placeholder, QrPlacement};
use certgen_core::services::{CoreDeps, ServiceCore};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryStore {
    jobs: Mutex<HashMap<Uuid, BatchJob>>,
    external: Mutex<HashMap<Uuid, Uuid>>,
    fail_saves: AtomicBool,
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn save_job(&self, job: &BatchJob) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::connection("store is down"));
        }
        self.jobs.lock().unwrap().insert(job.internal_id, job.clone());
        Ok(())
    }

    async fn get_job(&self, internal_id: Uuid) -> Result<Option<BatchJob>, StoreError> {
        Ok(self.jobs.lock().unwrap().get(&internal_id).cloned())
    }

    async fn exists(&self, internal_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.jobs.lock().unwrap().contains_key(&internal_id))
    }

    async fn update_status(
        &self,
        internal_id: Uuid,
        status: BatchStatus,
    ) -> Result<(), StoreError> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&internal_id) {
            job.status = status;
        }
        Ok(())
    }

    async fn claim_external_id(
        &self,
        external_id: Uuid,
        internal_id: Uuid,
    ) -> Result<Option<Uuid>, StoreError> {
        let mut map = self.external.lock().unwrap();
        if let Some(prior) = map.get(&external_id) {
            return Ok(Some(*prior));
        }
        map.insert(external_id, internal_id);
        Ok(None)
    }

    async fn lookup_external_id(&self, external_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        Ok(self.external.lock().unwrap().get(&external_id).copied())
    }
}

/// Serves canned templates and records uploads. Unknown ids 404.
struct FakeGateway {
    templates: Mutex<HashMap<Uuid, Vec<u8>>>,
    downloads: AtomicUsize,
    uploads: Mutex<Vec<String>>,
}

impl FakeGateway {
    fn new() -> Self {
        Self {
            templates: Mutex::new(HashMap::new()),
            downloads: AtomicUsize::new(0),
            uploads: Mutex::new(Vec::new()),
        }
    }

    fn add_landscape(&self) -> Uuid {
        self.add(b"%PDF-1.5 LANDSCAPE".to_vec())
    }

    fn add_portrait(&self) -> Uuid {
        self.add(b"%PDF-1.5 PORTRAIT".to_vec())
    }

    fn add(&self, bytes: Vec<u8>) -> Uuid {
        let id = Uuid::new_v4();
        self.templates.lock().unwrap().insert(id, bytes);
        id
    }
}

#[async_trait]
impl FileGateway for FakeGateway {
    async fn download(&self, file_id: Uuid) -> Result<Vec<u8>, GatewayError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.templates
            .lock()
            .unwrap()
            .get(&file_id)
            .cloned()
            .ok_or_else(|| GatewayError::status(404, "template not found"))
    }

    async fn upload(&self, request: UploadRequest) -> Result<StoredFile, GatewayError> {
        self.uploads.lock().unwrap().push(request.file_name.clone());
        Ok(StoredFile {
            file_id: Uuid::new_v4().to_string(),
            file_name: request.file_name,
            file_size: Some(request.content.len() as u64),
            mime_type: request.mime_type,
            download_url: Some("https://files.example/x".to_string()),
            created_at: Utc::now(),
        })
    }
}

/// Pass-through renderer that honors the portrait placement rule.
struct MarkingRenderer;

#[async_trait]
impl PdfRenderer for MarkingRenderer {
    async fn render(
        &self,
        template: &[u8],
        placeholders: &[Placeholder],
    ) -> Result<Vec<u8>, RenderError> {
        let mut out = template.to_vec();
        for ph in placeholders {
            out.extend_from_slice(ph.value.as_bytes());
        }
        Ok(out)
    }

    async fn stamp(
        &self,
        pdf: &[u8],
        qr_png: &[u8],
        placement: &QrPlacement,
    ) -> Result<Vec<u8>, StampError> {
        if placement.page_index > 0 {
            return Err(StampError::PageOutOfRange {
                page: placement.page_index,
                count: 1,
            });
        }
        if pdf.windows(8).any(|w| w == b"PORTRAIT") && placement.rect.is_none() {
            return Err(StampError::PortraitRectRequired);
        }
        Ok([pdf, qr_png].concat())
    }
}

struct FakeQr;

#[async_trait]
impl QrGenerator for FakeQr {
    async fn generate(&self, base_url: &str, verify_code: &str) -> Result<Vec<u8>, QrError> {
        if base_url.trim().is_empty() {
            return Err(QrError::EmptyBaseUrl);
        }
        if verify_code.trim().is_empty() {
            return Err(QrError::EmptyVerifyCode);
        }
        Ok(b"\x89PNG".to_vec())
    }
}

#[derive(Default)]
struct CollectingPublisher {
    events: Mutex<Vec<(String, EventEnvelope)>>,
}

impl CollectingPublisher {
    fn subjects(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(s, _)| s.clone())
            .collect()
    }

    fn payloads_for(&self, subject: &str) -> Vec<serde_json::Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == subject)
            .map(|(_, e)| e.payload.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for CollectingPublisher {
    async fn publish(&self, subject: &str, envelope: &EventEnvelope) -> Result<(), PublishError> {
        self.events
            .lock()
            .unwrap()
            .push((subject.to_string(), envelope.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    core: ServiceCore,
    store: Arc<MemoryStore>,
    gateway: Arc<FakeGateway>,
    publisher: Arc<CollectingPublisher>,
    _scratch: tempfile::TempDir,
    _cache: tempfile::TempDir,
}

fn harness() -> Harness {
    let scratch = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::default());
    let gateway = Arc::new(FakeGateway::new());
    let publisher = Arc::new(CollectingPublisher::default());
    let config = CoreConfig {
        scratch_dir: scratch.path().to_path_buf(),
        template_cache_dir: cache.path().to_path_buf(),
        template_cache_ttl: Duration::from_secs(86_400),
        ..CoreConfig::default()
    };
    let core = ServiceCore::new(CoreDeps {
        store: Arc::clone(&store) as _,
        gateway: Arc::clone(&gateway) as _,
        renderer: Arc::new(MarkingRenderer),
        qr: Arc::new(FakeQr),
        publisher: Arc::clone(&publisher) as _,
        config,
    });
    Harness {
        core,
        store,
        gateway,
        publisher,
        _scratch: scratch,
        _cache: cache,
    }
}

fn item_json(template_id: Uuid, serial: &str) -> serde_json::Value {
    json!({
        "user_id": Uuid::new_v4(),
        "template_id": template_id,
        "serial_code": serial,
        "is_public": true,
        "pdf": [{"key": "nombre", "value": "ANA"}],
        "qr": [{"base_url": "https://v.example"}, {"verify_code": serial}],
        "qr_pdf": [{"qr_size_cm": "2.5"}, {"qr_margin_y_cm": "1.0"}, {"qr_page": "0"}]
    })
}

fn request_json(external_id: Uuid, items: Vec<serde_json::Value>) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event_type": "pdf.batch.requested",
        "payload": {"pdf_job_id": external_id, "items": items}
    }))
    .unwrap()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_valid_item_completes() {
    let h = harness();
    let template = h.gateway.add_landscape();
    let external_id = Uuid::new_v4();
    let raw = request_json(external_id, vec![item_json(template, "C-1")]);

    h.core.plane().handle_batch_request(&raw).await;

    let completed = h.publisher.payloads_for(subjects::BATCH_COMPLETED);
    assert_eq!(completed.len(), 1);
    let payload = &completed[0];
    assert_eq!(payload["status"], "completed");
    assert_eq!(payload["success_count"], 1);
    assert_eq!(payload["failed_count"], 0);
    assert_eq!(payload["pdf_job_id"], json!(external_id));
    let item = &payload["items"][0];
    assert_eq!(item["status"], "completed");
    assert!(item["data"]["file_id"].is_string());
    assert_eq!(item["data"]["file_hash"].as_str().unwrap().len(), 64);

    let item_events = h.publisher.payloads_for(subjects::ITEM_COMPLETED);
    assert_eq!(item_events.len(), 1);
    assert_eq!(h.gateway.uploads.lock().unwrap().as_slice(), ["C-1.pdf"]);
}

#[tokio::test]
async fn invalid_template_fails_batch_with_download_stage() {
    let h = harness();
    let external_id = Uuid::new_v4();
    let missing_template = Uuid::new_v4();
    let item = item_json(missing_template, "C-2");
    let user_id = item["user_id"].clone();
    let raw = request_json(external_id, vec![item]);

    h.core.plane().handle_batch_request(&raw).await;

    let completed = h.publisher.payloads_for(subjects::BATCH_COMPLETED);
    assert_eq!(completed[0]["status"], "failed");
    let failed_item = &completed[0]["items"][0];
    assert_eq!(failed_item["error"]["stage"], "download");
    assert_eq!(failed_item["error"]["user_id"], user_id);
    assert_eq!(failed_item["error"]["status"], "failed");

    // Terminal negative outcome is batch.completed/failed, never batch.failed.
    assert!(h.publisher.payloads_for(subjects::BATCH_FAILED).is_empty());
    assert_eq!(h.publisher.payloads_for(subjects::ITEM_FAILED).len(), 1);
}

#[tokio::test]
async fn mixed_batch_is_partial_and_preserves_order() {
    let h = harness();
    let good_a = h.gateway.add_landscape();
    let good_b = h.gateway.add_landscape();
    let missing = Uuid::new_v4();
    let external_id = Uuid::new_v4();
    let raw = request_json(
        external_id,
        vec![
            item_json(good_a, "C-10"),
            item_json(missing, "C-11"),
            item_json(good_b, "C-12"),
        ],
    );

    h.core.plane().handle_batch_request(&raw).await;

    let completed = h.publisher.payloads_for(subjects::BATCH_COMPLETED);
    let payload = &completed[0];
    assert_eq!(payload["status"], "partial");
    assert_eq!(payload["success_count"], 2);
    assert_eq!(payload["failed_count"], 1);

    let serials: Vec<&str> = payload["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["serial_code"].as_str().unwrap())
        .collect();
    assert_eq!(serials, ["C-10", "C-11", "C-12"]);
    assert_eq!(payload["items"][1]["error"]["stage"], "download");
}

#[tokio::test]
async fn portrait_without_rect_fails_at_insertion() {
    let h = harness();
    let portrait = h.gateway.add_portrait();
    let external_id = Uuid::new_v4();
    let raw = request_json(external_id, vec![item_json(portrait, "C-20")]);

    h.core.plane().handle_batch_request(&raw).await;

    let completed = h.publisher.payloads_for(subjects::BATCH_COMPLETED);
    assert_eq!(completed[0]["status"], "failed");
    assert_eq!(completed[0]["items"][0]["error"]["stage"], "qr_insertion");
}

#[tokio::test]
async fn identical_items_share_one_template_download() {
    let h = harness();
    let template = h.gateway.add_landscape();
    let external_id = Uuid::new_v4();
    let raw = request_json(
        external_id,
        vec![
            item_json(template, "C-30"),
            item_json(template, "C-31"),
            item_json(template, "C-32"),
        ],
    );

    h.core.plane().handle_batch_request(&raw).await;

    let completed = h.publisher.payloads_for(subjects::BATCH_COMPLETED);
    assert_eq!(completed[0]["status"], "completed");
    assert_eq!(completed[0]["success_count"], 3);
    assert_eq!(h.gateway.downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn duplicate_accept_is_idempotent() {
    let h = harness();
    let template = h.gateway.add_landscape();
    let external_id = Uuid::new_v4();
    let raw = request_json(external_id, vec![item_json(template, "C-40")]);

    h.core.plane().handle_batch_request(&raw).await;
    h.core.plane().handle_batch_request(&raw).await;

    let accepted = h.publisher.payloads_for(subjects::BATCH_ACCEPTED);
    assert_eq!(accepted.len(), 2);
    assert_eq!(accepted[0]["duplicate"], false);
    assert_eq!(accepted[1]["duplicate"], true);
    assert_eq!(accepted[1]["job_id"], accepted[0]["job_id"]);

    // The batch was processed exactly once.
    assert_eq!(h.publisher.payloads_for(subjects::BATCH_COMPLETED).len(), 1);
    assert_eq!(h.gateway.uploads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn empty_items_reject_with_validation_error() {
    let h = harness();
    let external_id = Uuid::new_v4();
    let raw = request_json(external_id, vec![]);

    h.core.plane().handle_batch_request(&raw).await;

    let failed = h.publisher.payloads_for(subjects::BATCH_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["code"], "VALIDATION_ERROR");
    assert_eq!(failed[0]["pdf_job_id"], json!(external_id));
    assert!(h.publisher.payloads_for(subjects::BATCH_COMPLETED).is_empty());
}

#[tokio::test]
async fn missing_pdf_job_id_rejects_with_null_id() {
    let h = harness();
    let raw = serde_json::to_vec(&json!({
        "event_type": "pdf.batch.requested",
        "payload": {"items": [item_json(Uuid::new_v4(), "C-50")]}
    }))
    .unwrap();

    h.core.plane().handle_batch_request(&raw).await;

    let failed = h.publisher.payloads_for(subjects::BATCH_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["code"], "VALIDATION_ERROR");
    assert_eq!(failed[0]["pdf_job_id"], serde_json::Value::Null);
}

#[tokio::test]
async fn unparseable_payload_never_crashes_the_plane() {
    let h = harness();
    h.core.plane().handle_batch_request(b"{ not json").await;

    let failed = h.publisher.payloads_for(subjects::BATCH_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn store_outage_at_accept_aborts_with_batch_failed() {
    let h = harness();
    let template = h.gateway.add_landscape();
    let external_id = Uuid::new_v4();
    h.store.fail_saves.store(true, Ordering::SeqCst);
    let raw = request_json(external_id, vec![item_json(template, "C-60")]);

    h.core.plane().handle_batch_request(&raw).await;

    let failed = h.publisher.payloads_for(subjects::BATCH_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["code"], "STORE_ERROR");
    assert!(h.publisher.payloads_for(subjects::BATCH_COMPLETED).is_empty());
}

#[tokio::test]
async fn batch_completed_follows_all_item_events() {
    let h = harness();
    let template = h.gateway.add_landscape();
    let missing = Uuid::new_v4();
    let external_id = Uuid::new_v4();
    let raw = request_json(
        external_id,
        vec![item_json(template, "C-70"), item_json(missing, "C-71")],
    );

    h.core.plane().handle_batch_request(&raw).await;

    let subjects_seen = h.publisher.subjects();
    let completed_pos = subjects_seen
        .iter()
        .position(|s| s == subjects::BATCH_COMPLETED)
        .expect("batch.completed emitted");
    let last_item_pos = subjects_seen
        .iter()
        .enumerate()
        .filter(|(_, s)| s.starts_with("pdf.item."))
        .map(|(i, _)| i)
        .max()
        .expect("item events emitted");
    assert!(completed_pos > last_item_pos);
    assert_eq!(
        subjects_seen
            .iter()
            .filter(|s| *s == subjects::BATCH_COMPLETED)
            .count(),
        1
    );
}

#[tokio::test]
async fn finalized_job_is_queryable_by_both_ids() {
    let h = harness();
    let template = h.gateway.add_landscape();
    let external_id = Uuid::new_v4();
    let raw = request_json(external_id, vec![item_json(template, "C-80")]);
    h.core.plane().handle_batch_request(&raw).await;

    // Query by external id.
    let query = serde_json::to_vec(&json!({"payload": {"pdf_job_id": external_id}})).unwrap();
    let reply = h.core.plane().handle_status_request(&query).await;
    assert_eq!(reply.event_type, subjects::JOB_STATUS_RESPONSE);
    assert_eq!(reply.payload["found"], true);
    assert_eq!(reply.payload["job"]["status"], "completed");
    assert_eq!(reply.payload["job"]["items"][0]["progress_pct"], 100);

    // Query by internal id.
    let internal = reply.payload["job_id"].clone();
    let query = serde_json::to_vec(&json!({"job_id": internal})).unwrap();
    let reply = h.core.plane().handle_status_request(&query).await;
    assert_eq!(reply.payload["found"], true);

    // Unknown id.
    let query = serde_json::to_vec(&json!({"job_id": Uuid::new_v4()})).unwrap();
    let reply = h.core.plane().handle_status_request(&query).await;
    assert_eq!(reply.payload["found"], false);
}

#[tokio::test]
async fn persisted_job_state_matches_events() {
    let h = harness();
    let template = h.gateway.add_landscape();
    let missing = Uuid::new_v4();
    let external_id = Uuid::new_v4();
    let raw = request_json(
        external_id,
        vec![item_json(template, "C-90"), item_json(missing, "C-91")],
    );
    h.core.plane().handle_batch_request(&raw).await;

    let internal = h
        .store
        .lookup_external_id(external_id)
        .await
        .unwrap()
        .expect("mapping recorded");
    let job = h.store.get_job(internal).await.unwrap().expect("job stored");
    assert_eq!(job.status, BatchStatus::Partial);
    assert_eq!(job.success + job.failed, job.total);
    assert!(job.items.iter().all(|i| i.is_terminal()));
    for item in &job.items {
        match item.status {
            ItemStatus::Completed => assert!(item.result.is_some() && item.error.is_none()),
            ItemStatus::Failed => {
                let err = item.error.as_ref().unwrap();
                assert!(item.result.is_none());
                assert_eq!(err.user_id, item.user_id);
                assert_eq!(err.stage, Stage::Download);
            }
            other => panic!("non-terminal status {other:?}"),
        }
    }
    assert!(job.processing_time_ms.is_some());
}
