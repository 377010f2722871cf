//! Per-item pipeline: download → render → qr → stamp → upload.
//!
//! The pipeline is invoked once per item and is stateless across
//! invocations; all observable state lives in the `BatchItem` record it
//! mutates. Stage failures are converted into a typed outcome at the stage
//! boundary — the first failure short-circuits the run and is attributed to
//! exactly one stage.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::batch::{BatchItem, ErrorCode, ItemArtifact, ItemStatus, Stage};
use crate::ports::{FileGateway, PdfRenderer, QrGenerator, UploadRequest};
use crate::services::template_cache::{TemplateCache, TemplateError};

/// Cloned-Arc dependencies handed to each pipeline run.
///
/// A value type with no references back to the orchestrator.
#[derive(Clone)]
pub struct PipelineDeps {
    pub templates: Arc<TemplateCache>,
    pub renderer: Arc<dyn PdfRenderer>,
    pub qr: Arc<dyn QrGenerator>,
    pub gateway: Arc<dyn FileGateway>,
    pub scratch_dir: PathBuf,
}

/// A stage failure, tagged with the stage that first rejected.
struct StageFailure {
    stage: Stage,
    code: ErrorCode,
    message: String,
}

impl StageFailure {
    fn new(stage: Stage, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            stage,
            code,
            message: message.into(),
        }
    }
}

/// Run one item to a terminal state.
///
/// Items that are already terminal (e.g. rejected at ingress) pass through
/// untouched. Scratch files are removed on both success and failure.
pub async fn run_item(deps: &PipelineDeps, item: &mut BatchItem) {
    if item.is_terminal() {
        return;
    }
    let started = Instant::now();
    let outcome = execute(deps, item, started).await;
    cleanup_scratch(deps, item.item_id).await;
    if let Err(failure) = outcome {
        tracing::warn!(
            item_id = %item.item_id,
            serial_code = %item.serial_code,
            stage = ?failure.stage,
            error = %failure.message,
            "item failed"
        );
        item.fail(failure.stage, Some(failure.code), failure.message);
    }
}

async fn execute(
    deps: &PipelineDeps,
    item: &mut BatchItem,
    started: Instant,
) -> Result<(), StageFailure> {
    item.set_status(ItemStatus::Downloading);
    let template = deps
        .templates
        .get(item.template_id)
        .await
        .map_err(download_failure)?;
    item.set_status(ItemStatus::Downloaded);

    item.set_status(ItemStatus::Rendering);
    let rendered = deps
        .renderer
        .render(&template, &item.placeholders)
        .await
        .map_err(|e| StageFailure::new(Stage::Render, ErrorCode::RenderError, e.to_string()))?;
    item.set_status(ItemStatus::Rendered);

    item.set_status(ItemStatus::GeneratingQr);
    let qr_png = deps
        .qr
        .generate(&item.qr.base_url, &item.qr.verify_code)
        .await
        .map_err(|e| StageFailure::new(Stage::QrGeneration, ErrorCode::QrError, e.to_string()))?;
    item.set_status(ItemStatus::QrGenerated);

    item.set_status(ItemStatus::InsertingQr);
    let final_pdf = deps
        .renderer
        .stamp(&rendered, &qr_png, &item.placement)
        .await
        .map_err(|e| StageFailure::new(Stage::QrInsertion, ErrorCode::InsertError, e.to_string()))?;
    item.set_status(ItemStatus::QrInserted);

    // Hash off the async dispatcher; the bytes travel through the closure.
    let (final_pdf, file_hash) = tokio::task::spawn_blocking(move || {
        let hash = hex::encode(Sha256::digest(&final_pdf));
        (final_pdf, hash)
    })
    .await
    .map_err(|e| {
        StageFailure::new(Stage::Orchestration, ErrorCode::StoreError, e.to_string())
    })?;

    let file_name = format!("{}.pdf", safe_file_stem(&item.serial_code));
    write_scratch(deps, item.item_id, &file_name, &final_pdf)
        .await
        .map_err(|e| StageFailure::new(Stage::Upload, ErrorCode::UploadError, e))?;

    item.set_status(ItemStatus::Uploading);
    let file_size = final_pdf.len() as u64;
    let stored = deps
        .gateway
        .upload(UploadRequest {
            file_name: file_name.clone(),
            mime_type: "application/pdf".to_string(),
            user_id: item.user_id,
            is_public: item.is_public,
            content: final_pdf,
        })
        .await
        .map_err(|e| StageFailure::new(Stage::Upload, ErrorCode::UploadError, e.to_string()))?;

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    item.complete(ItemArtifact {
        file_id: stored.file_id,
        file_name: stored.file_name,
        file_size: stored.file_size.unwrap_or(file_size),
        file_hash,
        mime_type: stored.mime_type,
        is_public: item.is_public,
        download_url: stored.download_url,
        created_at: stored.created_at,
        processing_time_ms: elapsed_ms,
    });
    tracing::info!(
        item_id = %item.item_id,
        serial_code = %item.serial_code,
        elapsed_ms,
        "item completed"
    );
    Ok(())
}

fn download_failure(error: TemplateError) -> StageFailure {
    StageFailure::new(Stage::Download, ErrorCode::DownloadError, error.to_string())
}

async fn write_scratch(
    deps: &PipelineDeps,
    item_id: Uuid,
    file_name: &str,
    bytes: &[u8],
) -> Result<(), String> {
    let dir = deps.scratch_dir.join(item_id.to_string());
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| format!("scratch dir: {e}"))?;
    tokio::fs::write(dir.join(file_name), bytes)
        .await
        .map_err(|e| format!("scratch write: {e}"))
}

async fn cleanup_scratch(deps: &PipelineDeps, item_id: Uuid) {
    let dir = deps.scratch_dir.join(item_id.to_string());
    if let Err(error) = tokio::fs::remove_dir_all(&dir).await {
        if error.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(item_id = %item_id, %error, "scratch cleanup failed");
        }
    }
}

/// Restrict a serial code to filesystem-safe characters.
///
/// Runs of anything outside `[A-Za-z0-9._-]` collapse to a single `_`;
/// an empty result falls back to `certificate`.
fn safe_file_stem(serial_code: &str) -> String {
    let mut out = String::with_capacity(serial_code.len());
    let mut last_was_sub = false;
    for c in serial_code.trim().chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
            last_was_sub = false;
        } else if !last_was_sub {
            out.push('_');
            last_was_sub = true;
        }
    }
    let trimmed = out.trim_matches(|c| matches!(c, '.' | '_' | '-'));
    if trimmed.is_empty() {
        "certificate".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{
        GatewayError, QrError, RenderError, StampError, StoredFile,
    };
    use crate::request::{Placeholder, QrConfig, QrPlacement};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeGateway {
        template: Option<Vec<u8>>,
        upload_ok: bool,
        uploads: AtomicUsize,
    }

    impl FakeGateway {
        fn good() -> Self {
            Self {
                template: Some(b"%PDF-1.5 template".to_vec()),
                upload_ok: true,
                uploads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl FileGateway for FakeGateway {
        async fn download(&self, _file_id: Uuid) -> Result<Vec<u8>, GatewayError> {
            self.template
                .clone()
                .ok_or_else(|| GatewayError::status(404, "no such template"))
        }

        async fn upload(&self, request: UploadRequest) -> Result<StoredFile, GatewayError> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if !self.upload_ok {
                return Err(GatewayError::status(503, "unavailable"));
            }
            Ok(StoredFile {
                file_id: "stored-1".to_string(),
                file_name: request.file_name,
                file_size: Some(request.content.len() as u64),
                mime_type: request.mime_type,
                download_url: Some("https://files.example/stored-1".to_string()),
                created_at: Utc::now(),
            })
        }
    }

    struct StubRenderer {
        render_ok: bool,
        stamp_checks_placement: bool,
    }

    #[async_trait]
    impl PdfRenderer for StubRenderer {
        async fn render(
            &self,
            template: &[u8],
            _placeholders: &[Placeholder],
        ) -> Result<Vec<u8>, RenderError> {
            if self.render_ok {
                Ok([template, b" rendered"].concat())
            } else {
                Err(RenderError::invalid_pdf("garbage"))
            }
        }

        async fn stamp(
            &self,
            pdf: &[u8],
            _qr_png: &[u8],
            placement: &QrPlacement,
        ) -> Result<Vec<u8>, StampError> {
            if self.stamp_checks_placement && placement.rect.is_none() {
                return Err(StampError::PortraitRectRequired);
            }
            Ok([pdf, b" stamped"].concat())
        }
    }

    struct StubQr;

    #[async_trait]
    impl QrGenerator for StubQr {
        async fn generate(&self, base_url: &str, verify_code: &str) -> Result<Vec<u8>, QrError> {
            if base_url.trim().is_empty() {
                return Err(QrError::EmptyBaseUrl);
            }
            if verify_code.trim().is_empty() {
                return Err(QrError::EmptyVerifyCode);
            }
            Ok(b"\x89PNG qr".to_vec())
        }
    }

    fn deps(
        gateway: Arc<FakeGateway>,
        renderer: StubRenderer,
        scratch: &std::path::Path,
        cache_dir: &std::path::Path,
    ) -> PipelineDeps {
        let gateway: Arc<dyn FileGateway> = gateway;
        PipelineDeps {
            templates: Arc::new(TemplateCache::new(
                Arc::clone(&gateway),
                cache_dir.to_path_buf(),
                Duration::from_secs(86_400),
            )),
            renderer: Arc::new(renderer),
            qr: Arc::new(StubQr),
            gateway,
            scratch_dir: scratch.to_path_buf(),
        }
    }

    fn item() -> BatchItem {
        BatchItem {
            item_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            template_id: Uuid::new_v4(),
            serial_code: "CERT-7".to_string(),
            is_public: true,
            placeholders: vec![Placeholder {
                key: "nombre".to_string(),
                value: "ANA".to_string(),
            }],
            qr: QrConfig {
                base_url: "https://v.example".to_string(),
                verify_code: "CERT-7".to_string(),
            },
            placement: QrPlacement::default(),
            status: ItemStatus::Pending,
            progress_pct: 0,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn happy_path_completes_with_artifact() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let gateway = Arc::new(FakeGateway::good());
        let deps = deps(
            Arc::clone(&gateway),
            StubRenderer {
                render_ok: true,
                stamp_checks_placement: false,
            },
            scratch.path(),
            cache.path(),
        );
        let mut item = item();
        run_item(&deps, &mut item).await;

        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.progress_pct, 100);
        let artifact = item.result.expect("artifact");
        assert_eq!(artifact.file_name, "CERT-7.pdf");
        assert_eq!(artifact.file_hash.len(), 64);
        assert_eq!(gateway.uploads.load(Ordering::SeqCst), 1);
        // Scratch directory is gone.
        assert!(!scratch.path().join(item.item_id.to_string()).exists());
    }

    #[tokio::test]
    async fn hash_matches_uploaded_bytes() {
        // The stub renderer is deterministic, so the hash is reproducible.
        let scratch = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let gateway = Arc::new(FakeGateway::good());
        let deps = deps(
            Arc::clone(&gateway),
            StubRenderer {
                render_ok: true,
                stamp_checks_placement: false,
            },
            scratch.path(),
            cache.path(),
        );
        let mut item = item();
        run_item(&deps, &mut item).await;
        let expected = hex::encode(Sha256::digest(b"%PDF-1.5 template rendered stamped"));
        assert_eq!(item.result.unwrap().file_hash, expected);
    }

    #[tokio::test]
    async fn missing_template_fails_at_download() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let gateway = Arc::new(FakeGateway {
            template: None,
            ..FakeGateway::good()
        });
        let deps = deps(
            gateway,
            StubRenderer {
                render_ok: true,
                stamp_checks_placement: false,
            },
            scratch.path(),
            cache.path(),
        );
        let mut item = item();
        run_item(&deps, &mut item).await;

        assert_eq!(item.status, ItemStatus::Failed);
        let err = item.error.expect("error");
        assert_eq!(err.stage, Stage::Download);
        assert_eq!(err.code, Some(ErrorCode::DownloadError));
        assert_eq!(err.user_id, item.user_id);
    }

    #[tokio::test]
    async fn render_fault_is_attributed_to_render() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let deps = deps(
            Arc::new(FakeGateway::good()),
            StubRenderer {
                render_ok: false,
                stamp_checks_placement: false,
            },
            scratch.path(),
            cache.path(),
        );
        let mut item = item();
        run_item(&deps, &mut item).await;
        assert_eq!(item.error.unwrap().stage, Stage::Render);
        // Failure before rendering completed keeps the reached progress.
        assert_eq!(item.progress_pct, 30);
    }

    #[tokio::test]
    async fn empty_qr_inputs_fail_at_qr_generation() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let deps = deps(
            Arc::new(FakeGateway::good()),
            StubRenderer {
                render_ok: true,
                stamp_checks_placement: false,
            },
            scratch.path(),
            cache.path(),
        );
        let mut item = item();
        item.qr.base_url = String::new();
        run_item(&deps, &mut item).await;
        let err = item.error.expect("error");
        assert_eq!(err.stage, Stage::QrGeneration);
        assert_eq!(err.code, Some(ErrorCode::QrError));
    }

    #[tokio::test]
    async fn portrait_without_rect_fails_at_insertion() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let gateway = Arc::new(FakeGateway::good());
        let deps = deps(
            Arc::clone(&gateway),
            StubRenderer {
                render_ok: true,
                stamp_checks_placement: true,
            },
            scratch.path(),
            cache.path(),
        );
        let mut item = item();
        run_item(&deps, &mut item).await;
        let err = item.error.expect("error");
        assert_eq!(err.stage, Stage::QrInsertion);
        assert_eq!(err.code, Some(ErrorCode::InsertError));
        // No upload happened.
        assert_eq!(gateway.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upload_rejection_fails_at_upload() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let deps = deps(
            Arc::new(FakeGateway {
                upload_ok: false,
                ..FakeGateway::good()
            }),
            StubRenderer {
                render_ok: true,
                stamp_checks_placement: false,
            },
            scratch.path(),
            cache.path(),
        );
        let mut item = item();
        run_item(&deps, &mut item).await;
        let err = item.error.expect("error");
        assert_eq!(err.stage, Stage::Upload);
        assert_eq!(err.code, Some(ErrorCode::UploadError));
        assert_eq!(item.progress_pct, 90);
    }

    #[tokio::test]
    async fn pre_failed_items_pass_through() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let gateway = Arc::new(FakeGateway::good());
        let deps = deps(
            Arc::clone(&gateway),
            StubRenderer {
                render_ok: true,
                stamp_checks_placement: false,
            },
            scratch.path(),
            cache.path(),
        );
        let mut item = item();
        item.fail(Stage::QrInsertion, Some(ErrorCode::InsertError), "bad rect");
        run_item(&deps, &mut item).await;
        assert_eq!(gateway.uploads.load(Ordering::SeqCst), 0);
        assert_eq!(item.error.unwrap().message, "bad rect");
    }

    #[test]
    fn safe_file_stem_collapses_hostile_input() {
        assert_eq!(safe_file_stem("CERT-7"), "CERT-7");
        assert_eq!(safe_file_stem("a/b\\c d"), "a_b_c_d");
        assert_eq!(safe_file_stem("  ../..  "), "certificate");
        assert_eq!(safe_file_stem(""), "certificate");
    }
}
