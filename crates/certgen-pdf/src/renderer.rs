//! `PdfRenderer` port implementation.
//!
//! The engines are synchronous and CPU-bound; this wrapper offloads them to
//! the blocking pool so pipeline tasks never stall the async dispatcher.

use async_trait::async_trait;

use certgen_core::ports::{PdfRenderer, RenderError, StampError};
use certgen_core::request::{Placeholder, QrPlacement};

use crate::{replace, stamp};

/// lopdf-backed implementation of the PDF edit engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfRenderer;

#[async_trait]
impl PdfRenderer for LopdfRenderer {
    async fn render(
        &self,
        template: &[u8],
        placeholders: &[Placeholder],
    ) -> Result<Vec<u8>, RenderError> {
        let template = template.to_vec();
        let placeholders = placeholders.to_vec();
        tokio::task::spawn_blocking(move || replace::render(&template, &placeholders))
            .await
            .map_err(|e| RenderError::engine(format!("render task aborted: {e}")))?
    }

    async fn stamp(
        &self,
        pdf: &[u8],
        qr_png: &[u8],
        placement: &QrPlacement,
    ) -> Result<Vec<u8>, StampError> {
        let pdf = pdf.to_vec();
        let qr_png = qr_png.to_vec();
        let placement = placement.clone();
        tokio::task::spawn_blocking(move || stamp::stamp(&pdf, &qr_png, &placement))
            .await
            .map_err(|e| StampError::engine(format!("stamp task aborted: {e}")))?
    }
}
