//! QR code PNG generation.
//!
//! Renders the verification URL (`{base_url}?code={verify_code}`) at error
//! correction level H so a centered logo backplate can cover part of the
//! symbol without breaking scans. A configured-but-unreadable logo degrades
//! to a plain QR with a warning; it is never an error.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use qrcode::{Color, EcLevel, QrCode};

use certgen_core::ports::{QrError, QrGenerator};

/// Pixels per QR module.
const MODULE_PIXELS: u32 = 20;
/// Quiet-zone width in modules.
const QUIET_MODULES: u32 = 4;
/// Logo occupies at most this fraction of the symbol width.
const LOGO_RATIO: f64 = 0.25;
/// White backplate padding around the logo, in pixels.
const LOGO_PADDING: u32 = 10;

/// `QrGenerator` port implementation backed by the `qrcode` crate.
#[derive(Clone)]
pub struct LogoQrGenerator {
    logo: Arc<Option<DynamicImage>>,
}

impl LogoQrGenerator {
    /// Build a generator, loading the logo once if a path is configured.
    #[must_use]
    pub fn new(logo_path: Option<&Path>) -> Self {
        let logo = logo_path.and_then(|path| match image::open(path) {
            Ok(img) => {
                tracing::info!(path = %path.display(), "qr logo loaded");
                Some(img)
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "qr logo unavailable, continuing without it");
                None
            }
        });
        Self {
            logo: Arc::new(logo),
        }
    }

    /// Generator with no logo.
    #[must_use]
    pub fn plain() -> Self {
        Self {
            logo: Arc::new(None),
        }
    }

    fn render_png(&self, url: &str) -> Result<Vec<u8>, QrError> {
        let code = QrCode::with_error_correction_level(url.as_bytes(), EcLevel::H)
            .map_err(|e| QrError::encode(e.to_string()))?;
        let mut canvas = rasterize(&code);

        if let Some(logo) = self.logo.as_ref() {
            composite_logo(&mut canvas, logo);
        }

        let mut out = Vec::new();
        DynamicImage::ImageRgba8(canvas)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(|e| QrError::encode(e.to_string()))?;
        Ok(out)
    }
}

/// Paint the module matrix onto an RGBA canvas with a quiet zone.
fn rasterize(code: &QrCode) -> RgbaImage {
    let modules = code.width() as u32;
    let total = (modules + 2 * QUIET_MODULES) * MODULE_PIXELS;
    let mut canvas = RgbaImage::from_pixel(total, total, Rgba([255, 255, 255, 255]));

    let colors = code.to_colors();
    for (idx, color) in colors.iter().enumerate() {
        if *color != Color::Dark {
            continue;
        }
        let idx = idx as u32;
        let mx = idx % modules;
        let my = idx / modules;
        let px0 = (QUIET_MODULES + mx) * MODULE_PIXELS;
        let py0 = (QUIET_MODULES + my) * MODULE_PIXELS;
        for dy in 0..MODULE_PIXELS {
            for dx in 0..MODULE_PIXELS {
                canvas.put_pixel(px0 + dx, py0 + dy, Rgba([0, 0, 0, 255]));
            }
        }
    }
    canvas
}

/// Center the logo on a white backplate over the symbol.
fn composite_logo(canvas: &mut RgbaImage, logo: &DynamicImage) {
    let canvas_w = canvas.width();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let max_logo = ((f64::from(canvas_w) * LOGO_RATIO) as u32).max(1);
    let scaled = logo.thumbnail(max_logo, max_logo).to_rgba8();

    let plate_w = scaled.width() + 2 * LOGO_PADDING;
    let plate_h = scaled.height() + 2 * LOGO_PADDING;
    let mut plate = RgbaImage::from_pixel(plate_w, plate_h, Rgba([255, 255, 255, 255]));
    image::imageops::overlay(
        &mut plate,
        &scaled,
        i64::from(LOGO_PADDING),
        i64::from(LOGO_PADDING),
    );

    let x = i64::from(canvas_w.saturating_sub(plate_w) / 2);
    let y = i64::from(canvas.height().saturating_sub(plate_h) / 2);
    image::imageops::overlay(canvas, &plate, x, y);
}

fn build_url(base_url: &str, verify_code: &str) -> String {
    format!("{base_url}?code={verify_code}")
}

#[async_trait]
impl QrGenerator for LogoQrGenerator {
    async fn generate(&self, base_url: &str, verify_code: &str) -> Result<Vec<u8>, QrError> {
        let base_url = base_url.trim().to_string();
        let verify_code = verify_code.trim().to_string();
        if base_url.is_empty() {
            return Err(QrError::EmptyBaseUrl);
        }
        if verify_code.is_empty() {
            return Err(QrError::EmptyVerifyCode);
        }

        let url = build_url(&base_url, &verify_code);
        tracing::debug!(url = %url, "generating qr");
        let generator = self.clone();
        tokio::task::spawn_blocking(move || generator.render_png(&url))
            .await
            .map_err(|e| QrError::encode(format!("qr task aborted: {e}")))?
    }
}
