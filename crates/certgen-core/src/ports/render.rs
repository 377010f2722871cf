//! PDF edit engine and QR generator ports.

use async_trait::async_trait;
use thiserror::Error;

use crate::request::{Placeholder, QrPlacement};

/// Errors from the placeholder replacement engine.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// Template bytes are not parseable as a PDF.
    #[error("template is not a valid PDF: {message}")]
    InvalidPdf { message: String },

    /// The replacement engine itself faulted.
    #[error("placeholder engine failed: {message}")]
    Engine { message: String },
}

impl RenderError {
    pub fn invalid_pdf(message: impl Into<String>) -> Self {
        Self::InvalidPdf {
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }
}

/// Errors from the QR stamping engine.
#[derive(Debug, Clone, Error)]
pub enum StampError {
    #[error("document is not a valid PDF: {message}")]
    InvalidPdf { message: String },

    /// The requested page does not exist.
    #[error("page {page} out of range: document has {count} pages")]
    PageOutOfRange { page: usize, count: usize },

    /// Portrait pages need an explicit rectangle.
    #[error("an explicit qr_rect is required for portrait pages")]
    PortraitRectRequired,

    /// The QR image could not be decoded or embedded.
    #[error("qr image could not be embedded: {message}")]
    Image { message: String },

    /// The stamping engine itself faulted.
    #[error("stamp engine failed: {message}")]
    Engine { message: String },
}

impl StampError {
    pub fn invalid_pdf(message: impl Into<String>) -> Self {
        Self::InvalidPdf {
            message: message.into(),
        }
    }

    pub fn image(message: impl Into<String>) -> Self {
        Self::Image {
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }
}

/// Errors from QR PNG generation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QrError {
    #[error("qr base_url is required")]
    EmptyBaseUrl,

    #[error("qr verify_code is required")]
    EmptyVerifyCode,

    #[error("qr encoding failed: {message}")]
    Encode { message: String },
}

impl QrError {
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }
}

/// The PDF edit engine: placeholder redaction and image stamping.
///
/// Both operations are pure byte transformations; implementations run the
/// CPU-bound work off the async dispatcher.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    /// Replace `{{key}}` tokens in the template and return the new PDF.
    async fn render(
        &self,
        template: &[u8],
        placeholders: &[Placeholder],
    ) -> Result<Vec<u8>, RenderError>;

    /// Stamp the QR PNG onto the document per the placement rules.
    async fn stamp(
        &self,
        pdf: &[u8],
        qr_png: &[u8],
        placement: &QrPlacement,
    ) -> Result<Vec<u8>, StampError>;
}

/// QR PNG generator with optional logo compositing.
#[async_trait]
pub trait QrGenerator: Send + Sync {
    async fn generate(&self, base_url: &str, verify_code: &str) -> Result<Vec<u8>, QrError>;
}
