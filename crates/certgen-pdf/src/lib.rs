//! PDF edit engine for certgen.
//!
//! Implements the `PdfRenderer` port on top of `lopdf`: placeholder
//! redaction and rewriting ([`replace`]) and QR image stamping ([`stamp`]),
//! with positioned text extraction in [`text`].

pub mod geometry;
pub mod metrics;
pub mod replace;
mod renderer;
pub mod stamp;
pub mod text;

pub use renderer::LopdfRenderer;
