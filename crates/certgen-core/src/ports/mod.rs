//! Port definitions.
//!
//! Object-safe async traits that the core engine consumes and the adapter
//! crates implement. All DTOs and error types here are core-owned; no
//! adapter type leaks through these interfaces.

mod bus;
mod gateway;
mod render;
mod store;

pub use bus::{EventPublisher, PublishError};
pub use gateway::{FileGateway, GatewayError, StoredFile, UploadRequest};
pub use render::{PdfRenderer, QrError, QrGenerator, RenderError, StampError};
pub use store::{JobStore, LockManager, QueueEntry, StoreError, WorkQueue};
