//! Core domain and batch orchestration engine for the certgen service.
//!
//! This crate owns the domain model (batches, items, the failure taxonomy),
//! the wire DTOs, the port traits adapters implement, and the orchestration
//! services (template cache, item pipeline, batch orchestrator, event
//! plane). It has no transport or storage dependencies; those live in the
//! adapter crates and are injected through [`services::ServiceCore`].

pub mod batch;
pub mod config;
pub mod events;
pub mod ports;
pub mod request;
pub mod services;

pub use batch::{
    BatchItem, BatchJob, BatchStatus, ErrorCode, ItemArtifact, ItemError, ItemStatus, Stage,
};
pub use config::CoreConfig;
pub use request::{BatchRequest, ItemRequest, Placeholder, QrConfig, QrPlacement, QrRect};
