//! `ServiceCore` - the engine's composition facade.
//!
//! Adapters construct a `ServiceCore` once at their composition root with
//! concrete port implementations and reach all functionality through it.
//! There is no module-level shared state: everything the engine touches is
//! injected here.

use std::sync::Arc;

use crate::config::CoreConfig;
use crate::ports::{EventPublisher, FileGateway, JobStore, PdfRenderer, QrGenerator};
use crate::services::orchestrator::Orchestrator;
use crate::services::pipeline::PipelineDeps;
use crate::services::plane::EventPlane;
use crate::services::template_cache::TemplateCache;

/// Concrete port implementations required to assemble the engine.
pub struct CoreDeps {
    pub store: Arc<dyn JobStore>,
    pub gateway: Arc<dyn FileGateway>,
    pub renderer: Arc<dyn PdfRenderer>,
    pub qr: Arc<dyn QrGenerator>,
    pub publisher: Arc<dyn EventPublisher>,
    pub config: CoreConfig,
}

/// The assembled engine.
pub struct ServiceCore {
    plane: Arc<EventPlane>,
    orchestrator: Arc<Orchestrator>,
    templates: Arc<TemplateCache>,
}

impl ServiceCore {
    /// Wire the engine from its dependencies.
    #[must_use]
    pub fn new(deps: CoreDeps) -> Self {
        let config = deps.config.clamped();
        let templates = Arc::new(TemplateCache::new(
            Arc::clone(&deps.gateway),
            config.template_cache_dir.clone(),
            config.template_cache_ttl,
        ));
        let pipeline = PipelineDeps {
            templates: Arc::clone(&templates),
            renderer: deps.renderer,
            qr: deps.qr,
            gateway: deps.gateway,
            scratch_dir: config.scratch_dir.clone(),
        };
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.publisher),
            pipeline,
            config,
        ));
        let plane = Arc::new(EventPlane::new(
            Arc::clone(&orchestrator),
            deps.store,
            deps.publisher,
        ));
        Self {
            plane,
            orchestrator,
            templates,
        }
    }

    /// Access the event plane.
    pub fn plane(&self) -> &Arc<EventPlane> {
        &self.plane
    }

    /// Access the orchestrator directly (tests, staged-layout workers).
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Access the template cache (invalidation hooks).
    pub fn templates(&self) -> &Arc<TemplateCache> {
        &self.templates
    }
}
