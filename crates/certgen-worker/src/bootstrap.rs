//! Worker bootstrap - the composition root.
//!
//! The ONLY place where infrastructure is wired together: Redis store,
//! NATS client and publisher, HTTP gateway, PDF and QR engines, all
//! assembled into a `ServiceCore`.

use std::sync::Arc;

use anyhow::{Context, Result};

use certgen_core::services::{CoreDeps, ServiceCore};
use certgen_gateway::HttpFileGateway;
use certgen_nats::NatsPublisher;
use certgen_pdf::LopdfRenderer;
use certgen_qr::LogoQrGenerator;
use certgen_redis::RedisJobStore;

use crate::settings::Settings;

/// Fully composed worker context.
pub struct WorkerContext {
    pub core: Arc<ServiceCore>,
    pub nats: async_nats::Client,
    pub settings: Settings,
}

/// Wire everything together.
pub async fn bootstrap(settings: Settings) -> Result<WorkerContext> {
    tokio::fs::create_dir_all(&settings.scratch_dir)
        .await
        .with_context(|| format!("creating scratch dir {}", settings.scratch_dir.display()))?;
    tokio::fs::create_dir_all(&settings.template_cache_dir)
        .await
        .with_context(|| {
            format!(
                "creating template cache dir {}",
                settings.template_cache_dir.display()
            )
        })?;

    let redis = certgen_redis::connect(&settings.redis_url)
        .await
        .context("connecting to redis")?;
    let store = Arc::new(RedisJobStore::new(
        redis,
        settings.redis_key_prefix.clone(),
        settings.job_ttl,
    ));

    let nats = certgen_nats::connect(&settings.nats_url)
        .await
        .context("connecting to nats")?;
    let publisher = Arc::new(NatsPublisher::new(nats.clone()));

    let gateway = Arc::new(
        HttpFileGateway::new(settings.gateway_config()).context("building gateway client")?,
    );
    let qr = Arc::new(LogoQrGenerator::new(settings.qr_logo_path.as_deref()));

    let core = Arc::new(ServiceCore::new(CoreDeps {
        store,
        gateway,
        renderer: Arc::new(LopdfRenderer),
        qr,
        publisher,
        config: settings.core_config(),
    }));

    tracing::info!(
        nats_url = %settings.nats_url,
        redis_prefix = %settings.redis_key_prefix,
        concurrency = settings.concurrency_per_batch,
        "worker wired"
    );

    Ok(WorkerContext {
        core,
        nats,
        settings,
    })
}
