//! certgen worker daemon.
//!
//! Subscribes to the batch-request and status-query subjects, hands
//! messages to the event plane, and publishes replies. Shutdown is
//! cooperative: on SIGINT/SIGTERM the subscribers are drained and in-flight
//! batches run to completion before the process exits.

mod bootstrap;
mod settings;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use certgen_core::events::subjects;
use certgen_core::ports::EventPublisher;
use certgen_nats::{NatsPublisher, Subscription};

use bootstrap::{bootstrap, WorkerContext};
use settings::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::from_env().context("loading settings")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.env_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let ctx = bootstrap(settings).await?;
    run(ctx).await
}

async fn run(ctx: WorkerContext) -> Result<()> {
    let mut batch_sub = Subscription::subscribe(&ctx.nats, subjects::BATCH_REQUESTED)
        .await
        .context("subscribing to batch requests")?;
    let mut status_sub = Subscription::subscribe(&ctx.nats, subjects::JOB_STATUS_REQUESTED)
        .await
        .context("subscribing to status queries")?;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let reply_publisher = NatsPublisher::new(ctx.nats.clone());
    let mut handlers: JoinSet<()> = JoinSet::new();

    tracing::info!(
        batch_subject = batch_sub.subject(),
        status_subject = status_sub.subject(),
        "worker listening"
    );

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,

            Some(message) = batch_sub.next() => {
                let plane = ctx.core.plane().clone();
                handlers.spawn(async move {
                    plane.handle_batch_request(&message.payload).await;
                });
            }

            Some(message) = status_sub.next() => {
                let plane = ctx.core.plane().clone();
                let publisher = reply_publisher.clone();
                handlers.spawn(async move {
                    let reply = plane.handle_status_request(&message.payload).await;
                    let subject = message
                        .reply
                        .as_deref()
                        .unwrap_or(subjects::JOB_STATUS_RESPONSE);
                    if let Err(error) = publisher.publish(subject, &reply).await {
                        tracing::warn!(subject, %error, "status reply publish failed");
                    }
                });
            }

            else => break,
        }
    }

    tracing::info!("shutdown requested, draining in-flight batches");
    batch_sub.unsubscribe().await;
    status_sub.unsubscribe().await;
    while let Some(joined) = handlers.join_next().await {
        if let Err(error) = joined {
            tracing::error!(%error, "handler task aborted during drain");
        }
    }
    ctx.nats.flush().await.ok();
    tracing::info!("worker stopped");
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(term) => term,
                Err(error) => {
                    tracing::error!(%error, "SIGTERM handler unavailable");
                    ctrl_c.await.ok();
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        shutdown.cancel();
    });
}
