//! Template cache: memory + disk tiers with single-flight downloads.
//!
//! Concurrent requests for the same template id coalesce into one gateway
//! download via a per-id lock map. Disk entries live at
//! `<cache_dir>/<template_id>.pdf`; the file mtime is the authoritative
//! timestamp for the disk tier. Expiry is lazy: an expired entry is evicted
//! on the next access to the same key.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ports::{FileGateway, GatewayError};

/// PDF files start with this magic.
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Error type for template fetches.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Downloaded bytes do not begin with the PDF magic header.
    #[error("template {template_id} is not a PDF document")]
    NotPdf { template_id: Uuid },
}

struct CachedTemplate {
    bytes: Arc<Vec<u8>>,
    cached_at: SystemTime,
}

impl CachedTemplate {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at
            .elapsed()
            .map_or(false, |age| age > ttl)
    }
}

/// Memory + disk cache of template bytes, keyed by template id.
pub struct TemplateCache {
    gateway: Arc<dyn FileGateway>,
    cache_dir: PathBuf,
    ttl: Duration,
    memory: Mutex<HashMap<Uuid, CachedTemplate>>,
    /// Per-template locks; lock order: `locks` map lock before per-id lock.
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TemplateCache {
    pub fn new(gateway: Arc<dyn FileGateway>, cache_dir: PathBuf, ttl: Duration) -> Self {
        Self {
            gateway,
            cache_dir,
            ttl,
            memory: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch template bytes: memory, then disk, then gateway.
    pub async fn get(&self, template_id: Uuid) -> Result<Arc<Vec<u8>>, TemplateError> {
        let lock = self.lock_for(template_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.get_locked(template_id).await
        };
        self.release_idle_lock(template_id, &lock).await;
        result
    }

    async fn get_locked(&self, template_id: Uuid) -> Result<Arc<Vec<u8>>, TemplateError> {
        if let Some(bytes) = self.memory_lookup(template_id).await {
            tracing::debug!(template_id = %template_id, size = bytes.len(), "template memory cache hit");
            return Ok(bytes);
        }

        if let Some(bytes) = self.disk_lookup(template_id).await {
            tracing::debug!(template_id = %template_id, size = bytes.len(), "template disk cache hit");
            return Ok(bytes);
        }

        tracing::info!(template_id = %template_id, "downloading template");
        let bytes = self.gateway.download(template_id).await?;
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(TemplateError::NotPdf { template_id });
        }

        let bytes = Arc::new(bytes);
        self.save_to_disk(template_id, &bytes).await;
        self.memory.lock().await.insert(
            template_id,
            CachedTemplate {
                bytes: Arc::clone(&bytes),
                cached_at: SystemTime::now(),
            },
        );
        tracing::info!(template_id = %template_id, size = bytes.len(), "template downloaded and cached");
        Ok(bytes)
    }

    /// Drop both tiers and the per-id lock for a template known to have
    /// changed externally.
    pub async fn invalidate(&self, template_id: Uuid) {
        self.memory.lock().await.remove(&template_id);
        let _ = tokio::fs::remove_file(self.disk_path(template_id)).await;
        self.locks.lock().await.remove(&template_id);
        tracing::debug!(template_id = %template_id, "template cache invalidated");
    }

    async fn lock_for(&self, template_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(template_id).or_default())
    }

    /// Drop the lock entry once no other task holds it, so the lock map
    /// drains back to empty between batches.
    async fn release_idle_lock(&self, template_id: Uuid, held: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(&template_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, held) && Arc::strong_count(entry) <= 2)
        {
            locks.remove(&template_id);
        }
    }

    async fn memory_lookup(&self, template_id: Uuid) -> Option<Arc<Vec<u8>>> {
        let mut memory = self.memory.lock().await;
        match memory.get(&template_id) {
            Some(entry) if !entry.is_expired(self.ttl) => Some(Arc::clone(&entry.bytes)),
            Some(_) => {
                memory.remove(&template_id);
                None
            }
            None => None,
        }
    }

    async fn disk_lookup(&self, template_id: Uuid) -> Option<Arc<Vec<u8>>> {
        let path = self.disk_path(template_id);
        let metadata = tokio::fs::metadata(&path).await.ok()?;
        let mtime = metadata.modified().ok()?;
        match mtime.elapsed() {
            Ok(age) if age > self.ttl => {
                let _ = tokio::fs::remove_file(&path).await;
                return None;
            }
            _ => {}
        }
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let bytes = Arc::new(bytes);
                self.memory.lock().await.insert(
                    template_id,
                    CachedTemplate {
                        bytes: Arc::clone(&bytes),
                        cached_at: mtime,
                    },
                );
                Some(bytes)
            }
            Err(error) => {
                tracing::warn!(template_id = %template_id, %error, "template disk cache read failed");
                None
            }
        }
    }

    /// Disk failures are non-fatal; the in-memory entry stays authoritative.
    async fn save_to_disk(&self, template_id: Uuid, bytes: &[u8]) {
        if let Err(error) = tokio::fs::create_dir_all(&self.cache_dir).await {
            tracing::warn!(%error, "template cache directory could not be created");
            return;
        }
        let tmp = self.cache_dir.join(format!("{template_id}.tmp"));
        let path = self.disk_path(template_id);
        if let Err(error) = tokio::fs::write(&tmp, bytes).await {
            tracing::warn!(template_id = %template_id, %error, "template disk cache write failed");
            return;
        }
        if let Err(error) = tokio::fs::rename(&tmp, &path).await {
            tracing::warn!(template_id = %template_id, %error, "template disk cache rename failed");
            let _ = tokio::fs::remove_file(&tmp).await;
        }
    }

    fn disk_path(&self, template_id: Uuid) -> PathBuf {
        self.cache_dir.join(format!("{template_id}.pdf"))
    }
}
