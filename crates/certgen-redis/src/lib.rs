//! Redis adapters for the job store, work queue and lock ports.
//!
//! Jobs are JSON blobs under `<prefix>:job:<internal_id>` with a TTL that
//! refreshes on every write; the external→internal mapping lives under
//! `<prefix>:ext:<external_id>` with NX semantics; queues are lists under
//! `<prefix>:queue:<name>`; locks are `SET NX EX` keys under
//! `<prefix>:lock:<key>`.
//!
//! Every non-blocking command runs under a 5 s deadline and is retried with
//! bounded exponential backoff (3 attempts, 100 ms base, 2 s cap).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use certgen_core::batch::{BatchJob, BatchStatus};
use certgen_core::ports::{JobStore, LockManager, QueueEntry, StoreError, WorkQueue};

const OP_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(2);

/// Open a managed connection (auto-reconnecting, cheap to clone).
pub async fn connect(url: &str) -> Result<ConnectionManager, StoreError> {
    let client = redis::Client::open(url).map_err(|e| StoreError::connection(e.to_string()))?;
    client
        .get_connection_manager()
        .await
        .map_err(|e| StoreError::connection(e.to_string()))
}

/// Retry a command with bounded backoff under a per-attempt deadline.
async fn with_retry<T, F, Fut>(op: &str, f: F) -> Result<T, StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, redis::RedisError>>,
{
    let mut last = StoreError::connection("no attempt made");
    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            let delay = BACKOFF_BASE * 2u32.pow(attempt - 1);
            tokio::time::sleep(delay.min(BACKOFF_CAP)).await;
        }
        match tokio::time::timeout(OP_TIMEOUT, f()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => {
                tracing::warn!(op, attempt, %error, "store command failed");
                last = StoreError::connection(error.to_string());
            }
            Err(_elapsed) => {
                tracing::warn!(op, attempt, "store command timed out");
                last = StoreError::timeout(OP_TIMEOUT.as_secs());
            }
        }
    }
    Err(last)
}

fn job_key(prefix: &str, internal_id: Uuid) -> String {
    format!("{prefix}:job:{internal_id}")
}

fn ext_key(prefix: &str, external_id: Uuid) -> String {
    format!("{prefix}:ext:{external_id}")
}

fn queue_key(prefix: &str, queue: &str) -> String {
    format!("{prefix}:queue:{queue}")
}

fn lock_key(prefix: &str, key: &str) -> String {
    format!("{prefix}:lock:{key}")
}

// ---------------------------------------------------------------------------
// Job store
// ---------------------------------------------------------------------------

/// Redis-backed [`JobStore`].
#[derive(Clone)]
pub struct RedisJobStore {
    conn: ConnectionManager,
    prefix: String,
    ttl: Duration,
}

impl RedisJobStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            ttl,
        }
    }

    fn job_key(&self, internal_id: Uuid) -> String {
        job_key(&self.prefix, internal_id)
    }

    fn ext_key(&self, external_id: Uuid) -> String {
        ext_key(&self.prefix, external_id)
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn save_job(&self, job: &BatchJob) -> Result<(), StoreError> {
        let payload =
            serde_json::to_string(job).map_err(|e| StoreError::encoding(e.to_string()))?;
        let key = self.job_key(job.internal_id);
        let ttl = self.ttl_secs();
        with_retry("save_job", || {
            let mut conn = self.conn.clone();
            let key = key.clone();
            let payload = payload.clone();
            async move {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(&payload)
                    .arg("EX")
                    .arg(ttl)
                    .query_async::<()>(&mut conn)
                    .await
            }
        })
        .await
    }

    async fn get_job(&self, internal_id: Uuid) -> Result<Option<BatchJob>, StoreError> {
        let key = self.job_key(internal_id);
        let raw: Option<String> = with_retry("get_job", || {
            let mut conn = self.conn.clone();
            let key = key.clone();
            async move {
                redis::cmd("GET")
                    .arg(&key)
                    .query_async::<Option<String>>(&mut conn)
                    .await
            }
        })
        .await?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| StoreError::encoding(e.to_string())))
            .transpose()
    }

    async fn exists(&self, internal_id: Uuid) -> Result<bool, StoreError> {
        let key = self.job_key(internal_id);
        with_retry("exists", || {
            let mut conn = self.conn.clone();
            let key = key.clone();
            async move {
                redis::cmd("EXISTS")
                    .arg(&key)
                    .query_async::<bool>(&mut conn)
                    .await
            }
        })
        .await
    }

    async fn update_status(
        &self,
        internal_id: Uuid,
        status: BatchStatus,
    ) -> Result<(), StoreError> {
        // Jobs are stored as one JSON blob; a single-field update is a
        // read-modify-write that keeps the remaining TTL.
        let Some(mut job) = self.get_job(internal_id).await? else {
            return Ok(());
        };
        job.status = status;
        let payload =
            serde_json::to_string(&job).map_err(|e| StoreError::encoding(e.to_string()))?;
        let key = self.job_key(internal_id);
        with_retry("update_status", || {
            let mut conn = self.conn.clone();
            let key = key.clone();
            let payload = payload.clone();
            async move {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(&payload)
                    .arg("KEEPTTL")
                    .query_async::<()>(&mut conn)
                    .await
            }
        })
        .await
    }

    async fn claim_external_id(
        &self,
        external_id: Uuid,
        internal_id: Uuid,
    ) -> Result<Option<Uuid>, StoreError> {
        let key = self.ext_key(external_id);
        let ttl = self.ttl_secs();
        let claimed: Option<String> = with_retry("claim_external_id", || {
            let mut conn = self.conn.clone();
            let key = key.clone();
            let value = internal_id.to_string();
            async move {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(&value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl)
                    .query_async::<Option<String>>(&mut conn)
                    .await
            }
        })
        .await?;
        if claimed.is_some() {
            return Ok(None);
        }
        self.lookup_external_id(external_id).await
    }

    async fn lookup_external_id(&self, external_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        let key = self.ext_key(external_id);
        let raw: Option<String> = with_retry("lookup_external_id", || {
            let mut conn = self.conn.clone();
            let key = key.clone();
            async move {
                redis::cmd("GET")
                    .arg(&key)
                    .query_async::<Option<String>>(&mut conn)
                    .await
            }
        })
        .await?;
        raw.map(|s| {
            Uuid::parse_str(&s)
                .map_err(|e| StoreError::encoding(format!("bad id mapping {s:?}: {e}")))
        })
        .transpose()
    }
}

// ---------------------------------------------------------------------------
// Work queue
// ---------------------------------------------------------------------------

/// Redis-backed [`WorkQueue`] (LPUSH producer, BRPOP consumer).
#[derive(Clone)]
pub struct RedisWorkQueue {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisWorkQueue {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    fn queue_key(&self, queue: &str) -> String {
        queue_key(&self.prefix, queue)
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn enqueue(&self, queue: &str, entry: &QueueEntry) -> Result<(), StoreError> {
        let payload =
            serde_json::to_string(entry).map_err(|e| StoreError::encoding(e.to_string()))?;
        let key = self.queue_key(queue);
        with_retry("enqueue", || {
            let mut conn = self.conn.clone();
            let key = key.clone();
            let payload = payload.clone();
            async move {
                redis::cmd("LPUSH")
                    .arg(&key)
                    .arg(&payload)
                    .query_async::<()>(&mut conn)
                    .await
            }
        })
        .await
    }

    async fn dequeue_blocking(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<QueueEntry>, StoreError> {
        // BRPOP blocks server-side; no client retry loop around it.
        let key = self.queue_key(queue);
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&key)
            .arg(timeout.as_secs_f64())
            .query_async::<Option<(String, String)>>(&mut conn)
            .await
            .map_err(|e| StoreError::connection(e.to_string()))?;
        popped
            .map(|(_, raw)| {
                serde_json::from_str(&raw).map_err(|e| StoreError::encoding(e.to_string()))
            })
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

/// Redis-backed [`LockManager`] (`SET NX EX`).
#[derive(Clone)]
pub struct RedisLockManager {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisLockManager {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    fn lock_key(&self, key: &str) -> String {
        lock_key(&self.prefix, key)
    }
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let key = self.lock_key(key);
        let ttl_secs = ttl.as_secs().max(1);
        let outcome: Option<String> = with_retry("acquire_lock", || {
            let mut conn = self.conn.clone();
            let key = key.clone();
            async move {
                redis::cmd("SET")
                    .arg(&key)
                    .arg("1")
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs)
                    .query_async::<Option<String>>(&mut conn)
                    .await
            }
        })
        .await?;
        Ok(outcome.is_some())
    }

    async fn release(&self, key: &str) -> Result<(), StoreError> {
        let key = self.lock_key(key);
        with_retry("release_lock", || {
            let mut conn = self.conn.clone();
            let key = key.clone();
            async move {
                redis::cmd("DEL")
                    .arg(&key)
                    .query_async::<()>(&mut conn)
                    .await
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests run without a server; command behavior against a live
    // Redis is exercised by deployment smoke checks.

    #[test]
    fn keys_are_namespaced() {
        let id = Uuid::parse_str("9f0c9f0a-54fd-4a9e-b5d6-6f4f4c4d9b01").unwrap();
        assert_eq!(
            job_key("certgen", id),
            "certgen:job:9f0c9f0a-54fd-4a9e-b5d6-6f4f4c4d9b01"
        );
        assert_eq!(
            ext_key("certgen", id),
            "certgen:ext:9f0c9f0a-54fd-4a9e-b5d6-6f4f4c4d9b01"
        );
        assert_eq!(queue_key("certgen", "download"), "certgen:queue:download");
        assert_eq!(lock_key("certgen", "tpl:x"), "certgen:lock:tpl:x");
    }

    #[test]
    fn queue_entries_survive_the_wire_format() {
        let entry = QueueEntry {
            batch_internal_id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
        };
        let raw = serde_json::to_string(&entry).unwrap();
        let parsed: QueueEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn backoff_is_bounded() {
        let delays: Vec<Duration> = (1..MAX_ATTEMPTS)
            .map(|attempt| (BACKOFF_BASE * 2u32.pow(attempt - 1)).min(BACKOFF_CAP))
            .collect();
        assert_eq!(delays, vec![Duration::from_millis(100), Duration::from_millis(200)]);
        assert!(delays.iter().all(|d| *d <= BACKOFF_CAP));
    }
}
