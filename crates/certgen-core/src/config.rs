//! Core runtime configuration.
//!
//! Pure value type handed to the orchestration engine at construction time.
//! Environment parsing lives in the worker binary; nothing here touches the
//! process environment.

use std::path::PathBuf;
use std::time::Duration;

/// Minimum job TTL the store will accept.
pub const MIN_JOB_TTL: Duration = Duration::from_secs(60);

/// Configuration consumed by the core engine.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// TTL applied to job records on every write.
    pub job_ttl: Duration,
    /// TTL for cached templates (memory and disk tiers).
    pub template_cache_ttl: Duration,
    /// Bounded per-batch item parallelism.
    pub concurrency_per_batch: usize,
    /// Scratch directory root; one subdirectory per in-flight item.
    pub scratch_dir: PathBuf,
    /// On-disk template cache directory.
    pub template_cache_dir: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            job_ttl: Duration::from_secs(3600),
            template_cache_ttl: Duration::from_secs(86_400),
            concurrency_per_batch: 4,
            scratch_dir: std::env::temp_dir().join("certgen"),
            template_cache_dir: PathBuf::from("./cache/templates"),
        }
    }
}

impl CoreConfig {
    /// Clamp out-of-range values to their documented minimums.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        if self.job_ttl < MIN_JOB_TTL {
            self.job_ttl = MIN_JOB_TTL;
        }
        if self.concurrency_per_batch == 0 {
            self.concurrency_per_batch = 1;
        }
        self
    }
}
