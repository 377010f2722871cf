//! Environment-backed settings.
//!
//! The worker is a daemon configured entirely by environment variables
//! (after an optional `.env` load). Parsing is pure over a key→value map
//! so defaults and validation are testable without touching the process
//! environment.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use certgen_core::config::CoreConfig;
use certgen_gateway::GatewayConfig;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

/// Fully parsed worker settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub job_ttl: Duration,
    pub template_cache_ttl: Duration,
    pub concurrency_per_batch: usize,
    pub download_timeout: Duration,
    pub upload_timeout: Duration,
    pub scratch_dir: PathBuf,
    pub template_cache_dir: PathBuf,
    pub qr_logo_path: Option<PathBuf>,

    pub gateway_base_url: String,
    pub gateway_access_key: String,
    pub gateway_secret_key: String,
    pub gateway_project_id: String,

    pub nats_url: String,
    pub redis_url: String,
    pub redis_key_prefix: String,

    pub log_level: String,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Parse settings from a key→value map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, SettingsError> {
        let job_ttl = duration_var(vars, "CERTGEN_JOB_TTL_SECONDS", 3600)?;
        let job_ttl = if job_ttl < Duration::from_secs(60) {
            tracing::warn!(
                configured = job_ttl.as_secs(),
                "job TTL below the 60s minimum, clamping"
            );
            Duration::from_secs(60)
        } else {
            job_ttl
        };

        let concurrency = int_var(vars, "CERTGEN_CONCURRENCY_PER_BATCH", 4)?;
        if concurrency == 0 {
            return Err(SettingsError::Invalid {
                name: "CERTGEN_CONCURRENCY_PER_BATCH",
                message: "must be a positive integer".to_string(),
            });
        }

        let log_level = optional(vars, "CERTGEN_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        validate_log_level(&log_level)?;

        Ok(Self {
            job_ttl,
            template_cache_ttl: duration_var(vars, "CERTGEN_TEMPLATE_CACHE_TTL_SECONDS", 86_400)?,
            concurrency_per_batch: concurrency,
            download_timeout: duration_var(vars, "CERTGEN_DOWNLOAD_TIMEOUT_SECONDS", 30)?,
            upload_timeout: duration_var(vars, "CERTGEN_UPLOAD_TIMEOUT_SECONDS", 60)?,
            scratch_dir: optional(vars, "CERTGEN_SCRATCH_DIR")
                .map_or_else(|| std::env::temp_dir().join("certgen"), PathBuf::from),
            template_cache_dir: optional(vars, "CERTGEN_TEMPLATE_CACHE_DIR")
                .map_or_else(|| PathBuf::from("./cache/templates"), PathBuf::from),
            qr_logo_path: optional(vars, "CERTGEN_QR_LOGO_PATH").map(PathBuf::from),
            gateway_base_url: required(vars, "GATEWAY_BASE_URL")?,
            gateway_access_key: required(vars, "GATEWAY_ACCESS_KEY")?,
            gateway_secret_key: required(vars, "GATEWAY_SECRET_KEY")?,
            gateway_project_id: required(vars, "GATEWAY_PROJECT_ID")?,
            nats_url: optional(vars, "NATS_URL")
                .unwrap_or_else(|| "nats://127.0.0.1:4222".to_string()),
            redis_url: optional(vars, "REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379/0".to_string()),
            redis_key_prefix: optional(vars, "REDIS_KEY_PREFIX")
                .unwrap_or_else(|| "certgen".to_string()),
            log_level,
        })
    }

    /// Tracing filter directive for the configured level.
    #[must_use]
    pub fn env_filter(&self) -> String {
        match self.log_level.as_str() {
            "warning" => "warn".to_string(),
            other => other.to_string(),
        }
    }

    #[must_use]
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            job_ttl: self.job_ttl,
            template_cache_ttl: self.template_cache_ttl,
            concurrency_per_batch: self.concurrency_per_batch,
            scratch_dir: self.scratch_dir.clone(),
            template_cache_dir: self.template_cache_dir.clone(),
        }
    }

    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.gateway_base_url.clone(),
            access_key: self.gateway_access_key.clone(),
            secret_key: self.gateway_secret_key.clone(),
            project_id: self.gateway_project_id.clone(),
            download_timeout: self.download_timeout,
            upload_timeout: self.upload_timeout,
        }
    }
}

fn optional(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(vars: &HashMap<String, String>, name: &'static str) -> Result<String, SettingsError> {
    optional(vars, name).ok_or(SettingsError::Missing(name))
}

fn int_var(
    vars: &HashMap<String, String>,
    name: &'static str,
    default: usize,
) -> Result<usize, SettingsError> {
    match optional(vars, name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| SettingsError::Invalid {
            name,
            message: format!("{raw:?} is not an integer"),
        }),
    }
}

fn duration_var(
    vars: &HashMap<String, String>,
    name: &'static str,
    default_secs: u64,
) -> Result<Duration, SettingsError> {
    match optional(vars, name) {
        None => Ok(Duration::from_secs(default_secs)),
        Some(raw) => raw
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| SettingsError::Invalid {
                name,
                message: format!("{raw:?} is not a number of seconds"),
            }),
    }
}

fn validate_log_level(level: &str) -> Result<(), SettingsError> {
    match level {
        "debug" | "info" | "warning" | "error" => Ok(()),
        other => Err(SettingsError::Invalid {
            name: "CERTGEN_LOG_LEVEL",
            message: format!("{other:?} is not one of debug|info|warning|error"),
        }),
    }
}
