//! Worker configuration management
//!
//! This module handles loading and validating configuration from environment variables.
//! Configuration is loaded once in `main` and handed to each component explicitly.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BLOB_STORE_ROOT, DEFAULT_CLAIM_IDLE_MS, DEFAULT_CONSUMER_GROUP, DEFAULT_CPU_LIMIT,
    DEFAULT_DATABASE_MAX_CONNECTIONS, DEFAULT_DEDUPE_TTL_SECS, DEFAULT_JOB_STREAM,
    DEFAULT_LOG_FILTER, DEFAULT_MAX_ATTEMPTS, DEFAULT_MEMORY_LIMIT_BYTES, DEFAULT_METRICS_PORT,
    DEFAULT_OUTPUT_LIMIT_BYTES, DEFAULT_PIDS_LIMIT, DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RUNNER_SCRIPT_PATH,
    DEFAULT_SANDBOX_TIMEOUT_SECS, DEFAULT_UPLOAD_BASE_URL, DEFAULT_UPLOAD_EXPIRY_SECS,
    DEFAULT_WORKER_CONCURRENCY,
};

/// Main worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub queue: QueueConfig,
    pub sandbox: SandboxConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Redis configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

/// Job queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Stream name for execution jobs
    pub stream: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Consumer name (unique per instance)
    pub consumer_name: String,
    /// Delivery attempts before dead-lettering
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt
    pub retry_base_delay_ms: u64,
    /// Idle time after which another consumer's pending message is reclaimed
    pub claim_idle_ms: u64,
    /// Lifetime of enqueue deduplication keys
    pub dedupe_ttl_secs: u64,
}

/// Sandbox resource ceilings and asset locations
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Runner script bundled with the worker deployment
    pub runner_script_path: PathBuf,
    /// Directory under which per-job workspaces are created
    pub workspace_root: PathBuf,
    /// Memory ceiling in bytes (swap is capped at the same value)
    pub memory_limit_bytes: u64,
    /// CPU ceiling in cores
    pub cpu_limit: f64,
    /// Wall-clock ceiling for the contained process
    pub timeout: Duration,
    /// Maximum number of processes inside the sandbox
    pub pids_limit: i64,
    /// Captured stdout plus stderr beyond this many bytes is discarded
    pub output_limit_bytes: usize,
    /// Docker daemon socket; platform default when unset
    pub docker_socket: Option<String>,
}

/// Blob store configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub upload_base_url: String,
    pub signing_secret: String,
    pub upload_expiry_secs: i64,
}

/// Worker process configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs processed concurrently by this process
    pub concurrency: usize,
    pub metrics_port: u16,
    pub rust_log: String,
    pub json_logs: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database: DatabaseConfig::from_env()?,
            redis: RedisConfig::from_env()?,
            queue: QueueConfig::from_env()?,
            sandbox: SandboxConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            worker: WorkerConfig::from_env()?,
        })
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL".to_string()))?,
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS)?,
        })
    }
}

impl RedisConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        })
    }
}

impl QueueConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let max_attempts = parse_var("MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue("MAX_ATTEMPTS".to_string()));
        }

        Ok(Self {
            stream: env::var("JOB_STREAM").unwrap_or_else(|_| DEFAULT_JOB_STREAM.to_string()),
            consumer_group: env::var("CONSUMER_GROUP")
                .unwrap_or_else(|_| DEFAULT_CONSUMER_GROUP.to_string()),
            consumer_name: env::var("CONSUMER_NAME")
                .unwrap_or_else(|_| format!("worker_{}", uuid::Uuid::new_v4())),
            max_attempts,
            retry_base_delay_ms: parse_var("RETRY_BASE_DELAY_MS", DEFAULT_RETRY_BASE_DELAY_MS)?,
            claim_idle_ms: parse_var("CLAIM_IDLE_MS", DEFAULT_CLAIM_IDLE_MS)?,
            dedupe_ttl_secs: parse_var("DEDUPE_TTL_SECS", DEFAULT_DEDUPE_TTL_SECS)?,
        })
    }
}

impl SandboxConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let cpu_limit: f64 = parse_var("SANDBOX_CPU_LIMIT", DEFAULT_CPU_LIMIT)?;
        if cpu_limit <= 0.0 {
            return Err(ConfigError::InvalidValue("SANDBOX_CPU_LIMIT".to_string()));
        }

        Ok(Self {
            runner_script_path: PathBuf::from(
                env::var("RUNNER_SCRIPT_PATH").unwrap_or_else(|_| DEFAULT_RUNNER_SCRIPT_PATH.to_string()),
            ),
            workspace_root: env::var("SANDBOX_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("codejudge")),
            memory_limit_bytes: parse_var("SANDBOX_MEMORY_LIMIT_BYTES", DEFAULT_MEMORY_LIMIT_BYTES)?,
            cpu_limit,
            timeout: Duration::from_secs(parse_var(
                "SANDBOX_TIMEOUT_SECS",
                DEFAULT_SANDBOX_TIMEOUT_SECS,
            )?),
            pids_limit: parse_var("SANDBOX_PIDS_LIMIT", DEFAULT_PIDS_LIMIT)?,
            output_limit_bytes: parse_var("SANDBOX_OUTPUT_LIMIT_BYTES", DEFAULT_OUTPUT_LIMIT_BYTES)?,
            docker_socket: env::var("DOCKER_SOCKET").ok(),
        })
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runner_script_path: PathBuf::from(DEFAULT_RUNNER_SCRIPT_PATH),
            workspace_root: env::temp_dir().join("codejudge"),
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            cpu_limit: DEFAULT_CPU_LIMIT,
            timeout: Duration::from_secs(DEFAULT_SANDBOX_TIMEOUT_SECS),
            pids_limit: DEFAULT_PIDS_LIMIT,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            docker_socket: None,
        }
    }
}

impl StorageConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            root: PathBuf::from(
                env::var("BLOB_STORE_ROOT").unwrap_or_else(|_| DEFAULT_BLOB_STORE_ROOT.to_string()),
            ),
            upload_base_url: env::var("UPLOAD_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_UPLOAD_BASE_URL.to_string()),
            signing_secret: env::var("UPLOAD_SIGNING_SECRET")
                .map_err(|_| ConfigError::Missing("UPLOAD_SIGNING_SECRET".to_string()))?,
            upload_expiry_secs: parse_var("UPLOAD_EXPIRY_SECS", DEFAULT_UPLOAD_EXPIRY_SECS)?,
        })
    }
}

impl WorkerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let concurrency = parse_var("WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY)?;
        if concurrency == 0 {
            return Err(ConfigError::InvalidValue("WORKER_CONCURRENCY".to_string()));
        }

        Ok(Self {
            concurrency,
            metrics_port: parse_var("METRICS_PORT", DEFAULT_METRICS_PORT)?,
            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
            json_logs: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}

/// Read an optional variable, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}
