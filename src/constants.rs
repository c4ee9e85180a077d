//! Application-wide constants
//!
//! This module contains all constant values used throughout the worker.
//! Constants are grouped by their purpose for better organization.

// =============================================================================
// DATABASE DEFAULTS
// =============================================================================

/// Default maximum database connections in the pool
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

// =============================================================================
// QUEUE DEFAULTS
// =============================================================================

/// Redis stream carrying execution jobs
pub const DEFAULT_JOB_STREAM: &str = "execution_queue";

/// Consumer group shared by all execution workers
pub const DEFAULT_CONSUMER_GROUP: &str = "execution_workers";

/// Maximum delivery attempts before a message is dead-lettered
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds)
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 2000;

/// Pending messages idle longer than this are reclaimed from crashed consumers
pub const DEFAULT_CLAIM_IDLE_MS: u64 = 60_000;

/// Lifetime of an enqueue deduplication key (in seconds)
pub const DEFAULT_DEDUPE_TTL_SECS: u64 = 3600;

/// How long a blocking stream read waits for new messages (in milliseconds)
pub const QUEUE_BLOCK_MS: u64 = 5000;

/// Maximum number of delayed retries promoted per poll
pub const DELAYED_PROMOTION_BATCH: usize = 16;

// =============================================================================
// SANDBOX DEFAULTS
// =============================================================================

/// Default memory ceiling for a sandbox (256 MiB)
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 256 * 1024 * 1024;

/// Default CPU ceiling (number of cores)
pub const DEFAULT_CPU_LIMIT: f64 = 1.0;

/// Default wall-clock ceiling for contained execution (in seconds)
pub const DEFAULT_SANDBOX_TIMEOUT_SECS: u64 = 10;

/// Default process ceiling inside the sandbox (fork-bomb guard)
pub const DEFAULT_PIDS_LIMIT: i64 = 64;

/// Default ceiling on captured stdout plus stderr (1 MiB)
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1024 * 1024;

/// Default location of the bundled runner script
pub const DEFAULT_RUNNER_SCRIPT_PATH: &str = "assets/runner.sh";

/// Mount point of the job workspace inside the sandbox
pub const SANDBOX_MOUNT_PATH: &str = "/sandbox";

/// File name of the runner script inside the workspace
pub const RUNNER_SCRIPT_NAME: &str = "runner.sh";

/// File name of the stdin fixture inside the workspace
pub const INPUT_FILE_NAME: &str = "input.txt";

/// Prefix of per-job workspace directories
pub const WORKSPACE_PREFIX: &str = "job-";

/// Prefix of sandbox container names
pub const CONTAINER_NAME_PREFIX: &str = "codejudge-";

/// Label attached to every sandbox container; its value is the workspace name
pub const CONTAINER_LABEL: &str = "codejudge.sandbox";

// =============================================================================
// EXIT CODES
// =============================================================================

/// Exit code recorded for a program killed at the wall-clock ceiling
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Error message recorded for a program killed at the wall-clock ceiling
pub const TIMEOUT_ERROR_MESSAGE: &str = "Execution timeout";

/// Notice appended to stderr when captured output hit the ceiling
pub const OUTPUT_TRUNCATED_MESSAGE: &str = "Output truncated";

// =============================================================================
// STORAGE DEFAULTS
// =============================================================================

/// Default root directory of the filesystem blob store
pub const DEFAULT_BLOB_STORE_ROOT: &str = "/data/blobs";

/// Default public base URL for upload handles
pub const DEFAULT_UPLOAD_BASE_URL: &str = "http://localhost:8080";

/// Default upload handle lifetime (5 minutes)
pub const DEFAULT_UPLOAD_EXPIRY_SECS: i64 = 300;

/// Blob buckets
pub mod buckets {
    /// Stdin fixtures (`.txt` uploads)
    pub const INPUTS: &str = "inputs";
    /// Submitted source files
    pub const SOURCES: &str = "sources";
    /// Published execution results
    pub const RESULTS: &str = "results";
}

// =============================================================================
// WORKER DEFAULTS
// =============================================================================

/// Default number of jobs a worker process runs concurrently
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;

/// Default port for the metrics endpoint
pub const DEFAULT_METRICS_PORT: u16 = 9090;

/// Default tracing filter
pub const DEFAULT_LOG_FILTER: &str = "codejudge=debug,sqlx=warn";

// =============================================================================
// SUPPORTED LANGUAGES
// =============================================================================

/// Language identifiers
pub mod languages {
    pub const PYTHON: &str = "python";
    pub const C: &str = "c";
    pub const CPP: &str = "cpp";
    pub const JAVA: &str = "java";
    pub const JAVASCRIPT: &str = "javascript";
}

/// Container images for each language
pub mod container_images {
    pub const PYTHON: &str = "python:3.12-slim";
    pub const C: &str = "gcc:14";
    pub const CPP: &str = "gcc:14";
    pub const JAVA: &str = "eclipse-temurin:21-jdk";
    pub const JAVASCRIPT: &str = "node:20-slim";
}
