//! Sandbox engine seam
//!
//! The runner drives container lifecycles through this trait so the Docker
//! backend can be swapped for a scripted one in tests.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use super::EngineError;

/// Everything needed to create one single-use sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Unique container name
    pub name: String,
    /// Image with the language toolchain
    pub image: String,
    /// Host directory bound read-write at the sandbox mount path
    pub workspace: PathBuf,
    /// Entry point and arguments
    pub command: Vec<String>,
    pub memory_limit_bytes: u64,
    pub cpu_limit: f64,
    pub pids_limit: i64,
    pub labels: HashMap<String, String>,
}

/// Container lifecycle operations used by the sandbox runner
#[async_trait]
pub trait SandboxEngine: Send + Sync {
    /// Create a container without starting it; returns the container id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn start(&self, id: &str) -> Result<(), EngineError>;

    /// Block until the container exits; returns the process exit code.
    async fn wait(&self, id: &str) -> Result<i64, EngineError>;

    async fn kill(&self, id: &str) -> Result<(), EngineError>;

    /// Combined stdout/stderr in the frame format decoded by [`super::framing`].
    ///
    /// Backends may stop reading once more than `limit` payload bytes have
    /// been collected; the caller enforces the exact ceiling.
    async fn logs(&self, id: &str, limit: usize) -> Result<Vec<u8>, EngineError>;

    /// Peak memory in bytes, if the backend can report it.
    async fn peak_memory(&self, id: &str) -> Result<Option<u64>, EngineError>;

    /// Force-remove the container and its anonymous volumes.
    async fn remove(&self, id: &str) -> Result<(), EngineError>;
}
