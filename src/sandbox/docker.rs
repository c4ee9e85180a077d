//! Docker-backed sandbox engine
//!
//! Each job gets a fresh container built from the language image, with the
//! job workspace bind-mounted read-write and every other resource locked
//! down: no network, capped memory (swap included), capped CPU, capped pids,
//! all capabilities dropped.

use async_trait::async_trait;
use bollard::{
    container::LogOutput,
    errors::Error as BollardError,
    models::{ContainerCreateBody, HostConfig},
    query_parameters::{
        CreateContainerOptionsBuilder, CreateImageOptionsBuilder, KillContainerOptions,
        LogsOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptions,
        StatsOptionsBuilder, WaitContainerOptions,
    },
    Docker, API_DEFAULT_VERSION,
};
use futures::StreamExt;

use crate::constants::SANDBOX_MOUNT_PATH;

use super::{
    engine::{ContainerSpec, SandboxEngine},
    framing::{self, StreamKind},
    EngineError,
};

/// Seconds before a Docker API request is abandoned
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// Sandbox engine talking to the Docker daemon.
///
/// The underlying client is cheap to clone and safe to share between
/// concurrently running jobs.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Wrap an existing client
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect to the daemon on `socket`, or the platform default when `None`
    pub fn connect(socket: Option<&str>) -> Result<Self, EngineError> {
        let docker = match socket {
            Some(path) => Docker::connect_with_socket(path, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)?,
            None => Docker::connect_with_local_defaults()?,
        };
        Ok(Self::new(docker))
    }

    /// Daemon version string; doubles as a connectivity check
    pub async fn version(&self) -> Result<String, EngineError> {
        let version = self.docker.version().await?;
        Ok(version.version.unwrap_or_default())
    }

    /// Pull `image` if it is not already present locally.
    ///
    /// Best-effort: a failed pull is logged and container creation reports
    /// the real error if the image is still missing.
    async fn ensure_image(&self, image: &str) {
        if self.docker.inspect_image(image).await.is_ok() {
            tracing::debug!(image = %image, "Docker image already present");
            return;
        }

        tracing::info!(image = %image, "Pulling Docker image");
        let options = CreateImageOptionsBuilder::default().from_image(image).build();
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(step) = progress.next().await {
            if let Err(e) = step {
                tracing::warn!(image = %image, error = %e, "docker pull failed");
                return;
            }
        }
        tracing::info!(image = %image, "Docker image pulled successfully");
    }
}

#[async_trait]
impl SandboxEngine for DockerEngine {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.ensure_image(&spec.image).await;

        let memory = i64::try_from(spec.memory_limit_bytes).unwrap_or(i64::MAX);
        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}:rw",
                spec.workspace.display(),
                SANDBOX_MOUNT_PATH
            )]),
            memory: Some(memory),
            memory_swap: Some(memory),
            nano_cpus: Some((spec.cpu_limit * 1_000_000_000.0) as i64),
            network_mode: Some("none".to_string()),
            pids_limit: Some(spec.pids_limit),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            ..Default::default()
        };

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some(SANDBOX_MOUNT_PATH.to_string()),
            network_disabled: Some(true),
            tty: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            env: Some(vec!["LANG=C.UTF-8".to_string()]),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptionsBuilder::default()
            .name(&spec.name)
            .build();

        let container = self.docker.create_container(Some(options), body).await?;
        for warning in &container.warnings {
            tracing::warn!(container_id = %container.id, warning = %warning, "Container created with warning");
        }

        tracing::debug!(
            container_id = %container.id,
            image = %spec.image,
            workspace = %spec.workspace.display(),
            cmd = ?spec.command,
            "Created sandbox container"
        );

        Ok(container.id)
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await?;
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, EngineError> {
        let mut stream = self.docker.wait_container(id, None::<WaitContainerOptions>);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(EngineError(format!(
                "wait stream for container {} ended without a status",
                id
            ))),
        }
    }

    async fn kill(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .kill_container(id, None::<KillContainerOptions>)
            .await?;
        Ok(())
    }

    async fn logs(&self, id: &str, limit: usize) -> Result<Vec<u8>, EngineError> {
        let options = LogsOptionsBuilder::default()
            .stdout(true)
            .stderr(true)
            .follow(false)
            .build();

        // bollard splits the daemon's frames into typed chunks; re-frame them
        // so every backend hands the runner the same wire format
        let mut buf = Vec::new();
        // One byte past the limit lets the decoder tell that output was cut
        let mut remaining = limit.saturating_add(1);
        let mut stream = self.docker.logs(id, Some(options));
        while let Some(chunk) = stream.next().await {
            let (kind, message) = match chunk? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    (StreamKind::Stdout, message)
                }
                LogOutput::StdErr { message } => (StreamKind::Stderr, message),
                LogOutput::StdIn { .. } => continue,
            };
            let kept = &message[..message.len().min(remaining)];
            framing::encode_frame(kind, kept, &mut buf);
            remaining -= kept.len();
            if remaining == 0 {
                tracing::debug!(container_id = %id, limit, "Stopped reading logs at capture limit");
                break;
            }
        }

        Ok(buf)
    }

    async fn peak_memory(&self, id: &str) -> Result<Option<u64>, EngineError> {
        let options = StatsOptionsBuilder::default()
            .stream(false)
            .one_shot(true)
            .build();

        let mut stream = self.docker.stats(id, Some(options));
        match stream.next().await {
            Some(Ok(stats)) => Ok(stats
                .memory_stats
                .and_then(|memory| memory.max_usage.or(memory.usage))),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        let options = RemoveContainerOptionsBuilder::default()
            .force(true)
            .v(true)
            .build();

        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }
}
