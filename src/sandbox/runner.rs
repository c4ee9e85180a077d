//! Sandbox runner - executes one untrusted program against one input
//!
//! `run` provisions a single-use workspace and container, races the program
//! against the wall-clock ceiling, captures its output and tears everything
//! down again on every exit path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::SandboxConfig;
use crate::constants::{
    CONTAINER_LABEL, CONTAINER_NAME_PREFIX, OUTPUT_TRUNCATED_MESSAGE, RUNNER_SCRIPT_NAME,
    SANDBOX_MOUNT_PATH, TIMEOUT_EXIT_CODE,
};
use crate::models::{ExecutionResult, Language};

use super::{
    engine::{ContainerSpec, SandboxEngine},
    framing,
    workspace::{self, Workspace},
    SandboxError,
};

/// Runs submissions inside isolated, resource-bounded containers
pub struct SandboxRunner {
    engine: Arc<dyn SandboxEngine>,
    config: SandboxConfig,
}

impl SandboxRunner {
    /// Create a new runner on top of a shared engine client
    pub fn new(engine: Arc<dyn SandboxEngine>, config: SandboxConfig) -> Self {
        Self { engine, config }
    }

    /// Check that the bundled runner script is present.
    ///
    /// Called once at startup: a missing asset is a deployment fault.
    pub async fn verify_assets(&self) -> Result<(), SandboxError> {
        self.locate_runner_script().await
    }

    /// Execute `source` (written as `file_name`) with `input` on stdin.
    ///
    /// A non-zero exit or stderr output is a normal result. Errors are
    /// reserved for requests that cannot run at all and for platform faults;
    /// see [`SandboxError::is_business_failure`].
    pub async fn run(
        &self,
        language: &str,
        source: &[u8],
        file_name: &str,
        input: &str,
    ) -> Result<ExecutionResult, SandboxError> {
        let language: Language = language
            .parse()
            .map_err(|_| SandboxError::UnsupportedLanguage(language.to_string()))?;

        if !workspace::is_valid_file_name(file_name) {
            return Err(SandboxError::InvalidFileName(file_name.to_string()));
        }

        self.locate_runner_script().await?;

        let workspace = Workspace::prepare(
            &self.config.workspace_root,
            file_name,
            source,
            input,
            &self.config.runner_script_path,
        )
        .await
        .map_err(SandboxError::Workspace)?;

        let spec = self.container_spec(language, file_name, &workspace);

        let result = match self.engine.create(&spec).await {
            Ok(container_id) => {
                tracing::debug!(
                    container_id = %container_id,
                    language = %language,
                    workspace = %workspace.path().display(),
                    "Sandbox provisioned"
                );
                let result = self.supervise(&container_id).await;
                self.remove_container(&container_id).await;
                result
            }
            Err(e) => Err(SandboxError::EnvironmentProvisioningFailed(e)),
        };

        remove_workspace(workspace);
        result
    }

    async fn locate_runner_script(&self) -> Result<(), SandboxError> {
        let path = &self.config.runner_script_path;
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(()),
            _ => Err(SandboxError::RunnerScriptMissing(path.clone())),
        }
    }

    fn container_spec(&self, language: Language, file_name: &str, workspace: &Workspace) -> ContainerSpec {
        let name = workspace.name();
        ContainerSpec {
            name: format!("{}{}", CONTAINER_NAME_PREFIX, name),
            image: language.image().to_string(),
            workspace: workspace.path().to_path_buf(),
            command: vec![
                "sh".to_string(),
                format!("{}/{}", SANDBOX_MOUNT_PATH, RUNNER_SCRIPT_NAME),
                language.as_str().to_string(),
                file_name.to_string(),
            ],
            memory_limit_bytes: self.config.memory_limit_bytes,
            cpu_limit: self.config.cpu_limit,
            pids_limit: self.config.pids_limit,
            labels: HashMap::from([(CONTAINER_LABEL.to_string(), name)]),
        }
    }

    /// Start the container and race it against the wall-clock ceiling.
    async fn supervise(&self, container_id: &str) -> Result<ExecutionResult, SandboxError> {
        self.engine
            .start(container_id)
            .await
            .map_err(SandboxError::EnvironmentProvisioningFailed)?;

        let started = Instant::now();
        let waited = tokio::time::timeout(self.config.timeout, self.engine.wait(container_id)).await;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        match waited {
            Ok(Ok(exit_code)) => {
                let logs = self
                    .engine
                    .logs(container_id, self.config.output_limit_bytes)
                    .await
                    .map_err(SandboxError::Engine)?;
                let mut result = self.capture(container_id, &logs).await;
                result.exit_code = i32::try_from(exit_code).unwrap_or(-1);
                result.execution_time_ms = execution_time_ms;
                Ok(result)
            }
            Ok(Err(e)) => Err(SandboxError::Engine(e)),
            Err(_) => {
                tracing::warn!(
                    container_id = %container_id,
                    limit_ms = self.config.timeout.as_millis() as u64,
                    "Execution timed out, killing sandbox"
                );
                if let Err(e) = self.engine.kill(container_id).await {
                    tracing::warn!(container_id = %container_id, error = %e, "Failed to kill sandbox");
                }

                let logs = self
                    .engine
                    .logs(container_id, self.config.output_limit_bytes)
                    .await;
                let logs = match logs {
                    Ok(logs) => logs,
                    Err(e) => {
                        tracing::debug!(container_id = %container_id, error = %e, "No logs after timeout");
                        Vec::new()
                    }
                };
                let mut partial = self.capture(container_id, &logs).await;
                partial.exit_code = TIMEOUT_EXIT_CODE;
                partial.execution_time_ms = execution_time_ms;

                Err(SandboxError::ExecutionTimeout {
                    limit: self.config.timeout,
                    partial: Box::new(partial),
                })
            }
        }
    }

    /// Demultiplex output and sample peak memory; neither step can fail the run.
    async fn capture(&self, container_id: &str, logs: &[u8]) -> ExecutionResult {
        let limit = self.config.output_limit_bytes;
        let output = framing::decode(logs, limit);
        if output.truncated {
            tracing::debug!(container_id = %container_id, "Discarded truncated trailing log frame");
        }

        let mut error = output.stderr_lossy();
        if output.capped {
            tracing::warn!(container_id = %container_id, limit, "Program output exceeded capture limit");
            if !error.is_empty() && !error.ends_with('\n') {
                error.push('\n');
            }
            error.push_str(&format!("{} at {} bytes", OUTPUT_TRUNCATED_MESSAGE, limit));
        }

        let memory_used_bytes = match self.engine.peak_memory(container_id).await {
            Ok(sample) => sample.unwrap_or(0),
            Err(e) => {
                tracing::debug!(container_id = %container_id, error = %e, "Memory sampling failed");
                0
            }
        };

        ExecutionResult {
            output: output.stdout_lossy(),
            error,
            exit_code: 0,
            execution_time_ms: 0,
            memory_used_bytes,
        }
    }

    async fn remove_container(&self, container_id: &str) {
        match self.engine.remove(container_id).await {
            Ok(()) => tracing::debug!(container_id = %container_id, "Sandbox removed"),
            Err(e) => tracing::error!(
                container_id = %container_id,
                error = %e,
                "Failed to remove sandbox container"
            ),
        }
    }
}

fn remove_workspace(workspace: Workspace) {
    let path = workspace.path().to_path_buf();
    if let Err(e) = workspace.close() {
        tracing::error!(workspace = %path.display(), error = %e, "Failed to remove workspace");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sandbox::framing::{encode_frame, StreamKind};
    use crate::test_utils::FakeEngine;

    struct Fixture {
        _assets: tempfile::TempDir,
        root: tempfile::TempDir,
        config: SandboxConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let assets = tempfile::tempdir().unwrap();
            let script = assets.path().join("runner.sh");
            std::fs::write(&script, "#!/bin/sh\n").unwrap();
            let root = tempfile::tempdir().unwrap();
            let config = SandboxConfig {
                runner_script_path: script,
                workspace_root: root.path().join("workspaces"),
                timeout: Duration::from_millis(200),
                ..SandboxConfig::default()
            };
            Self { _assets: assets, root, config }
        }

        fn runner(&self, engine: &Arc<FakeEngine>) -> SandboxRunner {
            SandboxRunner::new(engine.clone(), self.config.clone())
        }

        fn leftover_workspaces(&self) -> usize {
            std::fs::read_dir(self.root.path().join("workspaces"))
                .map(|entries| entries.count())
                .unwrap_or(0)
        }
    }

    fn frames(stdout: &str, stderr: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_frame(StreamKind::Stdout, stdout.as_bytes(), &mut buf);
        encode_frame(StreamKind::Stderr, stderr.as_bytes(), &mut buf);
        buf
    }

    #[tokio::test]
    async fn test_successful_run() {
        let fixture = Fixture::new();
        let engine = Arc::new(FakeEngine::new().with_logs(frames("hello\n", "")).with_memory(4096));
        let runner = fixture.runner(&engine);

        let result = runner
            .run("python", b"print(input())", "main.py", "hello")
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "hello\n");
        assert_eq!(result.error, "");
        assert_eq!(result.memory_used_bytes, 4096);
        assert_eq!(engine.created().len(), 1);
        assert_eq!(engine.live_containers(), 0);
        assert_eq!(fixture.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_container_spec() {
        let fixture = Fixture::new();
        let engine = Arc::new(FakeEngine::new());
        let runner = fixture.runner(&engine);

        runner.run("cpp", b"int main(){}", "main.cpp", "").await.unwrap();

        let spec = &engine.created()[0];
        assert_eq!(spec.image, "gcc:14");
        assert_eq!(spec.command, vec!["sh", "/sandbox/runner.sh", "cpp", "main.cpp"]);
        assert_eq!(spec.memory_limit_bytes, 256 * 1024 * 1024);
        assert_eq!(spec.cpu_limit, 1.0);
        assert!(spec.name.starts_with("codejudge-job-"));
        assert!(spec.labels.contains_key("codejudge.sandbox"));
        assert_eq!(
            engine.workspace_files()[0],
            vec!["input.txt", "main.cpp", "runner.sh"]
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_a_result() {
        let fixture = Fixture::new();
        let engine = Arc::new(
            FakeEngine::new()
                .with_exit_code(1)
                .with_logs(frames("", "Traceback: boom\n")),
        );
        let runner = fixture.runner(&engine);

        let result = runner
            .run("python", b"raise SystemExit(1)", "main.py", "")
            .await
            .unwrap();

        assert_eq!(result.exit_code, 1);
        assert!(result.error.contains("boom"));
        assert_eq!(engine.live_containers(), 0);
        assert_eq!(fixture.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_language_provisions_nothing() {
        let fixture = Fixture::new();
        let engine = Arc::new(FakeEngine::new());
        let runner = fixture.runner(&engine);

        let err = runner.run("cobol", b"DISPLAY 'HI'.", "main.cob", "").await.unwrap_err();

        assert!(matches!(err, SandboxError::UnsupportedLanguage(ref l) if l == "cobol"));
        assert!(engine.created().is_empty());
        assert!(!fixture.config.workspace_root.exists());
    }

    #[tokio::test]
    async fn test_invalid_file_name_provisions_nothing() {
        let fixture = Fixture::new();
        let engine = Arc::new(FakeEngine::new());
        let runner = fixture.runner(&engine);

        let err = runner.run("python", b"", "../evil.py", "").await.unwrap_err();

        assert!(matches!(err, SandboxError::InvalidFileName(_)));
        assert!(engine.created().is_empty());
        assert!(!fixture.config.workspace_root.exists());
    }

    #[tokio::test]
    async fn test_missing_runner_script() {
        let mut fixture = Fixture::new();
        fixture.config.runner_script_path = fixture.root.path().join("missing.sh");
        let engine = Arc::new(FakeEngine::new());
        let runner = fixture.runner(&engine);

        assert!(matches!(
            runner.verify_assets().await,
            Err(SandboxError::RunnerScriptMissing(_))
        ));
        let err = runner.run("python", b"", "main.py", "").await.unwrap_err();
        assert!(matches!(err, SandboxError::RunnerScriptMissing(_)));
        assert!(!err.is_business_failure());
        assert!(engine.created().is_empty());
        assert_eq!(fixture.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_timeout_kills_and_cleans_up() {
        let fixture = Fixture::new();
        let engine = Arc::new(FakeEngine::new().hanging().with_logs(frames("partial", "")));
        let runner = fixture.runner(&engine);

        let started = Instant::now();
        let err = runner
            .run("python", b"import time; time.sleep(60)", "main.py", "")
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            SandboxError::ExecutionTimeout { limit, partial } => {
                assert_eq!(limit, Duration::from_millis(200));
                assert_eq!(partial.exit_code, TIMEOUT_EXIT_CODE);
                assert_eq!(partial.output, "partial");
                assert!(partial.execution_time_ms >= 200);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(engine.killed().len(), 1);
        assert_eq!(engine.live_containers(), 0);
        assert_eq!(fixture.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_create_failure_cleans_workspace() {
        let fixture = Fixture::new();
        let engine = Arc::new(FakeEngine::new().failing_create());
        let runner = fixture.runner(&engine);

        let err = runner.run("python", b"", "main.py", "").await.unwrap_err();

        assert!(matches!(err, SandboxError::EnvironmentProvisioningFailed(_)));
        assert!(!err.is_business_failure());
        assert_eq!(fixture.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_start_failure_removes_container() {
        let fixture = Fixture::new();
        let engine = Arc::new(FakeEngine::new().failing_start());
        let runner = fixture.runner(&engine);

        let err = runner.run("java", b"", "Main.java", "").await.unwrap_err();

        assert!(matches!(err, SandboxError::EnvironmentProvisioningFailed(_)));
        assert_eq!(engine.created().len(), 1);
        assert_eq!(engine.live_containers(), 0);
        assert_eq!(fixture.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_lost_log_stream_is_an_engine_fault() {
        let fixture = Fixture::new();
        let engine = Arc::new(FakeEngine::new().failing_logs());
        let runner = fixture.runner(&engine);

        let err = runner.run("javascript", b"", "main.js", "").await.unwrap_err();

        assert!(matches!(err, SandboxError::Engine(_)));
        assert!(!err.is_business_failure());
        assert_eq!(engine.live_containers(), 0);
        assert_eq!(fixture.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let mut fixture = Fixture::new();
        fixture.config.output_limit_bytes = 16;
        let engine = Arc::new(FakeEngine::new().with_logs(frames(&"y\n".repeat(50), "late")));
        let runner = fixture.runner(&engine);

        let result = runner.run("python", b"while True: print('y')", "main.py", "").await.unwrap();

        assert_eq!(result.output, "y\n".repeat(8));
        assert_eq!(result.error, "Output truncated at 16 bytes");
        assert_eq!(engine.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_capture_failures_degrade_gracefully() {
        let fixture = Fixture::new();
        let mut logs = frames("kept", "");
        logs.extend_from_slice(&[1, 0, 0, 0, 0, 0, 1, 0, b'x']);
        let engine = Arc::new(FakeEngine::new().with_logs(logs).failing_stats());
        let runner = fixture.runner(&engine);

        let result = runner.run("c", b"int main(){}", "main.c", "").await.unwrap();

        assert_eq!(result.output, "kept");
        assert_eq!(result.memory_used_bytes, 0);
    }
}
