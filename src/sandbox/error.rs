//! Sandbox error taxonomy

use std::path::PathBuf;
use std::time::Duration;

use crate::models::ExecutionResult;

/// Failure reported by a sandbox engine backend
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct EngineError(pub String);

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        EngineError(err.to_string())
    }
}

/// Errors raised by [`SandboxRunner::run`](super::SandboxRunner::run).
///
/// Ordinary program failure is never an error; the variants split into
/// business outcomes (`is_business_failure`) and infrastructure faults.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Invalid source file name: {0:?}")]
    InvalidFileName(String),

    #[error("Runner script not found at {}", .0.display())]
    RunnerScriptMissing(PathBuf),

    #[error("Failed to prepare workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("Failed to provision sandbox: {0}")]
    EnvironmentProvisioningFailed(#[source] EngineError),

    #[error("Sandbox engine failure: {0}")]
    Engine(#[source] EngineError),

    /// The program ran past the wall-clock ceiling and was killed.
    /// Carries whatever output was captured before termination.
    #[error("Execution timeout")]
    ExecutionTimeout {
        limit: Duration,
        partial: Box<ExecutionResult>,
    },
}

impl SandboxError {
    /// The submitted program (or request) is at fault, not the platform.
    /// Such failures are recorded as results and never retried.
    pub fn is_business_failure(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedLanguage(_) | Self::InvalidFileName(_) | Self::ExecutionTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_failures() {
        assert!(SandboxError::UnsupportedLanguage("cobol".into()).is_business_failure());
        assert!(SandboxError::InvalidFileName("..".into()).is_business_failure());
        assert!(
            SandboxError::ExecutionTimeout {
                limit: Duration::from_secs(10),
                partial: Box::default(),
            }
            .is_business_failure()
        );
    }

    #[test]
    fn test_infrastructure_failures() {
        assert!(!SandboxError::RunnerScriptMissing("assets/runner.sh".into()).is_business_failure());
        assert!(
            !SandboxError::EnvironmentProvisioningFailed(EngineError("no daemon".into()))
                .is_business_failure()
        );
        assert!(!SandboxError::Engine(EngineError("socket closed".into())).is_business_failure());
    }

    #[test]
    fn test_timeout_message() {
        let err = SandboxError::ExecutionTimeout {
            limit: Duration::from_secs(10),
            partial: Box::default(),
        };
        assert_eq!(err.to_string(), "Execution timeout");
    }
}
