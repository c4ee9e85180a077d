//! Isolated execution of untrusted programs

pub mod docker;
pub mod engine;
pub mod error;
pub mod framing;
pub mod runner;
pub mod workspace;

pub use docker::DockerEngine;
pub use engine::{ContainerSpec, SandboxEngine};
pub use error::{EngineError, SandboxError};
pub use runner::SandboxRunner;
pub use workspace::Workspace;
