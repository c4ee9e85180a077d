//! Per-job filesystem scope
//!
//! A workspace holds exactly the submitted source, the stdin fixture and a
//! copy of the runner script. It is removed when dropped, so an early return
//! or panic between creation and teardown cannot leak it.

use std::io;
use std::path::Path;

use tempfile::TempDir;
use tokio::fs;

use crate::constants::{INPUT_FILE_NAME, RUNNER_SCRIPT_NAME, WORKSPACE_PREFIX};

/// Uniquely named temporary directory bound into one sandbox
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh directory under `root` and populate it.
    pub async fn prepare(
        root: &Path,
        file_name: &str,
        source: &[u8],
        input: &str,
        runner_script: &Path,
    ) -> io::Result<Self> {
        fs::create_dir_all(root).await?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(root)?;
        let workspace = Self { dir };

        fs::write(workspace.path().join(file_name), source).await?;
        fs::write(workspace.path().join(INPUT_FILE_NAME), input).await?;
        fs::copy(runner_script, workspace.path().join(RUNNER_SCRIPT_NAME)).await?;

        // The sandbox runs with every capability dropped, so it cannot bypass
        // permissions on a directory owned by the worker's uid
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(workspace.path(), std::fs::Permissions::from_mode(0o777)).await?;
            fs::set_permissions(
                workspace.path().join(RUNNER_SCRIPT_NAME),
                std::fs::Permissions::from_mode(0o755),
            )
            .await?;
        }

        Ok(workspace)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory name, unique among live workspaces
    pub fn name(&self) -> String {
        self.path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Remove the directory, reporting failures instead of swallowing them
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

/// A source file name must be a single plain path segment that does not
/// collide with the files the worker places next to it.
pub fn is_valid_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name != INPUT_FILE_NAME
        && name != RUNNER_SCRIPT_NAME
        && !name.contains(['/', '\\', '\0'])
}
