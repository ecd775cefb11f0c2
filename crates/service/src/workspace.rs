//! Job workspaces
//!
//! Every job gets its own directory under a configured root, named after the
//! job id. The directory is created exclusively and removed when the job ends.

use crate::job::JobId;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const OUTPUT_FILE: &str = "output.mp4";
const STATS_PREFIX: &str = "ffmpeg2pass";

/// Error type for workspace operations
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Failed to prepare workspace root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create workspace {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to stage input at {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read output {path}: {source}")]
    ReadOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to remove workspace {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Directory under which job workspaces live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRoot(PathBuf);

impl WorkspaceRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Create the root if it does not exist yet
    pub async fn ensure(&self) -> Result<(), WorkspaceError> {
        tokio::fs::create_dir_all(&self.0)
            .await
            .map_err(|source| WorkspaceError::Root {
                path: self.0.clone(),
                source,
            })
    }

    /// Directory a job with `id` would use
    pub fn dir_for(&self, id: &JobId) -> PathBuf {
        self.0.join(format!("job-{}", id))
    }
}

/// One job's exclusively owned directory
///
/// Call [`Workspace::cleanup`] on every exit path. If the owner is dropped
/// without doing so (for example when its task is aborted), the directory is
/// removed synchronously on drop.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    removed: bool,
}

impl Workspace {
    /// Create the directory for `id`; fails if it already exists
    pub async fn create(root: &WorkspaceRoot, id: &JobId) -> Result<Self, WorkspaceError> {
        root.ensure().await?;
        let dir = root.dir_for(id);
        tokio::fs::create_dir(&dir)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: dir.clone(),
                source,
            })?;
        tracing::debug!(path = %dir.display(), "Created workspace");
        Ok(Self {
            dir,
            removed: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the staged input for a given extension
    pub fn input_path(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("input.{}", extension))
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.join(OUTPUT_FILE)
    }

    /// Prefix for the encoder's pass statistics files
    pub fn stats_prefix(&self) -> PathBuf {
        self.dir.join(STATS_PREFIX)
    }

    /// Write the uploaded bytes as `input.<extension>`
    pub async fn stage_input(
        &self,
        content: &[u8],
        extension: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        let path = self.input_path(extension);
        tokio::fs::write(&path, content)
            .await
            .map_err(|source| WorkspaceError::Stage {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Read the finished output fully into memory
    pub async fn read_output(&self) -> Result<Vec<u8>, WorkspaceError> {
        let path = self.output_path();
        tokio::fs::read(&path)
            .await
            .map_err(|source| WorkspaceError::ReadOutput { path, source })
    }

    /// Remove the directory and everything in it; safe to call repeatedly
    pub async fn cleanup(&mut self) -> Result<(), WorkspaceError> {
        if self.removed {
            return Ok(());
        }
        remove_workspace_dir(&self.dir).await?;
        self.removed = true;
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                tracing::debug!(path = %self.dir.display(), "Removed abandoned workspace");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.dir.display(), error = %e, "Failed to remove abandoned workspace");
            }
        }
    }
}

/// Remove a workspace directory; a missing directory counts as removed
pub async fn remove_workspace_dir(dir: &Path) -> Result<(), WorkspaceError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(WorkspaceError::Cleanup {
            path: dir.to_path_buf(),
            source,
        }),
    }
}
