//! Build workspaces
//!
//! Each build gets its own directory under the configured base, named after
//! a short random id that also names the build's image and container.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("failed to create workspace {path}: {source}")]
pub struct WorkspaceError {
    path: String,
    #[source]
    source: std::io::Error,
}

/// An isolated directory for one build
#[derive(Debug, Clone)]
pub struct Workspace {
    id: String,
    path: PathBuf,
}

impl Workspace {
    /// Creates a fresh workspace directory under `base`
    pub fn create(base: &Path) -> Result<Self, WorkspaceError> {
        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let path = base.join(format!("workspace-{}", id));

        std::fs::create_dir_all(&path).map_err(|source| WorkspaceError {
            path: path.display().to_string(),
            source,
        })?;

        debug!("Created workspace {}", path.display());
        Ok(Self { id, path })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tag of the image built from this workspace
    pub fn image_tag(&self) -> String {
        format!("ci-{}", self.id)
    }

    /// Name of the container started from this workspace's image
    pub fn container_name(&self) -> String {
        format!("container-{}", self.id)
    }

    /// Deletes the workspace directory and everything in it
    pub fn remove(&self) -> std::io::Result<()> {
        match std::fs::remove_dir_all(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
