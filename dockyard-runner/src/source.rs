//! Source fetching
//!
//! Clones a repository into a prepared workspace directory.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("repository URL is empty")]
    EmptyUrl,

    #[error("failed to run '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git clone failed: {0}")]
    Clone(String),

    #[error("clone timed out after {0:?}")]
    TimedOut(Duration),
}

/// Fetches a repository's source into a local directory
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError>;
}

/// Fetcher backed by the `git` command line
#[derive(Debug, Clone)]
pub struct GitFetcher {
    binary: String,
}

impl GitFetcher {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new("git")
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(FetchError::EmptyUrl);
        }

        info!("Cloning {} into {}", url, dest.display());

        let output = Command::new(&self.binary)
            .arg("clone")
            .arg("--depth")
            .arg("1")
            .arg("--")
            .arg(url)
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| FetchError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .last()
                .unwrap_or("no output")
                .to_string();
            return Err(FetchError::Clone(reason));
        }

        debug!("Clone of {} finished", url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let fetcher = GitFetcher::default();
        let dir = tempfile::tempdir().unwrap();

        let err = fetcher.fetch("   ", dir.path()).await.unwrap_err();
        assert!(matches!(err, FetchError::EmptyUrl));
    }

    #[tokio::test]
    async fn test_missing_binary_reports_spawn_error() {
        let fetcher = GitFetcher::new("dockyard-test-missing-git");
        let dir = tempfile::tempdir().unwrap();

        let err = fetcher
            .fetch("https://example.invalid/repo.git", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Spawn { .. }));
    }

    #[test]
    fn test_clone_error_mentions_clone() {
        let err = FetchError::Clone("repository not found".to_string());
        assert_eq!(err.to_string(), "git clone failed: repository not found");
    }
}
