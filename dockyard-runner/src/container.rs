//! Container runtime integration
//!
//! Wraps the container engine's command line for the lifecycle a build needs:
//! - Checking that the engine is reachable
//! - Building an image while exposing its output as it is produced
//! - Starting a detached container with a host port mapping
//! - Stopping and removing a container
//!
//! The executor and the reaper only see the `ImageBuilder` and
//! `ContainerTeardown` traits; `DockerCli` is the production implementation
//! and works with any docker-compatible binary (docker, podman).

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors from building an image
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to start image build: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("image build output pipe unavailable")]
    MissingPipe,

    #[error("failed waiting for image build: {0}")]
    Wait(#[source] std::io::Error),

    #[error("image build exited with {}", exit_description(.0))]
    Failed(Option<i32>),

    #[error("image build was interrupted: {0}")]
    Interrupted(String),

    #[error("image build timed out after {0:?}")]
    TimedOut(Duration),
}

/// Errors from starting, stopping or querying containers
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to invoke container runtime '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("host port {0} is already in use")]
    PortConflict(u16),

    #[error("no free host port left in {0}..{1}")]
    NoFreePort(u16, u16),

    #[error("{action} failed with {}: {stderr}", exit_description(.code))]
    Failed {
        action: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("container runtime returned no container id")]
    MissingContainerId,
}

fn exit_description(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("exit status {}", code),
        None => "no exit status (killed by signal)".to_string(),
    }
}

/// A running image build
///
/// Both output streams must be drained for the build process to make
/// progress. `exit` resolves once the process has exited.
pub struct BuildProcess {
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    pub exit: JoinHandle<Result<(), BuildError>>,
}

/// Parameters for starting a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub image: String,
    pub name: String,
    pub external_port: u16,
    pub internal_port: u16,
    pub env: BTreeMap<String, String>,
}

/// Builds images and starts containers from them
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Starts building `context` into an image tagged `tag`
    async fn build(&self, tag: &str, context: &Path) -> Result<BuildProcess, BuildError>;

    /// Starts a detached container and returns its id
    async fn run(&self, spec: &RunSpec) -> Result<String, RuntimeError>;

    /// Checks that the runtime is reachable, independent of any build
    async fn ping(&self) -> Result<(), RuntimeError>;
}

/// Stops and removes containers
#[async_trait]
pub trait ContainerTeardown: Send + Sync {
    async fn teardown(&self, container_id: &str) -> Result<(), RuntimeError>;
}

/// Docker-compatible command line runtime
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    /// Creates a runtime driving the given binary (e.g. `docker`, `podman`)
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.kill_on_drop(true);
        command
    }

    async fn output(
        &self,
        action: &'static str,
        command: &mut Command,
    ) -> Result<String, RuntimeError> {
        let output = command.output().await.map_err(|source| RuntimeError::Spawn {
            binary: self.binary.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !stderr.is_empty() {
            debug!("{} stderr: {}", action, stderr);
        }

        if !output.status.success() {
            return Err(RuntimeError::Failed {
                action,
                code: output.status.code(),
                stderr,
            });
        }

        Ok(stdout)
    }
}

/// Whether runtime stderr reports a host port collision
fn is_port_conflict(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("port is already allocated")
        || stderr.contains("address already in use")
        || stderr.contains("bind: address already")
}

#[async_trait]
impl ImageBuilder for DockerCli {
    async fn build(&self, tag: &str, context: &Path) -> Result<BuildProcess, BuildError> {
        info!("Building image {} from {}", tag, context.display());

        let mut child = self
            .command()
            .arg("build")
            .arg("-t")
            .arg(tag)
            .arg(context)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(BuildError::Spawn)?;

        let stdout = child.stdout.take().ok_or(BuildError::MissingPipe)?;
        let stderr = child.stderr.take().ok_or(BuildError::MissingPipe)?;

        let exit = tokio::spawn(async move {
            let status = child.wait().await.map_err(BuildError::Wait)?;
            if status.success() {
                Ok(())
            } else {
                Err(BuildError::Failed(status.code()))
            }
        });

        Ok(BuildProcess {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            exit,
        })
    }

    async fn run(&self, spec: &RunSpec) -> Result<String, RuntimeError> {
        info!(
            "Starting container {} from {} ({}:{})",
            spec.name, spec.image, spec.external_port, spec.internal_port
        );

        let mut command = self.command();
        command
            .arg("run")
            .arg("-d")
            .arg("-p")
            .arg(format!("{}:{}", spec.external_port, spec.internal_port));

        for (key, value) in &spec.env {
            command.arg("-e").arg(format!("{}={}", key, value));
        }

        command.arg("--name").arg(&spec.name).arg(&spec.image);

        let container_id = match self.output("container start", &mut command).await {
            Ok(stdout) => stdout,
            Err(RuntimeError::Failed { stderr, .. }) if is_port_conflict(&stderr) => {
                // The runtime leaves a created-but-not-started container
                // behind, holding the name the retry needs.
                let _ = self
                    .output("container remove", self.command().arg("rm").arg("-f").arg(&spec.name))
                    .await;
                return Err(RuntimeError::PortConflict(spec.external_port));
            }
            Err(e) => return Err(e),
        };

        let container_id = container_id
            .lines()
            .last()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(RuntimeError::MissingContainerId)?
            .to_string();

        info!("Container {} started with ID {}", spec.name, container_id);
        Ok(container_id)
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        self.output("runtime info", self.command().arg("info"))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ContainerTeardown for DockerCli {
    async fn teardown(&self, container_id: &str) -> Result<(), RuntimeError> {
        debug!("Stopping container {}", container_id);

        // Stop errors are ignored: the container may already have exited.
        if let Err(e) = self
            .output("container stop", self.command().arg("stop").arg(container_id))
            .await
        {
            debug!("Stop of container {} failed: {}", container_id, e);
        }

        match self
            .output(
                "container remove",
                self.command().arg("rm").arg("-f").arg(container_id),
            )
            .await
        {
            Ok(_) => {
                debug!("Container {} removed", container_id);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to remove container {}: {}", container_id, e);
                Err(e)
            }
        }
    }
}
