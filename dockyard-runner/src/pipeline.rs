//! Pipeline executor
//!
//! Runs one build end to end:
//! 1. Prepares an isolated workspace
//! 2. Clones the repository into it
//! 3. Resolves the build configuration and writes the build recipe
//! 4. Builds the image, streaming the engine's output as it arrives
//! 5. Picks a host port and starts the container, retrying on port conflicts
//! 6. Registers the container so the reaper can see it
//!
//! Every step is announced on the build's conduit before it starts. The
//! conduit is always closed on exit: a success line on the happy path, one
//! error line naming the failed step otherwise.

use dockyard_core::domain::build::{BuildConfig, BuildId, BuildRequest, ConfigError};
use dockyard_core::domain::container::ContainerRecord;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::conduit::LogWriter;
use crate::container::{BuildError, ContainerTeardown, ImageBuilder, RunSpec, RuntimeError};
use crate::ports::{PortAllocator, PortLease};
use crate::recipe::RecipeGenerator;
use crate::registry::{ContainerRegistry, RegistryError};
use crate::source::{FetchError, SourceFetcher};
use crate::workspace::{Workspace, WorkspaceError};

/// Build output lines buffered between the drain tasks and the conduit
const OUTPUT_BUFFER: usize = 256;

/// Failure of one pipeline step
///
/// The display text is what observers see as the build's error line.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Workspace setup failed: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Clone failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Configuration failed: {0}")]
    Config(#[from] ConfigError),

    #[error("Build failed: {0}")]
    Build(#[from] BuildError),

    #[error("Run failed: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Registration failed: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Directory build workspaces are created under
    pub workspace_base: PathBuf,
    /// Deadline for the clone and image build steps, if any
    pub step_timeout: Option<Duration>,
    /// Leave workspaces on disk after the build
    pub keep_workspaces: bool,
    /// Container start attempts when the chosen host port turns out to be taken
    pub run_attempts: u32,
    /// Host name used in the access URL
    pub public_host: String,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            workspace_base: PathBuf::from("ci"),
            step_timeout: None,
            keep_workspaces: false,
            run_attempts: 3,
            public_host: "localhost".to_string(),
        }
    }
}

/// A successfully deployed build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub build_id: BuildId,
    pub container_id: String,
    pub port: u16,
    pub url: String,
}

pub struct PipelineExecutor {
    fetcher: Arc<dyn SourceFetcher>,
    recipes: Arc<dyn RecipeGenerator>,
    builder: Arc<dyn ImageBuilder>,
    teardown: Arc<dyn ContainerTeardown>,
    registry: Arc<ContainerRegistry>,
    ports: PortAllocator,
    settings: ExecutorSettings,
}

impl PipelineExecutor {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        recipes: Arc<dyn RecipeGenerator>,
        builder: Arc<dyn ImageBuilder>,
        teardown: Arc<dyn ContainerTeardown>,
        registry: Arc<ContainerRegistry>,
        ports: PortAllocator,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            fetcher,
            recipes,
            builder,
            teardown,
            registry,
            ports,
            settings,
        }
    }

    /// Runs the pipeline for `request`, logging to `writer`
    ///
    /// The writer is consumed: when this returns the conduit is closed, with
    /// a terminal line on success or a single error line on failure.
    pub async fn execute(
        &self,
        build_id: BuildId,
        request: BuildRequest,
        writer: LogWriter,
    ) -> Result<Deployment, PipelineError> {
        info!(
            "Starting build {} for {} ({})",
            build_id, request.repo_url, request.app_type
        );

        match self.run(build_id, &request, &writer).await {
            Ok(deployment) => {
                info!(
                    "Build {} deployed container {} on port {}",
                    build_id, deployment.container_id, deployment.port
                );
                writer.complete(format!(
                    "Deployed! Access at {} (container: {})",
                    deployment.url, deployment.container_id
                ));
                Ok(deployment)
            }
            Err(e) => {
                error!("Build {} failed: {}", build_id, e);
                writer.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        build_id: BuildId,
        request: &BuildRequest,
        writer: &LogWriter,
    ) -> Result<Deployment, PipelineError> {
        writer.info("Preparing workspace");
        let workspace = Workspace::create(&self.settings.workspace_base)?;

        let result = self.run_in(&workspace, build_id, request, writer).await;

        if !self.settings.keep_workspaces {
            match workspace.remove() {
                Ok(()) => debug!("Removed workspace {}", workspace.path().display()),
                Err(e) => warn!(
                    "Failed to remove workspace {}: {}",
                    workspace.path().display(),
                    e
                ),
            }
        }

        result
    }

    async fn run_in(
        &self,
        workspace: &Workspace,
        build_id: BuildId,
        request: &BuildRequest,
        writer: &LogWriter,
    ) -> Result<Deployment, PipelineError> {
        writer.info(format!("Cloning {}", request.repo_url));
        self.within(
            self.fetcher.fetch(&request.repo_url, workspace.path()),
            FetchError::TimedOut,
        )
        .await?;

        writer.info(format!(
            "Resolving build configuration for app type '{}'",
            request.app_type
        ));
        let config = BuildConfig::resolve(request)?;

        writer.info("Generating Dockerfile");
        self.recipes.generate(workspace.path(), &config)?;

        let tag = workspace.image_tag();
        writer.info(format!("Building image {}", tag));
        self.within(
            self.build_image(&tag, workspace.path(), writer),
            BuildError::TimedOut,
        )
        .await?;

        writer.info("Allocating host port");
        let lease = self.ports.allocate()?;

        let name = workspace.container_name();
        writer.info(format!("Starting container {}", name));
        let (lease, container_id) = self.start_container(lease, &tag, &name, &config).await?;
        let port = lease.port();

        writer.info(format!("Registering container {}", container_id));
        if let Err(e) = self
            .registry
            .register(ContainerRecord::new(&container_id, port))
        {
            if let Err(teardown_err) = self.teardown.teardown(&container_id).await {
                warn!(
                    "Failed to tear down unregistered container {}: {}",
                    container_id, teardown_err
                );
            }
            return Err(e.into());
        }
        // The registry holds the port from here on.
        drop(lease);

        Ok(Deployment {
            build_id,
            container_id,
            port,
            url: format!("http://{}:{}", self.settings.public_host, port),
        })
    }

    /// Starts the container, moving to another host port when the runtime
    /// reports the chosen one as taken
    async fn start_container(
        &self,
        mut lease: PortLease,
        image: &str,
        name: &str,
        config: &BuildConfig,
    ) -> Result<(PortLease, String), RuntimeError> {
        let attempts = self.settings.run_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let spec = RunSpec {
                image: image.to_string(),
                name: name.to_string(),
                external_port: lease.port(),
                internal_port: config.port,
                env: config.env.clone(),
            };

            match self.builder.run(&spec).await {
                Ok(container_id) => return Ok((lease, container_id)),
                Err(RuntimeError::PortConflict(port)) if attempt < attempts => {
                    warn!(
                        "Host port {} was taken when starting {} (attempt {}/{}), retrying",
                        port, name, attempt, attempts
                    );
                    lease = self.ports.allocate()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Builds the image, forwarding both output streams to the conduit
    ///
    /// Lines keep their order within each stream; lines from the two streams
    /// interleave in arrival order.
    async fn build_image(
        &self,
        tag: &str,
        context: &Path,
        writer: &LogWriter,
    ) -> Result<(), BuildError> {
        let process = self.builder.build(tag, context).await?;

        let (lines_tx, mut lines_rx) = mpsc::channel(OUTPUT_BUFFER);
        let stdout = tokio::spawn(drain(process.stdout, lines_tx.clone()));
        let stderr = tokio::spawn(drain(process.stderr, lines_tx));
        let exit = process.exit;

        // Dropping this future (e.g. on timeout) must not leave the build
        // running in the background.
        let _guard = AbortOnDrop(vec![
            stdout.abort_handle(),
            stderr.abort_handle(),
            exit.abort_handle(),
        ]);

        while let Some(line) = lines_rx.recv().await {
            writer.info(line);
        }

        for drained in [stdout, stderr] {
            drained
                .await
                .map_err(|e| BuildError::Interrupted(e.to_string()))?
                .map_err(|e| BuildError::Interrupted(format!("reading build output: {}", e)))?;
        }

        exit.await
            .map_err(|e| BuildError::Interrupted(e.to_string()))?
    }

    async fn within<T, E>(
        &self,
        step: impl Future<Output = Result<T, E>>,
        timed_out: impl FnOnce(Duration) -> E,
    ) -> Result<T, E> {
        match self.settings.step_timeout {
            Some(limit) => time::timeout(limit, step)
                .await
                .unwrap_or_else(|_| Err(timed_out(limit))),
            None => step.await,
        }
    }
}

/// Forwards non-blank lines from `reader` until it reaches end of stream
async fn drain(
    reader: Box<dyn AsyncRead + Send + Unpin>,
    lines: mpsc::Sender<String>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        if lines.send(line.to_string()).await.is_err() {
            return Ok(());
        }
    }
}

struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}
