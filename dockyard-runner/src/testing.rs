//! In-memory collaborators for exercising the pipeline and the reaper
//! without git or a container engine.

use async_trait::async_trait;
use dockyard_core::domain::build::{BuildConfig, ConfigError};
use std::collections::VecDeque;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::container::{
    BuildError, BuildProcess, ContainerTeardown, ImageBuilder, RunSpec, RuntimeError,
};
use crate::recipe::RecipeGenerator;
use crate::source::{FetchError, SourceFetcher};

/// Fetcher that either succeeds after dropping a marker file, fails like
/// an unreachable repository, or stalls like a clone that never finishes
#[derive(Default)]
pub struct FakeFetcher {
    failure: Option<String>,
    hangs: bool,
    fetched: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Default::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hangs: true,
            ..Default::default()
        }
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        self.fetched.lock().unwrap().push(url.to_string());
        if self.hangs {
            std::future::pending::<()>().await;
        }
        if let Some(reason) = &self.failure {
            return Err(FetchError::Clone(reason.clone()));
        }
        std::fs::write(dest.join("README.md"), url).map_err(|source| FetchError::Spawn {
            binary: "fake-git".to_string(),
            source,
        })
    }
}

/// Recipe generator that records the configurations it was given
#[derive(Default)]
pub struct FakeRecipes {
    fail: bool,
    generated: Mutex<Vec<BuildConfig>>,
}

impl FakeRecipes {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn generated(&self) -> Vec<BuildConfig> {
        self.generated.lock().unwrap().clone()
    }
}

impl RecipeGenerator for FakeRecipes {
    fn generate(&self, _dir: &Path, config: &BuildConfig) -> Result<(), ConfigError> {
        if self.fail {
            return Err(ConfigError::MissingCommand("start"));
        }
        self.generated.lock().unwrap().push(config.clone());
        Ok(())
    }
}

/// How a fake image build behaves
#[derive(Clone)]
pub enum FakeBuild {
    /// Emits the given output then exits with the given code (0 succeeds)
    Exits {
        stdout: String,
        stderr: String,
        code: i32,
    },
    /// Produces no output and never exits
    Hangs,
}

/// Container runtime double implementing both runtime traits
pub struct FakeRuntime {
    build: FakeBuild,
    /// Number of leading `run` calls that report a port conflict
    conflicts: AtomicUsize,
    fail_teardown: bool,
    fail_ping: bool,
    next_id: AtomicUsize,
    builds: Mutex<Vec<String>>,
    runs: Mutex<Vec<RunSpec>>,
    torn_down: Mutex<Vec<String>>,
    pending_ids: Mutex<VecDeque<String>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self {
            build: FakeBuild::Exits {
                stdout: "Step 1/4 : FROM node:22-alpine\nStep 2/4 : WORKDIR /app\n".to_string(),
                stderr: String::new(),
                code: 0,
            },
            conflicts: AtomicUsize::new(0),
            fail_teardown: false,
            fail_ping: false,
            next_id: AtomicUsize::new(1),
            builds: Mutex::new(Vec::new()),
            runs: Mutex::new(Vec::new()),
            torn_down: Mutex::new(Vec::new()),
            pending_ids: Mutex::new(VecDeque::new()),
        }
    }
}

impl FakeRuntime {
    pub fn with_build(mut self, build: FakeBuild) -> Self {
        self.build = build;
        self
    }

    pub fn with_output(self, stdout: &str, stderr: &str, code: i32) -> Self {
        self.with_build(FakeBuild::Exits {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            code,
        })
    }

    pub fn with_port_conflicts(self, count: usize) -> Self {
        self.conflicts.store(count, Ordering::SeqCst);
        self
    }

    /// Makes `run` hand out these ids before falling back to generated ones
    pub fn with_container_ids(self, ids: &[&str]) -> Self {
        self.pending_ids
            .lock()
            .unwrap()
            .extend(ids.iter().map(|id| id.to_string()));
        self
    }

    pub fn failing_teardown(mut self) -> Self {
        self.fail_teardown = true;
        self
    }

    /// Makes `ping` report the runtime as unreachable
    pub fn failing_ping(mut self) -> Self {
        self.fail_ping = true;
        self
    }

    pub fn builds(&self) -> Vec<String> {
        self.builds.lock().unwrap().clone()
    }

    pub fn runs(&self) -> Vec<RunSpec> {
        self.runs.lock().unwrap().clone()
    }

    pub fn torn_down(&self) -> Vec<String> {
        self.torn_down.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageBuilder for FakeRuntime {
    async fn build(&self, tag: &str, _context: &Path) -> Result<BuildProcess, BuildError> {
        self.builds.lock().unwrap().push(tag.to_string());

        match self.build.clone() {
            FakeBuild::Exits {
                stdout,
                stderr,
                code,
            } => Ok(BuildProcess {
                stdout: Box::new(Cursor::new(stdout.into_bytes())),
                stderr: Box::new(Cursor::new(stderr.into_bytes())),
                exit: tokio::spawn(async move {
                    if code == 0 {
                        Ok(())
                    } else {
                        Err(BuildError::Failed(Some(code)))
                    }
                }),
            }),
            FakeBuild::Hangs => Ok(BuildProcess {
                stdout: Box::new(tokio::io::empty()),
                stderr: Box::new(tokio::io::empty()),
                exit: tokio::spawn(std::future::pending()),
            }),
        }
    }

    async fn run(&self, spec: &RunSpec) -> Result<String, RuntimeError> {
        self.runs.lock().unwrap().push(spec.clone());

        let conflict = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflict {
            return Err(RuntimeError::PortConflict(spec.external_port));
        }

        if let Some(id) = self.pending_ids.lock().unwrap().pop_front() {
            return Ok(id);
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("fake{:06}", n))
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        if self.fail_ping {
            return Err(RuntimeError::Failed {
                action: "info",
                code: Some(1),
                stderr: "Cannot connect to the Docker daemon".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerTeardown for FakeRuntime {
    async fn teardown(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.torn_down.lock().unwrap().push(container_id.to_string());
        if self.fail_teardown {
            return Err(RuntimeError::Failed {
                action: "container remove",
                code: Some(1),
                stderr: format!("Error: No such container: {}", container_id),
            });
        }
        Ok(())
    }
}
