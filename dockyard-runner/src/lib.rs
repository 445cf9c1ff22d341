//! Dockyard Runner
//!
//! The build engine behind the Dockyard service.
//!
//! Architecture:
//! - Conduit: ordered, replayable per-build log stream
//! - Registry: authoritative table of running containers
//! - Pipeline: workspace, clone, recipe, image build, container start, registration
//! - Reaper: background loop stopping containers nobody has pinged lately
//! - Collaborators: git, the container runtime and the recipe generator sit
//!   behind traits so the pipeline and the reaper can be driven by fakes

pub mod conduit;
pub mod config;
pub mod container;
pub mod pipeline;
pub mod ports;
pub mod reaper;
pub mod recipe;
pub mod registry;
pub mod source;
pub mod workspace;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use conduit::{LogConduit, LogSubscriber, LogWriter, RecvError, conduit};
pub use config::EngineConfig;
pub use container::{ContainerTeardown, DockerCli, ImageBuilder};
pub use pipeline::{Deployment, ExecutorSettings, PipelineError, PipelineExecutor};
pub use ports::PortAllocator;
pub use reaper::{IdleReaper, SweepReport};
pub use recipe::{DockerfileGenerator, RecipeGenerator};
pub use registry::ContainerRegistry;
pub use source::{GitFetcher, SourceFetcher};
