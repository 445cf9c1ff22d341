//! Container Service
//!
//! Operations on running containers driven from outside the build pipeline:
//! keep-alive pings, listing and explicit teardown.

use dockyard_core::domain::container::ContainerRecord;
use dockyard_runner::container::RuntimeError;
use dockyard_runner::{ContainerRegistry, ContainerTeardown, ImageBuilder};

/// Service error type
#[derive(Debug)]
pub enum ContainerServiceError {
    NotFound(String),
    RuntimeError(RuntimeError),
}

impl From<RuntimeError> for ContainerServiceError {
    fn from(err: RuntimeError) -> Self {
        ContainerServiceError::RuntimeError(err)
    }
}

/// Records an access to a container
///
/// Unknown ids are ignored, so a ping racing with the reaper never
/// resurrects a removed record.
pub fn touch(registry: &ContainerRegistry, container_id: &str) -> bool {
    let found = registry.touch(container_id);
    if !found {
        tracing::debug!("Ping for unknown container {}", container_id);
    }
    found
}

/// Lists registered containers, ordered by host port
pub fn list(registry: &ContainerRegistry) -> Vec<ContainerRecord> {
    let mut records = registry.snapshot();
    records.sort_by_key(|record| record.port);
    records
}

/// Stops and removes a registered container
///
/// The record is removed even if the runtime fails to tear the container
/// down; the failure is still reported.
pub async fn teardown(
    registry: &ContainerRegistry,
    runtime: &dyn ContainerTeardown,
    container_id: &str,
) -> Result<ContainerRecord, ContainerServiceError> {
    let record = registry
        .get(container_id)
        .ok_or_else(|| ContainerServiceError::NotFound(container_id.to_string()))?;

    tracing::info!("Tearing down container {} on request", container_id);
    let result = runtime.teardown(container_id).await;
    registry.remove(container_id);

    result?;
    Ok(record)
}

/// Checks that the container runtime answers
pub async fn health(runtime: &dyn ImageBuilder) -> Result<(), ContainerServiceError> {
    runtime.ping().await?;
    Ok(())
}
