//! Container API Handlers
//!
//! HTTP endpoints for running containers.

use axum::{
    Json,
    extract::{Path, State},
};
use dockyard_core::domain::container::ContainerRecord;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::container_service::{self, ContainerServiceError};

/// GET|POST /ping/{container_id}
/// Keep-alive from a deployed application; unknown ids are ignored
pub async fn ping(State(state): State<AppState>, Path(container_id): Path<String>) -> &'static str {
    container_service::touch(&state.registry, &container_id);
    "pong"
}

/// GET /containers
/// List running containers
pub async fn list_containers(State(state): State<AppState>) -> Json<Vec<ContainerRecord>> {
    Json(container_service::list(&state.registry))
}

/// DELETE /containers/{container_id}
/// Stop and forget a container
pub async fn delete_container(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> ApiResult<Json<ContainerRecord>> {
    let record = container_service::teardown(&state.registry, state.teardown.as_ref(), &container_id)
        .await
        .map_err(|e| match e {
            ContainerServiceError::NotFound(id) => {
                ApiError::NotFound(format!("Container {} not found", id))
            }
            ContainerServiceError::RuntimeError(err) => {
                ApiError::InternalError(format!("Failed to stop container: {}", err))
            }
        })?;

    Ok(Json(record))
}
